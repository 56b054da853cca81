// src/db/outbox_repo.rs

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{EntityKind, EventKind, EventSink},
};

// Implementação de produção do EventSink: estaciona o evento na tabela
// `webhook_outbox`. Um worker externo cuida da entrega aos assinantes; o
// engine nunca espera rede de terceiros.
#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for OutboxRepository {
    async fn deliver(
        &self,
        entity_type: EntityKind,
        entity_id: Uuid,
        event: EventKind,
        payload: &Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_outbox (entity_type, entity_id, event, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(event.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
