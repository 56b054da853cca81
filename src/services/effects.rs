// src/services/effects.rs
//
// Fila limitada de efeitos colaterais (histórico, eventos de entidade,
// comemoração). Melhor esforço: o resultado do movimento nunca espera nem
// reverte por causa destes efeitos. Estouro de fila e falha de aplicação
// são apenas logados.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{EntityKind, EventKind, EventSink, HistorySink},
};

#[derive(Debug, Clone)]
pub enum SideEffect {
    RecordHistory {
        opportunity_id: Uuid,
        from_stage_id: Option<Uuid>,
        to_stage_id: Uuid,
        user_id: Option<Uuid>,
    },
    EntityEvent {
        entity_type: EntityKind,
        entity_id: Uuid,
        event: EventKind,
        payload: Value,
    },
    // Destino é etapa de ganho: gancho do efeito comemorativo externo.
    Celebrate {
        opportunity_id: Uuid,
        stage_id: Uuid,
    },
}

#[derive(Clone)]
pub struct EffectQueue {
    tx: mpsc::Sender<SideEffect>,
}

impl EffectQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SideEffect>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    // try_send: fila cheia descarta com warning em vez de suspender o
    // chamador no meio de uma transição.
    pub fn enqueue(&self, effect: SideEffect) {
        if let Err(e) = self.tx.try_send(effect) {
            tracing::warn!("Fila de efeitos indisponível, efeito descartado: {}", e);
        }
    }
}

pub fn spawn_worker(
    mut rx: mpsc::Receiver<SideEffect>,
    history: Arc<dyn HistorySink>,
    events: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(effect) = rx.recv().await {
            if let Err(e) = apply(effect, history.as_ref(), events.as_ref()).await {
                tracing::warn!("Efeito colateral falhou (seguindo em frente): {}", e);
            }
        }
    })
}

pub async fn apply(
    effect: SideEffect,
    history: &dyn HistorySink,
    events: &dyn EventSink,
) -> Result<(), AppError> {
    match effect {
        SideEffect::RecordHistory {
            opportunity_id,
            from_stage_id,
            to_stage_id,
            user_id,
        } => {
            history
                .record_move(opportunity_id, from_stage_id, to_stage_id, user_id)
                .await?;
        }
        SideEffect::EntityEvent {
            entity_type,
            entity_id,
            event,
            payload,
        } => {
            events.deliver(entity_type, entity_id, event, &payload).await?;
        }
        SideEffect::Celebrate {
            opportunity_id,
            stage_id,
        } => {
            tracing::info!("🎉 Oportunidade {} ganha na etapa {}!", opportunity_id, stage_id);
            // O efeito comemorativo em si fica com um colaborador externo;
            // aqui só estacionamos o evento para ele consumir.
            events
                .deliver(
                    EntityKind::Opportunity,
                    opportunity_id,
                    EventKind::Win,
                    &json!({ "stageId": stage_id }),
                )
                .await?;
        }
    }
    Ok(())
}
