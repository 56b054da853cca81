// src/config.rs

use std::{env, sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    db::{OutboxRepository, PipelineRepository},
    services::{
        board_service::BoardService,
        effects::{self, EffectQueue},
        funnel_service::FunnelService,
    },
};

// Capacidade da fila de efeitos colaterais. Estouro descarta com warning;
// o movimento em si nunca espera a fila.
const EFFECT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub board_service: BoardService,
    pub funnel_service: FunnelService,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL deve ser definida");

        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&database_url)
            .await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        // --- Monta o gráfico de dependências ---
        let repo = PipelineRepository::new(db_pool.clone());
        let outbox = OutboxRepository::new(db_pool.clone());

        // Fila de efeitos: o worker grava histórico e estaciona eventos no
        // outbox, fora do caminho crítico do movimento.
        let (effect_queue, effect_rx) = EffectQueue::channel(EFFECT_QUEUE_CAPACITY);
        let _worker = effects::spawn_worker(effect_rx, Arc::new(repo.clone()), Arc::new(outbox));

        let board_service = BoardService::new(Arc::new(repo.clone()), effect_queue.clone());
        let funnel_service = FunnelService::new(repo, effect_queue);

        Ok(Self {
            db_pool,
            board_service,
            funnel_service,
        })
    }
}
