// src/db/store.rs
//
// Contratos consumidos pelo engine de transição. O board não conhece SQL:
// enxerga o store de etapas/oportunidades, o sink de histórico e o sink de
// eventos só por estas traits, o que permite substituí-los por fakes em
// memória nos testes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::pipeline::{Opportunity, Stage, StageHistoryEntry, StageRequirements},
};

// Atualização parcial de oportunidade. `None` = mantém o valor atual.
// Quando `stage_id` está presente o store também carimba
// `last_stage_change_at`.
#[derive(Debug, Clone, Default)]
pub struct OpportunityUpdate {
    pub stage_id: Option<Uuid>,
    pub custom_fields: Option<Value>,
    pub win_reason: Option<String>,
    pub loss_reason: Option<String>,
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn get_stage_by_id(&self, id: Uuid) -> Result<Stage, AppError>;

    // A ordem de retorno NÃO é garantida; quem consome ordena por `position`.
    async fn list_stages_by_funnel(&self, funnel_id: Uuid) -> Result<Vec<Stage>, AppError>;

    async fn list_opportunities_by_funnel(
        &self,
        funnel_id: Uuid,
    ) -> Result<Vec<Opportunity>, AppError>;

    async fn update_stage_position(&self, id: Uuid, position: i32) -> Result<Stage, AppError>;

    async fn update_opportunity(
        &self,
        id: Uuid,
        update: OpportunityUpdate,
    ) -> Result<Opportunity, AppError>;

    // Variante leve do update: só o stage_id. Movimentos sem dados extras
    // não pagam o custo de um update completo.
    async fn move_opportunity(
        &self,
        id: Uuid,
        destination_stage_id: Uuid,
    ) -> Result<Opportunity, AppError>;

    async fn get_stage_requirements(&self, stage_id: Uuid)
        -> Result<StageRequirements, AppError>;
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record_move(
        &self,
        opportunity_id: Uuid,
        from_stage_id: Option<Uuid>,
        to_stage_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<StageHistoryEntry, AppError>;
}

// --- EVENTOS DE ENTIDADE (webhooks) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Stage,
    Opportunity,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Stage => "stage",
            EntityKind::Opportunity => "opportunity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Move,
    // Oportunidade entrou numa etapa de ganho.
    Win,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Move => "move",
            EventKind::Win => "win",
        }
    }
}

// Fire-and-forget: falhas são logadas pelo worker da fila, nunca bloqueiam
// nem revertem o movimento já persistido.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(
        &self,
        entity_type: EntityKind,
        entity_id: Uuid,
        event: EventKind,
        payload: &Value,
    ) -> Result<(), AppError>;
}
