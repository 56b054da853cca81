// src/services/funnel_service.rs
//
// CRUD de funis, etapas e oportunidades. O board engine (board_service) cuida
// das transições; aqui fica o ciclo de vida das entidades.

use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::pipeline_repo::PipelineRepository,
    db::store::{EntityKind, EventKind, PipelineStore},
    models::pipeline::{AlertConfig, FieldDefinition, Funnel, Opportunity, Stage, StageHistoryEntry},
    services::effects::{EffectQueue, SideEffect},
};

// Etapa inicial de um funil: a de menor posição.
fn first_stage(stages: &[Stage]) -> Option<&Stage> {
    stages.iter().min_by_key(|s| s.position)
}

#[derive(Clone)]
pub struct FunnelService {
    repo: PipelineRepository,
    effects: EffectQueue,
}

impl FunnelService {
    pub fn new(repo: PipelineRepository, effects: EffectQueue) -> Self {
        Self { repo, effects }
    }

    // =========================================================================
    //  FUNIS
    // =========================================================================

    pub async fn create_funnel(&self, name: &str) -> Result<Funnel, AppError> {
        self.repo.create_funnel(name).await
    }

    pub async fn list_funnels(&self) -> Result<Vec<Funnel>, AppError> {
        self.repo.list_funnels().await
    }

    pub async fn get_funnel(&self, id: Uuid) -> Result<Funnel, AppError> {
        self.repo.get_funnel_by_id(id).await
    }

    // =========================================================================
    //  ETAPAS
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn create_stage(
        &self,
        funnel_id: Uuid,
        name: &str,
        is_win_stage: bool,
        is_loss_stage: bool,
        required_fields: &[FieldDefinition],
        win_reason_required: bool,
        loss_reason_required: bool,
        win_reasons: &[String],
        loss_reasons: &[String],
        required_tasks: &[String],
        alert_config: Option<&AlertConfig>,
    ) -> Result<Stage, AppError> {
        // A mesma exclusividade que o CHECK do banco garante, validada antes
        // para devolver um erro de domínio em vez de erro SQL.
        if is_win_stage && is_loss_stage {
            return Err(AppError::StageFlagConflict);
        }

        // Garante o 404 correto antes do INSERT.
        self.repo.get_funnel_by_id(funnel_id).await?;

        let stage = self
            .repo
            .create_stage(
                funnel_id,
                name,
                is_win_stage,
                is_loss_stage,
                required_fields,
                win_reason_required,
                loss_reason_required,
                win_reasons,
                loss_reasons,
                required_tasks,
                alert_config,
            )
            .await?;

        self.effects.enqueue(SideEffect::EntityEvent {
            entity_type: EntityKind::Stage,
            entity_id: stage.id,
            event: EventKind::Create,
            payload: json!({ "funnelId": funnel_id, "name": stage.name }),
        });

        Ok(stage)
    }

    // =========================================================================
    //  OPORTUNIDADES
    // =========================================================================

    // Oportunidade nova sempre nasce na primeira etapa do funil, com entrada
    // de histórico sem origem (from = null).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_opportunity(
        &self,
        funnel_id: Uuid,
        title: &str,
        value: Option<Decimal>,
        contact_name: Option<&str>,
        contact_email: Option<&str>,
        contact_phone: Option<&str>,
        custom_fields: &Value,
    ) -> Result<Opportunity, AppError> {
        self.repo.get_funnel_by_id(funnel_id).await?;

        let stages = self.repo.list_stages_by_funnel(funnel_id).await?;
        let stage = first_stage(&stages).ok_or(AppError::StageNotFound)?;

        let opportunity = self
            .repo
            .create_opportunity(
                funnel_id,
                stage.id,
                title,
                value,
                contact_name,
                contact_email,
                contact_phone,
                custom_fields,
            )
            .await?;

        self.effects.enqueue(SideEffect::RecordHistory {
            opportunity_id: opportunity.id,
            from_stage_id: None,
            to_stage_id: stage.id,
            user_id: None,
        });
        self.effects.enqueue(SideEffect::EntityEvent {
            entity_type: EntityKind::Opportunity,
            entity_id: opportunity.id,
            event: EventKind::Create,
            payload: json!({ "funnelId": funnel_id, "stageId": stage.id }),
        });

        Ok(opportunity)
    }

    // =========================================================================
    //  HISTÓRICO
    // =========================================================================

    pub async fn list_history(
        &self,
        opportunity_id: Uuid,
    ) -> Result<Vec<StageHistoryEntry>, AppError> {
        self.repo.list_history(opportunity_id).await
    }
}
