// src/db/pipeline_repo.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{HistorySink, OpportunityUpdate, PipelineStore},
    models::pipeline::{
        AlertConfig, FieldDefinition, Funnel, Opportunity, Stage, StageHistoryEntry,
        StageRequirements,
    },
};
use async_trait::async_trait;

// Linha crua de `stages`: o JSONB entra como `Json<T>` e é convertido para o
// model antes de sair do repositório.
#[derive(FromRow)]
struct StageRow {
    id: Uuid,
    funnel_id: Uuid,
    name: String,
    position: i32,
    is_win_stage: bool,
    is_loss_stage: bool,
    required_fields: Json<Vec<FieldDefinition>>,
    win_reason_required: bool,
    loss_reason_required: bool,
    win_reasons: Vec<String>,
    loss_reasons: Vec<String>,
    required_tasks: Vec<String>,
    alert_config: Option<Json<AlertConfig>>,
    created_at: DateTime<Utc>,
}

impl From<StageRow> for Stage {
    fn from(row: StageRow) -> Self {
        Stage {
            id: row.id,
            funnel_id: row.funnel_id,
            name: row.name,
            position: row.position,
            is_win_stage: row.is_win_stage,
            is_loss_stage: row.is_loss_stage,
            required_fields: row.required_fields.0,
            win_reason_required: row.win_reason_required,
            loss_reason_required: row.loss_reason_required,
            win_reasons: row.win_reasons,
            loss_reasons: row.loss_reasons,
            required_tasks: row.required_tasks,
            alert_config: row.alert_config.map(|j| j.0),
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct RequirementsRow {
    required_fields: Json<Vec<FieldDefinition>>,
    required_tasks: Vec<String>,
}

#[derive(Clone)]
pub struct PipelineRepository {
    pool: PgPool,
}

impl PipelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    //  FUNIS
    // =========================================================================

    pub async fn create_funnel(&self, name: &str) -> Result<Funnel, AppError> {
        let funnel = sqlx::query_as::<_, Funnel>(
            "INSERT INTO funnels (name) VALUES ($1) RETURNING *",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(funnel)
    }

    pub async fn list_funnels(&self) -> Result<Vec<Funnel>, AppError> {
        let funnels = sqlx::query_as::<_, Funnel>("SELECT * FROM funnels ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(funnels)
    }

    pub async fn get_funnel_by_id(&self, id: Uuid) -> Result<Funnel, AppError> {
        sqlx::query_as::<_, Funnel>("SELECT * FROM funnels WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::FunnelNotFound)
    }

    // =========================================================================
    //  ETAPAS
    // =========================================================================

    // A posição é sempre anexada ao fim do funil; reordenações vêm depois,
    // pelo coordenador do board.
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
        let row = sqlx::query_as::<_, StageRow>(
            r#"
            INSERT INTO stages (
                funnel_id, name, position, is_win_stage, is_loss_stage,
                required_fields, win_reason_required, loss_reason_required,
                win_reasons, loss_reasons, required_tasks, alert_config
            )
            VALUES (
                $1, $2,
                (SELECT COALESCE(MAX(position) + 1, 0)::int FROM stages WHERE funnel_id = $1),
                $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING *
            "#,
        )
        .bind(funnel_id)
        .bind(name)
        .bind(is_win_stage)
        .bind(is_loss_stage)
        .bind(Json(required_fields))
        .bind(win_reason_required)
        .bind(loss_reason_required)
        .bind(win_reasons.to_vec())
        .bind(loss_reasons.to_vec())
        .bind(required_tasks.to_vec())
        .bind(alert_config.map(Json))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    // =========================================================================
    //  OPORTUNIDADES
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn create_opportunity(
        &self,
        funnel_id: Uuid,
        stage_id: Uuid,
        title: &str,
        value: Option<Decimal>,
        contact_name: Option<&str>,
        contact_email: Option<&str>,
        contact_phone: Option<&str>,
        custom_fields: &Value,
    ) -> Result<Opportunity, AppError> {
        let opportunity = sqlx::query_as::<_, Opportunity>(
            r#"
            INSERT INTO opportunities (
                funnel_id, stage_id, title, value,
                contact_name, contact_email, contact_phone, custom_fields
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(funnel_id)
        .bind(stage_id)
        .bind(title)
        .bind(value)
        .bind(contact_name)
        .bind(contact_email)
        .bind(contact_phone)
        .bind(custom_fields)
        .fetch_one(&self.pool)
        .await?;

        Ok(opportunity)
    }

    // =========================================================================
    //  HISTÓRICO (leitura; o append fica no HistorySink)
    // =========================================================================

    pub async fn list_history(
        &self,
        opportunity_id: Uuid,
    ) -> Result<Vec<StageHistoryEntry>, AppError> {
        let entries = sqlx::query_as::<_, StageHistoryEntry>(
            "SELECT * FROM stage_history WHERE opportunity_id = $1 ORDER BY moved_at ASC",
        )
        .bind(opportunity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

// =============================================================================
//  CONTRATO DO STORE (consumido pelo engine de transição)
// =============================================================================

#[async_trait]
impl PipelineStore for PipelineRepository {
    async fn get_stage_by_id(&self, id: Uuid) -> Result<Stage, AppError> {
        let row = sqlx::query_as::<_, StageRow>("SELECT * FROM stages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::StageNotFound)?;

        Ok(row.into())
    }

    async fn list_stages_by_funnel(&self, funnel_id: Uuid) -> Result<Vec<Stage>, AppError> {
        let rows = sqlx::query_as::<_, StageRow>("SELECT * FROM stages WHERE funnel_id = $1")
            .bind(funnel_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Stage::from).collect())
    }

    async fn list_opportunities_by_funnel(
        &self,
        funnel_id: Uuid,
    ) -> Result<Vec<Opportunity>, AppError> {
        let opportunities = sqlx::query_as::<_, Opportunity>(
            "SELECT * FROM opportunities WHERE funnel_id = $1 ORDER BY created_at ASC",
        )
        .bind(funnel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(opportunities)
    }

    async fn update_stage_position(&self, id: Uuid, position: i32) -> Result<Stage, AppError> {
        let row = sqlx::query_as::<_, StageRow>(
            "UPDATE stages SET position = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(position)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::StageNotFound)?;

        Ok(row.into())
    }

    async fn update_opportunity(
        &self,
        id: Uuid,
        update: OpportunityUpdate,
    ) -> Result<Opportunity, AppError> {
        // Update parcial: COALESCE mantém o valor atual quando o campo não
        // veio. O carimbo de mudança de etapa só avança se o stage_id veio.
        let opportunity = sqlx::query_as::<_, Opportunity>(
            r#"
            UPDATE opportunities SET
                stage_id = COALESCE($2, stage_id),
                custom_fields = COALESCE($3, custom_fields),
                win_reason = COALESCE($4, win_reason),
                loss_reason = COALESCE($5, loss_reason),
                last_stage_change_at = CASE
                    WHEN $2 IS NOT NULL THEN NOW()
                    ELSE last_stage_change_at
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.stage_id)
        .bind(update.custom_fields)
        .bind(update.win_reason)
        .bind(update.loss_reason)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::OpportunityNotFound)?;

        Ok(opportunity)
    }

    async fn move_opportunity(
        &self,
        id: Uuid,
        destination_stage_id: Uuid,
    ) -> Result<Opportunity, AppError> {
        // Sobrescrita total do stage_id: reaplicar o mesmo movimento após uma
        // falha é idempotente por construção.
        let opportunity = sqlx::query_as::<_, Opportunity>(
            r#"
            UPDATE opportunities SET
                stage_id = $2,
                last_stage_change_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(destination_stage_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::OpportunityNotFound)?;

        Ok(opportunity)
    }

    async fn get_stage_requirements(
        &self,
        stage_id: Uuid,
    ) -> Result<StageRequirements, AppError> {
        let row = sqlx::query_as::<_, RequirementsRow>(
            "SELECT required_fields, required_tasks FROM stages WHERE id = $1",
        )
        .bind(stage_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::StageNotFound)?;

        Ok(StageRequirements {
            required_fields: row.required_fields.0,
            required_tasks: row.required_tasks,
        })
    }
}

#[async_trait]
impl HistorySink for PipelineRepository {
    async fn record_move(
        &self,
        opportunity_id: Uuid,
        from_stage_id: Option<Uuid>,
        to_stage_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<StageHistoryEntry, AppError> {
        let entry = sqlx::query_as::<_, StageHistoryEntry>(
            r#"
            INSERT INTO stage_history (opportunity_id, from_stage_id, to_stage_id, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(opportunity_id)
        .bind(from_stage_id)
        .bind(to_stage_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(entry)
    }
}
