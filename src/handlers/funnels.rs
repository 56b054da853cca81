// src/handlers/funnels.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    config::AppState,
    models::pipeline::{AlertConfig, FieldDefinition},
};

// =============================================================================
//  FUNIS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateFunnelPayload {
    #[validate(length(min = 2, message = "O nome deve ter no mínimo 2 caracteres"))]
    pub name: String,
}

// POST /api/funnels
pub async fn create_funnel(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateFunnelPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let funnel = app_state.funnel_service.create_funnel(&payload.name).await?;

    Ok((StatusCode::CREATED, Json(funnel)))
}

// GET /api/funnels
pub async fn list_funnels(
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let funnels = app_state.funnel_service.list_funnels().await?;

    Ok((StatusCode::OK, Json(funnels)))
}

// GET /api/funnels/{funnel_id}
pub async fn get_funnel(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let funnel = app_state.funnel_service.get_funnel(funnel_id).await?;

    Ok((StatusCode::OK, Json(funnel)))
}

// =============================================================================
//  ETAPAS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateStagePayload {
    #[validate(length(min = 2, message = "O nome deve ter no mínimo 2 caracteres"))]
    pub name: String,

    #[serde(default)]
    pub is_win_stage: bool,
    #[serde(default)]
    pub is_loss_stage: bool,

    #[serde(default)]
    pub required_fields: Vec<FieldDefinition>,

    #[serde(default)]
    pub win_reason_required: bool,
    #[serde(default)]
    pub loss_reason_required: bool,
    #[serde(default)]
    pub win_reasons: Vec<String>,
    #[serde(default)]
    pub loss_reasons: Vec<String>,

    #[serde(default)]
    pub required_tasks: Vec<String>,

    pub alert_config: Option<AlertConfig>,
}

// POST /api/funnels/{funnel_id}/stages
pub async fn create_stage(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
    Json(payload): Json<CreateStagePayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let stage = app_state
        .funnel_service
        .create_stage(
            funnel_id,
            &payload.name,
            payload.is_win_stage,
            payload.is_loss_stage,
            &payload.required_fields,
            payload.win_reason_required,
            payload.loss_reason_required,
            &payload.win_reasons,
            &payload.loss_reasons,
            &payload.required_tasks,
            payload.alert_config.as_ref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(stage)))
}

// =============================================================================
//  OPORTUNIDADES
// =============================================================================

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOpportunityPayload {
    #[validate(length(min = 1, message = "O título é obrigatório"))]
    pub title: String,

    pub value: Option<Decimal>,

    pub contact_name: Option<String>,
    #[validate(email(message = "E-mail inválido"))]
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,

    #[serde(default = "empty_object")]
    pub custom_fields: Value,
}

// POST /api/funnels/{funnel_id}/opportunities
pub async fn create_opportunity(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
    Json(payload): Json<CreateOpportunityPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let opportunity = app_state
        .funnel_service
        .create_opportunity(
            funnel_id,
            &payload.title,
            payload.value,
            payload.contact_name.as_deref(),
            payload.contact_email.as_deref(),
            payload.contact_phone.as_deref(),
            &payload.custom_fields,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(opportunity)))
}

// =============================================================================
//  HISTÓRICO
// =============================================================================

// GET /api/opportunities/{opportunity_id}/history
pub async fn list_history(
    State(app_state): State<AppState>,
    Path(opportunity_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let history = app_state.funnel_service.list_history(opportunity_id).await?;

    Ok((StatusCode::OK, Json(history)))
}
