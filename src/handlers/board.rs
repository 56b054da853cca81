// src/handlers/board.rs
//
// Superfície HTTP do board. O `DragResult` chega cru do frontend de
// drag-and-drop; um `type` desconhecido falha na desserialização do axum e
// nunca alcança o engine.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::{common::error::AppError, config::AppState, models::board::DragResult};

// GET /api/funnels/{funnel_id}/board
pub async fn get_board(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = app_state.board_service.snapshot(funnel_id).await?;

    Ok((StatusCode::OK, Json(snapshot)))
}

// POST /api/funnels/{funnel_id}/drag
pub async fn drag(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
    Json(drag): Json<DragResult>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = app_state.board_service.handle_drag(funnel_id, drag).await?;

    Ok((StatusCode::OK, Json(outcome)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFieldsPayload {
    pub values: Map<String, Value>,
}

// POST /api/funnels/{funnel_id}/pending/fields
pub async fn submit_fields(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
    Json(payload): Json<PendingFieldsPayload>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = app_state
        .board_service
        .submit_fields(funnel_id, payload.values)
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PendingReasonPayload {
    #[validate(length(min = 1, message = "O motivo é obrigatório"))]
    pub reason: String,
}

// POST /api/funnels/{funnel_id}/pending/reason
pub async fn submit_reason(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
    Json(payload): Json<PendingReasonPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let outcome = app_state
        .board_service
        .submit_reason(funnel_id, payload.reason)
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}

// DELETE /api/funnels/{funnel_id}/pending
pub async fn cancel_pending(
    State(app_state): State<AppState>,
    Path(funnel_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    app_state.board_service.cancel_pending(funnel_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOpportunityPayload {
    pub destination_stage_id: Uuid,
}

// POST /api/funnels/{funnel_id}/opportunities/{opportunity_id}/move
// Navegação rápida: move sem drag, anexando ao fim da etapa destino.
pub async fn move_opportunity(
    State(app_state): State<AppState>,
    Path((funnel_id, opportunity_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<MoveOpportunityPayload>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = app_state
        .board_service
        .request_move(funnel_id, opportunity_id, payload.destination_stage_id)
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}
