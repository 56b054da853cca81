use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

// Nosso tipo de erro, com `thiserror` para melhor ergonomia.
// A taxonomia segue as três famílias do engine: erros de gate/validação
// abortam o movimento antes de qualquer mutação; erros de persistência
// disparam a reconciliação (refetch); erros de efeito colateral nunca
// chegam aqui, o worker da fila só loga.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Funil não encontrado")]
    FunnelNotFound,

    #[error("Etapa não encontrada")]
    StageNotFound,

    #[error("Oportunidade não encontrada")]
    OpportunityNotFound,

    #[error("Etapa marcada como ganho e perda ao mesmo tempo")]
    StageFlagConflict,

    // Mapa: chave do campo -> código do erro (ex: "cpf" -> "required",
    // "valor" -> "invalid_number")
    #[error("Erros nos campos personalizados")]
    CustomFieldErrors(HashMap<String, String>),

    #[error("Motivo inválido: {0}")]
    InvalidReason(String),

    // Já existe um movimento suspenso aguardando dados do usuário.
    #[error("Já existe um movimento em andamento")]
    MoveInProgress,

    #[error("Nenhum movimento pendente")]
    NoPendingMove,

    // O resultado do drag não bate com o estado atual do board
    // (ex: índice de etapa desatualizado).
    #[error("Resultado de drag inconsistente: {0}")]
    StaleDragResult(String),

    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    // Variante genérica para qualquer outro erro inesperado.
    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            // Retorna todos os detalhes da validação.
            AppError::ValidationError(errors) => {
                let mut details = HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<String> = field_errors
                        .iter()
                        .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                let body = Json(json!({
                    "error": "Um ou mais campos são inválidos.",
                    "details": details,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            // O frontend usa o mapa para montar o diálogo de campos pendentes.
            AppError::CustomFieldErrors(fields) => {
                let body = Json(json!({
                    "error": "Um ou mais campos personalizados são inválidos.",
                    "details": fields,
                }));
                return (StatusCode::UNPROCESSABLE_ENTITY, body).into_response();
            }
            AppError::FunnelNotFound => (StatusCode::NOT_FOUND, "Funil não encontrado."),
            AppError::StageNotFound => (StatusCode::NOT_FOUND, "Etapa não encontrada."),
            AppError::OpportunityNotFound => {
                (StatusCode::NOT_FOUND, "Oportunidade não encontrada.")
            }
            AppError::StageFlagConflict => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Uma etapa não pode ser de ganho e de perda ao mesmo tempo.",
            ),
            AppError::InvalidReason(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "O motivo informado não está entre os permitidos para esta etapa.",
            ),
            AppError::MoveInProgress => (
                StatusCode::CONFLICT,
                "Já existe um movimento aguardando dados. Conclua ou cancele antes de arrastar de novo.",
            ),
            AppError::NoPendingMove => {
                (StatusCode::CONFLICT, "Não há movimento pendente para concluir.")
            }
            AppError::StaleDragResult(_) => (
                StatusCode::CONFLICT,
                "O board mudou desde o início do arrasto. Recarregue e tente de novo.",
            ),

            // Todos os outros erros (DatabaseError, InternalServerError) viram 500.
            // O `tracing` loga a mensagem detalhada que `thiserror` nos deu.
            ref e => {
                tracing::error!("Erro Interno do Servidor: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Ocorreu um erro inesperado.")
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
