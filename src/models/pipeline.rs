// src/models/pipeline.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// --- ENUMS ---

// Tipos de campo que uma etapa pode exigir antes de receber uma oportunidade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Checkbox,
    Select,
}

// --- DEFINIÇÕES (O Molde) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String, // Ex: "cpf"
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
}

// Consumido por um alertador externo (oportunidade parada demais na etapa).
// O engine só transporta; nunca interpreta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    pub enabled: bool,
    pub max_days_in_stage: i32,
}

// --- FUNIL E ETAPAS ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Funnel {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// Invariantes: `is_win_stage` e `is_loss_stage` nunca são verdadeiros juntos;
// as posições dentro de um funil formam a permutação contígua 0..n-1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: Uuid,
    pub funnel_id: Uuid,
    pub name: String,
    pub position: i32,
    pub is_win_stage: bool,
    pub is_loss_stage: bool,
    pub required_fields: Vec<FieldDefinition>,
    pub win_reason_required: bool,
    pub loss_reason_required: bool,
    pub win_reasons: Vec<String>,
    pub loss_reasons: Vec<String>,
    pub required_tasks: Vec<String>,
    pub alert_config: Option<AlertConfig>,
    pub created_at: DateTime<Utc>,
}

// --- OPORTUNIDADE (O Dado) ---

// `stage_id` sempre referencia uma etapa do mesmo `funnel_id`.
// `win_reason`/`loss_reason` só são preenchidos ao entrar numa etapa
// terminal que exige motivo.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: Uuid,
    pub funnel_id: Uuid,
    pub stage_id: Uuid,

    pub title: String,
    pub value: Option<Decimal>,

    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,

    // CAMPOS PERSONALIZADOS
    // Aqui vai o { "cpf": "123...", "origem": "indicação" }
    pub custom_fields: Value,

    pub win_reason: Option<String>,
    pub loss_reason: Option<String>,

    // Atualizado a cada mudança de etapa bem-sucedida.
    pub last_stage_change_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- HISTÓRICO ---

// Append-only: criado exatamente uma vez por movimento concluído.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StageHistoryEntry {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    // None = primeira entrada da oportunidade no funil.
    pub from_stage_id: Option<Uuid>,
    pub to_stage_id: Uuid,
    pub moved_at: DateTime<Utc>,
    pub user_id: Option<Uuid>,
}

// Resposta do `get_stage_requirements`: o que o gate consulta antes de
// classificar um movimento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRequirements {
    pub required_fields: Vec<FieldDefinition>,
    pub required_tasks: Vec<String>,
}
