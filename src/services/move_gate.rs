// src/services/move_gate.rs
//
// Avaliador de gate: função pura sobre a oportunidade, a etapa destino e as
// definições de campo consultadas no store. Decide se o movimento segue
// direto, pausa para coletar campos, ou pausa para coletar motivo.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{
        board::{MoveClassification, ReasonKind, ReasonRequirement},
        pipeline::{FieldDefinition, FieldType, Opportunity, Stage},
    },
};

// Um valor satisfaz o campo obrigatório?
// Checkbox: só `true` literal conta. Demais tipos: presente e não-nulo.
pub fn satisfied_by_value(field: &FieldDefinition, value: Option<&Value>) -> bool {
    match field.field_type {
        FieldType::Checkbox => value == Some(&Value::Bool(true)),
        _ => value.is_some_and(|v| !v.is_null()),
    }
}

fn satisfied(field: &FieldDefinition, custom_fields: &Value) -> bool {
    let value = custom_fields.as_object().and_then(|obj| obj.get(&field.name));
    satisfied_by_value(field, value)
}

pub fn classify(
    opportunity: &Opportunity,
    source_stage_id: Uuid,
    destination: &Stage,
    required_fields: &[FieldDefinition],
) -> Result<MoveClassification, AppError> {
    // Configuração inconsistente aborta antes de qualquer mutação.
    if destination.is_win_stage && destination.is_loss_stage {
        return Err(AppError::StageFlagConflict);
    }

    // Reposicionamento dentro da mesma etapa: só reordena a lista local,
    // sem checagem de requisitos.
    if source_stage_id == destination.id {
        return Ok(MoveClassification::Direct);
    }

    let missing: Vec<FieldDefinition> = required_fields
        .iter()
        .filter(|f| f.is_required && !satisfied(f, &opportunity.custom_fields))
        .cloned()
        .collect();

    let reason = if destination.is_win_stage && destination.win_reason_required {
        Some(ReasonRequirement {
            kind: ReasonKind::Win,
            allowed: destination.win_reasons.clone(),
        })
    } else if destination.is_loss_stage && destination.loss_reason_required {
        Some(ReasonRequirement {
            kind: ReasonKind::Loss,
            allowed: destination.loss_reasons.clone(),
        })
    } else {
        None
    };

    // "needs-both" vira NeedsFields com o motivo adiado: os diálogos são
    // sequenciais, campos primeiro.
    Ok(match (missing.is_empty(), reason) {
        (true, None) => MoveClassification::Direct,
        (false, reason) => MoveClassification::NeedsFields { missing, reason },
        (true, Some(reason)) => MoveClassification::NeedsReasons { reason },
    })
}

// Valida o TIPO dos valores vindos do diálogo de campos, antes do merge.
// Usa código de erro, não frase: o frontend traduz.
pub fn validate_collected(
    definitions: &[FieldDefinition],
    values: &Map<String, Value>,
) -> Result<(), AppError> {
    let mut errors: HashMap<String, String> = HashMap::new();

    for def in definitions {
        let Some(value) = values.get(&def.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        let valid = match def.field_type {
            FieldType::Number => value.is_number(),
            FieldType::Checkbox => value.is_boolean(),
            FieldType::Text | FieldType::Select => value.is_string(),
            // Validação real de data, espera YYYY-MM-DD.
            FieldType::Date => value
                .as_str()
                .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                .unwrap_or(false),
        };

        if !valid {
            let code = match def.field_type {
                FieldType::Number => "invalid_number",
                FieldType::Date => "invalid_date_format",
                FieldType::Checkbox => "invalid_boolean",
                _ => "invalid_text",
            };
            errors.insert(def.name.clone(), code.to_string());
        }
    }

    if !errors.is_empty() {
        return Err(AppError::CustomFieldErrors(errors));
    }

    Ok(())
}
