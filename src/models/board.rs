// src/models/board.rs
//
// Tipos efêmeros do board: a intenção de drag vinda do frontend, a
// classificação calculada pelo gate e o slot único que segura um movimento
// suspenso enquanto o usuário preenche os diálogos.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::pipeline::{FieldDefinition, Opportunity, Stage};

// --- INTENÇÃO DE DRAG ---

// Union explícita e etiquetada: um `type` desconhecido falha na
// desserialização e vira erro de validação. Nada de assumir oportunidade
// por omissão como o frontend antigo fazia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragKind {
    Stage,
    Opportunity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropPosition {
    pub droppable_id: Uuid,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragResult {
    pub draggable_id: Uuid,
    #[serde(rename = "type")]
    pub kind: DragKind,
    pub source: DropPosition,
    // Ausente = soltou fora de qualquer alvo válido.
    pub destination: Option<DropPosition>,
}

// --- CLASSIFICAÇÃO DO GATE ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonKind {
    Win,
    Loss,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasonRequirement {
    pub kind: ReasonKind,
    pub allowed: Vec<String>,
}

// "needs-both" é representado como `NeedsFields` com o motivo adiado:
// os diálogos são sequenciais, primeiro campos, depois motivo.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveClassification {
    Direct,
    NeedsFields {
        missing: Vec<FieldDefinition>,
        reason: Option<ReasonRequirement>,
    },
    NeedsReasons { reason: ReasonRequirement },
}

// --- MOVIMENTO SUSPENSO ---

// Nunca persistido. Criado pelo gate quando o movimento precisa de dados,
// consumido (ou descartado) pelo executor.
#[derive(Debug, Clone)]
pub struct PendingMove {
    pub opportunity_id: Uuid,
    pub source_stage_id: Uuid,
    pub destination_stage_id: Uuid,
    pub destination_index: usize,
    // Campos ainda não satisfeitos no momento do gate.
    pub missing_fields: Vec<FieldDefinition>,
    // Valores já coletados pelos diálogos.
    pub collected_fields: Map<String, Value>,
    pub reason: Option<ReasonRequirement>,
}

// Máquina de estados composta do board. `GateEvaluating` e `Executing` são
// transientes dentro de uma chamada async e nunca ficam salvos no slot.
#[derive(Debug, Clone, Default)]
pub enum TransitionPhase {
    #[default]
    Idle,
    AwaitingFields(PendingMove),
    AwaitingReasons(PendingMove),
}

// Slot de UMA posição. `set_*` sobrescreve o que houver; `clear` é chamado
// no cancelamento, na conclusão e em qualquer erro terminal, garantindo que
// nenhuma referência velha sobreviva para ser repetida.
#[derive(Debug, Default)]
pub struct PendingSlot {
    phase: TransitionPhase,
}

impl PendingSlot {
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, TransitionPhase::Idle)
    }

    pub fn phase(&self) -> &TransitionPhase {
        &self.phase
    }

    pub fn set_awaiting_fields(&mut self, mv: PendingMove) {
        self.phase = TransitionPhase::AwaitingFields(mv);
    }

    pub fn set_awaiting_reasons(&mut self, mv: PendingMove) {
        self.phase = TransitionPhase::AwaitingReasons(mv);
    }

    // Esvazia o slot devolvendo a fase atual.
    pub fn take(&mut self) -> TransitionPhase {
        std::mem::take(&mut self.phase)
    }

    // Consome o movimento pendente só se estiver na fase esperada; em
    // qualquer outra fase o slot permanece intacto.
    pub fn take_awaiting_fields(&mut self) -> Option<PendingMove> {
        match &self.phase {
            TransitionPhase::AwaitingFields(_) => match std::mem::take(&mut self.phase) {
                TransitionPhase::AwaitingFields(mv) => Some(mv),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn take_awaiting_reasons(&mut self) -> Option<PendingMove> {
        match &self.phase {
            TransitionPhase::AwaitingReasons(_) => match std::mem::take(&mut self.phase) {
                TransitionPhase::AwaitingReasons(mv) => Some(mv),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.phase = TransitionPhase::Idle;
    }
}

// --- DADOS EXTRAS DO EXECUTOR ---

// O que os diálogos de gating coletaram para completar o movimento.
#[derive(Debug, Clone, Default)]
pub struct MoveExtras {
    pub custom_fields: Option<Map<String, Value>>,
    pub win_reason: Option<String>,
    pub loss_reason: Option<String>,
}

impl MoveExtras {
    // Movimento "leve": sem extras, o store recebe só o stage_id.
    pub fn is_empty(&self) -> bool {
        self.custom_fields.is_none() && self.win_reason.is_none() && self.loss_reason.is_none()
    }
}

// --- VISÃO PARA O FRONTEND ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    pub stage: Stage,
    pub opportunities: Vec<Opportunity>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PendingView {
    Idle,
    #[serde(rename_all = "camelCase")]
    AwaitingFields { missing_fields: Vec<FieldDefinition> },
    #[serde(rename_all = "camelCase")]
    AwaitingReason {
        kind: ReasonKind,
        allowed_reasons: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub funnel_id: Uuid,
    pub columns: Vec<BoardColumn>,
    pub pending: PendingView,
}

// O que o dispatcher devolve para a UI depois de um drag (ou navegação
// rápida). `Ignored` cobre o drop fora de alvo e o drop na mesma posição.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MoveOutcome {
    Ignored,
    #[serde(rename_all = "camelCase")]
    Reordered { stages: Vec<Stage> },
    #[serde(rename_all = "camelCase")]
    Completed { opportunity: Opportunity },
    #[serde(rename_all = "camelCase")]
    AwaitingFields { missing_fields: Vec<FieldDefinition> },
    #[serde(rename_all = "camelCase")]
    AwaitingReason {
        kind: ReasonKind,
        allowed_reasons: Vec<String>,
    },
}
