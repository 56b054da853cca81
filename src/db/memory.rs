// src/db/memory.rs
//
// Fakes em memória dos contratos do store, usados pelos testes do engine.
// `fail_persistence`/`fail_requirements` injetam falha para exercitar os
// caminhos de rollback e de aborto do gate.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;
use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{EntityKind, EventKind, EventSink, HistorySink, OpportunityUpdate, PipelineStore},
    models::pipeline::{Opportunity, Stage, StageHistoryEntry, StageRequirements},
};

#[derive(Default)]
pub struct MemoryStore {
    stages: Mutex<Vec<Stage>>,
    opportunities: Mutex<Vec<Opportunity>>,
    pub history: Mutex<Vec<StageHistoryEntry>>,
    fail_persistence: AtomicBool,
    fail_requirements: AtomicBool,
    // Quantos updates de posição chegaram ao store (para o teste de
    // reordenação idempotente).
    pub position_updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new(stages: Vec<Stage>, opportunities: Vec<Opportunity>) -> Self {
        Self {
            stages: Mutex::new(stages),
            opportunities: Mutex::new(opportunities),
            ..Default::default()
        }
    }

    pub fn set_fail_persistence(&self, fail: bool) {
        self.fail_persistence.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_requirements(&self, fail: bool) {
        self.fail_requirements.store(fail, Ordering::SeqCst);
    }

    fn check_persistence(&self) -> Result<(), AppError> {
        if self.fail_persistence.load(Ordering::SeqCst) {
            return Err(AppError::InternalServerError(anyhow!(
                "falha de persistência injetada"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn get_stage_by_id(&self, id: Uuid) -> Result<Stage, AppError> {
        self.stages
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(AppError::StageNotFound)
    }

    async fn list_stages_by_funnel(&self, funnel_id: Uuid) -> Result<Vec<Stage>, AppError> {
        // Devolve invertido de propósito: o contrato não garante ordenação e
        // quem consome precisa ordenar por `position`.
        let mut stages: Vec<Stage> = self
            .stages
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.funnel_id == funnel_id)
            .cloned()
            .collect();
        stages.reverse();
        Ok(stages)
    }

    async fn list_opportunities_by_funnel(
        &self,
        funnel_id: Uuid,
    ) -> Result<Vec<Opportunity>, AppError> {
        Ok(self
            .opportunities
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.funnel_id == funnel_id)
            .cloned()
            .collect())
    }

    async fn update_stage_position(&self, id: Uuid, position: i32) -> Result<Stage, AppError> {
        self.check_persistence()?;
        self.position_updates.fetch_add(1, Ordering::SeqCst);

        let mut stages = self.stages.lock().unwrap();
        let stage = stages
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(AppError::StageNotFound)?;
        stage.position = position;
        Ok(stage.clone())
    }

    async fn update_opportunity(
        &self,
        id: Uuid,
        update: OpportunityUpdate,
    ) -> Result<Opportunity, AppError> {
        self.check_persistence()?;

        let mut opportunities = self.opportunities.lock().unwrap();
        let opportunity = opportunities
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(AppError::OpportunityNotFound)?;

        if let Some(stage_id) = update.stage_id {
            opportunity.stage_id = stage_id;
            opportunity.last_stage_change_at = Utc::now();
        }
        if let Some(custom_fields) = update.custom_fields {
            opportunity.custom_fields = custom_fields;
        }
        if let Some(win_reason) = update.win_reason {
            opportunity.win_reason = Some(win_reason);
        }
        if let Some(loss_reason) = update.loss_reason {
            opportunity.loss_reason = Some(loss_reason);
        }
        opportunity.updated_at = Utc::now();

        Ok(opportunity.clone())
    }

    async fn move_opportunity(
        &self,
        id: Uuid,
        destination_stage_id: Uuid,
    ) -> Result<Opportunity, AppError> {
        self.check_persistence()?;

        let mut opportunities = self.opportunities.lock().unwrap();
        let opportunity = opportunities
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(AppError::OpportunityNotFound)?;

        opportunity.stage_id = destination_stage_id;
        opportunity.last_stage_change_at = Utc::now();
        opportunity.updated_at = Utc::now();

        Ok(opportunity.clone())
    }

    async fn get_stage_requirements(
        &self,
        stage_id: Uuid,
    ) -> Result<StageRequirements, AppError> {
        if self.fail_requirements.load(Ordering::SeqCst) {
            return Err(AppError::InternalServerError(anyhow!(
                "falha de consulta de requisitos injetada"
            )));
        }

        let stage = self.get_stage_by_id(stage_id).await?;
        Ok(StageRequirements {
            required_fields: stage.required_fields,
            required_tasks: stage.required_tasks,
        })
    }
}

#[async_trait]
impl HistorySink for MemoryStore {
    async fn record_move(
        &self,
        opportunity_id: Uuid,
        from_stage_id: Option<Uuid>,
        to_stage_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<StageHistoryEntry, AppError> {
        let entry = StageHistoryEntry {
            id: Uuid::new_v4(),
            opportunity_id,
            from_stage_id,
            to_stage_id,
            moved_at: Utc::now(),
            user_id,
        };
        self.history.lock().unwrap().push(entry.clone());
        Ok(entry)
    }
}

// Sink de eventos que só grava o que recebeu, para inspeção nos testes.
#[derive(Default)]
pub struct RecordingEvents {
    pub delivered: Mutex<Vec<(EntityKind, Uuid, EventKind, Value)>>,
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn deliver(
        &self,
        entity_type: EntityKind,
        entity_id: Uuid,
        event: EventKind,
        payload: &Value,
    ) -> Result<(), AppError> {
        self.delivered
            .lock()
            .unwrap()
            .push((entity_type, entity_id, event, payload.clone()));
        Ok(())
    }
}
