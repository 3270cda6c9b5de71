// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::logging::log_plan_event;
use crate::plan::GeneratedBy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out of plan lifecycle events to any number of observers.
///
/// Emitting never fails; with no subscribers the event is only logged.
#[derive(Debug, Clone)]
pub struct PlanEventBus {
    sender: broadcast::Sender<PlanEvent>,
}

impl PlanEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: PlanEvent) {
        log_plan_event(
            event.name(),
            event.plan_id(),
            serde_json::to_value(&event).unwrap_or_default(),
        );
        if self.sender.send(event).is_err() {
            trace!("No plan event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PlanEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlanEvent {
    PlanGenerated {
        plan_id: String,
        generated_by: GeneratedBy,
        step_count: usize,
        requires_confirmation: bool,
        timestamp: DateTime<Utc>,
    },
    PlanRejected {
        plan_id: String,
        errors: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    FallbackUsed {
        plan_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        plan_id: String,
        step_id: String,
        timestamp: DateTime<Utc>,
    },
    StepFinished {
        plan_id: String,
        step_id: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    StepSkipped {
        plan_id: String,
        step_id: String,
        timestamp: DateTime<Utc>,
    },
    ReplanRequested {
        plan_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    Replanned {
        plan_id: String,
        previous_plan_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlanEvent::PlanGenerated { .. } => "plan_generated",
            PlanEvent::PlanRejected { .. } => "plan_rejected",
            PlanEvent::FallbackUsed { .. } => "fallback_used",
            PlanEvent::StepStarted { .. } => "step_started",
            PlanEvent::StepFinished { .. } => "step_finished",
            PlanEvent::StepSkipped { .. } => "step_skipped",
            PlanEvent::ReplanRequested { .. } => "replan_requested",
            PlanEvent::Replanned { .. } => "replanned",
        }
    }

    pub fn plan_id(&self) -> &str {
        match self {
            PlanEvent::PlanGenerated { plan_id, .. }
            | PlanEvent::PlanRejected { plan_id, .. }
            | PlanEvent::FallbackUsed { plan_id, .. }
            | PlanEvent::StepStarted { plan_id, .. }
            | PlanEvent::StepFinished { plan_id, .. }
            | PlanEvent::StepSkipped { plan_id, .. }
            | PlanEvent::ReplanRequested { plan_id, .. }
            | PlanEvent::Replanned { plan_id, .. } => plan_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PlanEvent::PlanGenerated { timestamp, .. }
            | PlanEvent::PlanRejected { timestamp, .. }
            | PlanEvent::FallbackUsed { timestamp, .. }
            | PlanEvent::StepStarted { timestamp, .. }
            | PlanEvent::StepFinished { timestamp, .. }
            | PlanEvent::StepSkipped { timestamp, .. }
            | PlanEvent::ReplanRequested { timestamp, .. }
            | PlanEvent::Replanned { timestamp, .. } => *timestamp,
        }
    }
}
