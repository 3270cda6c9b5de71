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

use super::ready_set::ReadySet;
use super::{ExecutionError, ExecutionResult};
use crate::plan::{Plan, Step, StepResult, StepStatus};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Run-time companion to one plan: cursor, step statuses and the append-only result ledger.
///
/// The plan itself is never mutated; statuses live here.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    plan: Arc<Plan>,
    cursor: usize,
    results: IndexMap<String, StepResult>,
    statuses: HashMap<String, StepStatus>,
    ready: ReadySet,
    needs_replanning: bool,
    replan_reason: Option<String>,
    started_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn new(plan: Arc<Plan>) -> Self {
        let statuses = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.status))
            .collect();
        let ready = ReadySet::from_plan(&plan);
        Self {
            plan,
            cursor: 0,
            results: IndexMap::new(),
            statuses,
            ready,
            needs_replanning: false,
            replan_reason: None,
            started_at: Utc::now(),
        }
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.plan.steps.get(self.cursor)
    }

    /// Moves the cursor forward. Once past the end it stays there and keeps returning `None`.
    ///
    /// Dependencies are not re-checked; the linear cursor trusts the builder's ordering.
    pub fn advance(&mut self) -> Option<&Step> {
        if self.cursor < self.plan.steps.len() {
            self.cursor += 1;
        }
        self.current_step()
    }

    pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        self.statuses.get(step_id).copied()
    }

    pub fn transition(&mut self, step_id: &str, next: StepStatus) -> ExecutionResult<()> {
        let current = self
            .statuses
            .get_mut(step_id)
            .ok_or_else(|| ExecutionError::UnknownStep(step_id.to_string()))?;
        if !current.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                step: step_id.to_string(),
                from: *current,
                to: next,
            });
        }
        debug!(step_id, from = %current, to = %next, "Step transition");
        *current = next;
        Ok(())
    }

    /// Appends a result. Each step id may be recorded once.
    pub fn record_result(&mut self, result: StepResult) -> ExecutionResult<()> {
        if self.results.contains_key(&result.step_id) {
            return Err(ExecutionError::DuplicateResult(result.step_id));
        }
        let status = self
            .status_of(&result.step_id)
            .ok_or_else(|| ExecutionError::UnknownStep(result.step_id.clone()))?;
        if status == StepStatus::Pending {
            self.transition(&result.step_id, StepStatus::Running)?;
        }
        let outcome = if result.success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        self.transition(&result.step_id, outcome)?;
        if result.success {
            let unlocked = self.ready.complete(&result.step_id);
            if !unlocked.is_empty() {
                debug!(step_id = %result.step_id, ?unlocked, "Dependents became eligible");
            }
        }
        self.results.insert(result.step_id.clone(), result);
        Ok(())
    }

    /// After a failure, flags replanning when pending steps depend on the failed one.
    ///
    /// Advisory only. Returns the stranded step ids.
    pub fn check_for_stranding(&mut self, result: &StepResult) -> Vec<String> {
        if result.success {
            return Vec::new();
        }
        let stranded: Vec<String> = self
            .plan
            .dependents_of(&result.step_id)
            .filter(|s| self.status_of(&s.id) == Some(StepStatus::Pending))
            .map(|s| s.id.clone())
            .collect();
        if !stranded.is_empty() {
            let failed = self
                .plan
                .step(&result.step_id)
                .map_or(result.step_id.as_str(), |s| s.description.as_str());
            let reason = format!(
                "Step \"{}\" failed ({}); {} dependent step(s) cannot proceed",
                failed,
                result.error.as_deref().unwrap_or("no error detail"),
                stranded.len()
            );
            warn!(step_id = %result.step_id, stranded = stranded.len(), "{reason}");
            self.request_replanning(reason);
        }
        stranded
    }

    pub fn request_replanning(&mut self, reason: impl Into<String>) {
        self.needs_replanning = true;
        self.replan_reason = Some(reason.into());
    }

    pub fn needs_replanning(&self) -> bool {
        self.needs_replanning
    }

    pub fn replan_reason(&self) -> Option<&str> {
        self.replan_reason.as_deref()
    }

    /// Pending steps carrying a condition, for an external evaluator to decide on.
    pub fn list_conditional_pending(&self) -> Vec<&Step> {
        self.plan
            .steps
            .iter()
            .filter(|s| self.status_of(&s.id) == Some(StepStatus::Pending))
            .filter(|s| s.condition().is_some())
            .collect()
    }

    /// Pending steps whose dependencies have all completed, in plan order.
    pub fn ready_steps(&self) -> Vec<&Step> {
        self.ready
            .eligible()
            .filter(|id| self.status_of(id) == Some(StepStatus::Pending))
            .filter_map(|id| self.plan.step(id))
            .collect()
    }

    /// Skips a step and every pending step downstream of it. Returns the skipped ids.
    pub fn skip_with_dependents(&mut self, step_id: &str) -> ExecutionResult<Vec<String>> {
        self.transition(step_id, StepStatus::Skipped)?;
        let mut skipped = vec![step_id.to_string()];
        for dependent in self.ready.transitive_dependents(step_id) {
            if self.status_of(&dependent) == Some(StepStatus::Pending) {
                self.transition(&dependent, StepStatus::Skipped)?;
                skipped.push(dependent);
            }
        }
        Ok(skipped)
    }

    pub fn results(&self) -> &IndexMap<String, StepResult> {
        &self.results
    }

    pub fn result_for(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }

    /// True when no step is pending or running.
    pub fn is_finished(&self) -> bool {
        self.statuses.values().all(|s| s.is_terminal())
    }

    /// Consumes the state, returning the plan and its ledger for archiving.
    pub fn into_record(self) -> (Arc<Plan>, IndexMap<String, StepResult>) {
        (self.plan, self.results)
    }
}
