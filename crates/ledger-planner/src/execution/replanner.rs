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

use super::state::ExecutionState;
use crate::plan::StepStatus;
use serde::{Deserialize, Serialize};

/// Composes the context a proposer needs to plan again after a failure.
pub struct Replanner;

impl Replanner {
    /// One line per completed or failed step: description, outcome and error if any.
    pub fn summarise(state: &ExecutionState) -> String {
        let plan = state.plan();
        plan.steps
            .iter()
            .filter_map(|step| {
                let status = state.status_of(&step.id)?;
                if !matches!(status, StepStatus::Completed | StepStatus::Failed) {
                    return None;
                }
                let line = match state.result_for(&step.id).and_then(|r| r.error.as_deref()) {
                    Some(error) if status == StepStatus::Failed => {
                        format!("- {}: failed ({error})", step.description)
                    }
                    _ if status == StepStatus::Failed => format!("- {}: failed", step.description),
                    _ => format!("- {}: completed", step.description),
                };
                Some(line)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn augmented_instruction(original: &str, summary: &str, reason: &str) -> String {
        let summary = if summary.is_empty() {
            "- (no steps finished)"
        } else {
            summary
        };
        format!(
            "{original}\n\n[Replanning context]\nReason: {reason}\nPrevious progress:\n{summary}\nProduce a revised plan that avoids the failure and completes the request."
        )
    }
}

/// Caps automatic replanning within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplanBudget {
    pub max_replans: u32,
    pub attempted: u32,
}

impl ReplanBudget {
    pub fn new(max_replans: u32) -> Self {
        Self {
            max_replans,
            attempted: 0,
        }
    }

    pub fn can_replan(&self) -> bool {
        self.attempted < self.max_replans
    }

    pub fn record_replan(&mut self) {
        self.attempted = self.attempted.saturating_add(1);
    }
}
