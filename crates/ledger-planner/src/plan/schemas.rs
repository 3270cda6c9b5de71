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

use chrono::{DateTime, Utc};
use plan_contracts::{DraftStepKind, RiskTier, ToolOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StepKind {
    Analysis,
    ToolCall,
    Confirmation,
}

impl From<DraftStepKind> for StepKind {
    fn from(kind: DraftStepKind) -> Self {
        match kind {
            DraftStepKind::Analyze | DraftStepKind::Summarize | DraftStepKind::Goal => {
                StepKind::Analysis
            }
            DraftStepKind::ToolCall => StepKind::ToolCall,
            DraftStepKind::Confirm => StepKind::Confirmation,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    /// Transitions only move forward; nothing re-enters `Pending`.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
                | (StepStatus::Running, StepStatus::Skipped)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "Pending"),
            StepStatus::Running => write!(f, "Running"),
            StepStatus::Completed => write!(f, "Completed"),
            StepStatus::Failed => write!(f, "Failed"),
            StepStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    /// Opaque to the orchestrator; handed to a `ConditionEvaluator`.
    pub condition: Option<String>,
    pub requires_confirmation: Option<bool>,
    pub expected_outcome: Option<String>,
    pub risk_tier: Option<RiskTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub description: String,
    pub tool_name: Option<String>,
    pub tool_args: Option<Map<String, Value>>,
    pub dependencies: BTreeSet<String>,
    pub status: StepStatus,
    pub requires_confirmation: bool,
    pub metadata: StepMetadata,
}

impl Step {
    pub fn condition(&self) -> Option<&str> {
        self.metadata
            .condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn depends_on(&self, step_id: &str) -> bool {
        self.dependencies.contains(step_id)
    }

    pub fn is_tool_call(&self) -> bool {
        self.kind == StepKind::ToolCall
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum GeneratedBy {
    #[default]
    #[serde(rename = "ai", alias = "proposer")]
    Proposer,
    #[serde(rename = "fallback")]
    Fallback,
}

impl fmt::Display for GeneratedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratedBy::Proposer => write!(f, "ai"),
            GeneratedBy::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    pub generated_by: GeneratedBy,
    pub original_instruction: String,
    #[serde(default)]
    pub extracted: Option<Map<String, Value>>,
    #[serde(default)]
    pub proposer: Option<String>,
    #[serde(default)]
    pub replan_of: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<Step>,
    pub requires_confirmation: bool,
    pub metadata: PlanMetadata,
}

impl Plan {
    pub fn generate_id() -> String {
        format!(
            "plan_{}_{:08x}",
            Utc::now().timestamp_millis(),
            rand::random::<u32>()
        )
    }

    pub fn step_id(plan_id: &str, index: usize) -> String {
        format!("{plan_id}_step_{index}")
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn dependents_of<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a Step> + 'a {
        self.steps.iter().filter(move |s| s.depends_on(step_id))
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata.generated_by == GeneratedBy::Fallback
    }

    /// Recomputes the plan-level flag from the per-step annotations.
    pub fn refresh_confirmation_flag(&mut self) {
        self.requires_confirmation = self.steps.iter().any(|s| s.requires_confirmation);
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan({}): {} [{} steps, {}]",
            self.id,
            self.description,
            self.steps.len(),
            self.metadata.generated_by
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, result: Option<Value>) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            result,
            error: None,
            duration_ms: None,
        }
    }

    pub fn failure(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn from_outcome(step_id: impl Into<String>, outcome: ToolOutcome) -> Self {
        Self {
            step_id: step_id.into(),
            success: outcome.success,
            result: outcome.result,
            error: outcome.error,
            duration_ms: outcome.duration_ms,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
