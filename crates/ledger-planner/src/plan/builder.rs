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

use super::schemas::{GeneratedBy, Plan, PlanMetadata, Step, StepKind, StepMetadata, StepStatus};
use super::{BuildError, BuildResult};
use chrono::Utc;
use plan_contracts::{DraftProposal, ProposedStep};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// Keys whose string values are discriminators and get upper-cased in extracted payloads.
const DISCRIMINATOR_KEYS: &[&str] = &["type", "transactionType", "transaction_type"];

/// Turns draft proposals into plans with stable step ids and resolved dependency edges.
///
/// Input order is taken as given; the builder never reorders steps, so a step may
/// only depend on positions before its own.
pub struct PlanGraphBuilder;

impl PlanGraphBuilder {
    pub fn build(
        draft: &DraftProposal,
        instruction: &str,
        generated_by: GeneratedBy,
    ) -> BuildResult<Plan> {
        Self::build_with_id(Plan::generate_id(), draft, instruction, generated_by)
    }

    /// Builds from an untyped proposal, mapping any shape mismatch to `BuildError::Malformed`.
    pub fn build_from_value(
        value: &Value,
        instruction: &str,
        generated_by: GeneratedBy,
    ) -> BuildResult<Plan> {
        match value.get("steps") {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(BuildError::Malformed("`steps` is not an array".into())),
            None => return Err(BuildError::Malformed("missing `steps`".into())),
        }
        let draft: DraftProposal = serde_json::from_value(value.clone())
            .map_err(|e| BuildError::Malformed(e.to_string()))?;
        Self::build(&draft, instruction, generated_by)
    }

    pub fn build_with_id(
        plan_id: String,
        draft: &DraftProposal,
        instruction: &str,
        generated_by: GeneratedBy,
    ) -> BuildResult<Plan> {
        let len = draft.steps.len();
        let mut steps = Vec::with_capacity(len);

        for (i, proposed) in draft.steps.iter().enumerate() {
            let mut dependencies = BTreeSet::new();
            for &index in &proposed.depends_on {
                if index >= len {
                    return Err(BuildError::DependencyOutOfRange {
                        step: i,
                        index,
                        len,
                    });
                }
                if index >= i {
                    return Err(BuildError::ForwardDependency { step: i, index });
                }
                dependencies.insert(Plan::step_id(&plan_id, index));
            }
            let kind = StepKind::from(proposed.kind);
            if kind == StepKind::ToolCall
                && proposed
                    .tool_name
                    .as_deref()
                    .map_or(true, |name| name.trim().is_empty())
            {
                return Err(BuildError::MissingToolName { index: i });
            }
            steps.push(Self::assemble_step(&plan_id, i, proposed, dependencies));
        }

        let mut metadata = PlanMetadata {
            generated_by,
            original_instruction: instruction.to_string(),
            extracted: draft.extracted.clone().map(normalise_extracted),
            ..Default::default()
        };
        if draft.requires_confirmation {
            metadata
                .extra
                .insert("proposerRequestedConfirmation".into(), Value::Bool(true));
        }

        let mut plan = Plan {
            id: plan_id,
            description: draft.description.clone(),
            created_at: Utc::now(),
            steps,
            requires_confirmation: false,
            metadata,
        };
        plan.refresh_confirmation_flag();
        debug!(plan_id = %plan.id, steps = plan.steps.len(), "Built plan from draft");
        Ok(plan)
    }

    /// Builds a plan where every step depends on the one before it.
    ///
    /// Infallible: the wiring is correct by construction.
    pub fn build_chain(
        description: &str,
        proposed: &[ProposedStep],
        instruction: &str,
        generated_by: GeneratedBy,
    ) -> Plan {
        let plan_id = Plan::generate_id();
        let steps = proposed
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let dependencies = if i == 0 {
                    BTreeSet::new()
                } else {
                    BTreeSet::from([Plan::step_id(&plan_id, i - 1)])
                };
                Self::assemble_step(&plan_id, i, step, dependencies)
            })
            .collect();

        let mut plan = Plan {
            id: plan_id,
            description: description.to_string(),
            created_at: Utc::now(),
            steps,
            requires_confirmation: false,
            metadata: PlanMetadata {
                generated_by,
                original_instruction: instruction.to_string(),
                ..Default::default()
            },
        };
        plan.refresh_confirmation_flag();
        plan
    }

    fn assemble_step(
        plan_id: &str,
        index: usize,
        proposed: &ProposedStep,
        dependencies: BTreeSet<String>,
    ) -> Step {
        let kind = StepKind::from(proposed.kind);
        let (tool_name, tool_args) = if kind == StepKind::ToolCall {
            (
                proposed.tool_name.clone(),
                Some(proposed.tool_args.clone().unwrap_or_default()),
            )
        } else {
            (None, None)
        };
        let requires_confirmation = proposed
            .requires_confirmation
            .unwrap_or(kind == StepKind::Confirmation);

        Step {
            id: Plan::step_id(plan_id, index),
            kind,
            description: proposed.description.clone(),
            tool_name,
            tool_args,
            dependencies,
            status: StepStatus::Pending,
            requires_confirmation,
            metadata: StepMetadata {
                condition: proposed.condition.clone(),
                requires_confirmation: proposed.requires_confirmation,
                expected_outcome: proposed.expected_outcome.clone(),
                risk_tier: None,
            },
        }
    }
}

/// Upper-cases discriminator fields anywhere in the payload.
pub fn normalise_extracted(mut payload: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in payload.iter_mut() {
        normalise_value(key, value);
    }
    payload
}

fn normalise_value(key: &str, value: &mut Value) {
    match value {
        Value::String(s) if DISCRIMINATOR_KEYS.contains(&key) => {
            *s = s.to_uppercase();
        }
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                normalise_value(k, v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                if let Value::Object(map) = item {
                    for (k, v) in map.iter_mut() {
                        normalise_value(k, v);
                    }
                }
            }
        }
        _ => {}
    }
}
