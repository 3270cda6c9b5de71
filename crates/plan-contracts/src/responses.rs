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

use crate::types::DraftStepKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A coarse plan proposal: ordered abstract steps referencing earlier steps by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftProposal {
    pub description: String,
    pub steps: Vec<ProposedStep>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub extracted: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedStep {
    #[serde(alias = "type")]
    pub kind: DraftStepKind,
    pub description: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_args: Option<Map<String, Value>>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub requires_confirmation: Option<bool>,
    #[serde(default)]
    pub expected_outcome: Option<String>,
}

impl DraftProposal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            steps: Vec::new(),
            requires_confirmation: false,
            extracted: None,
        }
    }

    pub fn with_step(mut self, step: ProposedStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_extracted(mut self, extracted: Map<String, Value>) -> Self {
        self.extracted = Some(extracted);
        self
    }
}

impl ProposedStep {
    fn of_kind(kind: DraftStepKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            tool_name: None,
            tool_args: None,
            depends_on: Vec::new(),
            condition: None,
            requires_confirmation: None,
            expected_outcome: None,
        }
    }

    pub fn analyze(description: impl Into<String>) -> Self {
        Self::of_kind(DraftStepKind::Analyze, description)
    }

    pub fn summarize(description: impl Into<String>) -> Self {
        Self::of_kind(DraftStepKind::Summarize, description)
    }

    pub fn goal(description: impl Into<String>) -> Self {
        Self::of_kind(DraftStepKind::Goal, description)
    }

    pub fn confirm(description: impl Into<String>) -> Self {
        Self::of_kind(DraftStepKind::Confirm, description)
    }

    pub fn tool_call(
        description: impl Into<String>,
        tool_name: impl Into<String>,
        tool_args: Map<String, Value>,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_args: Some(tool_args),
            ..Self::of_kind(DraftStepKind::ToolCall, description)
        }
    }

    pub fn depends_on(mut self, indices: Vec<usize>) -> Self {
        self.depends_on = indices;
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn requiring_confirmation(mut self, required: bool) -> Self {
        self.requires_confirmation = Some(required);
        self
    }

    pub fn expecting(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = Some(outcome.into());
        self
    }
}

/// What a tool executor reports back for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            duration_ms: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_accepts_type_alias_and_missing_optionals() {
        let draft: DraftProposal = serde_json::from_value(json!({
            "description": "record lunch",
            "steps": [
                {"type": "analyze", "description": "parse"},
                {"kind": "tool_call", "description": "create", "toolName": "create_transaction",
                 "toolArgs": {"amount": 35}, "dependsOn": [0]}
            ]
        }))
        .unwrap();

        assert_eq!(draft.steps.len(), 2);
        assert_eq!(draft.steps[0].kind, DraftStepKind::Analyze);
        assert!(draft.steps[0].depends_on.is_empty());
        assert_eq!(draft.steps[1].depends_on, vec![0]);
        assert!(!draft.requires_confirmation);
    }

    #[test]
    fn unknown_step_kind_is_rejected() {
        let parsed = serde_json::from_value::<ProposedStep>(json!({
            "kind": "teleport",
            "description": "nope"
        }));
        assert!(parsed.is_err());
    }
}
