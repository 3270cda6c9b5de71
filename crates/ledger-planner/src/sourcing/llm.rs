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

use super::utils::extract_json_from_text;
use async_trait::async_trait;
use plan_contracts::{
    CompletionBackend, CompletionRequest, DraftProposal, PlanProposer, ProposalContext,
    ProposerError, ProposerResult,
};
use serde_json::Value;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = r#"You are the planning component of a personal bookkeeping assistant.
Turn the user's request into an execution plan. Your ONLY output must be a single JSON object:

{
  "description": "<one line summary>",
  "requiresConfirmation": <bool>,
  "extracted": { <any structured fields you parsed, e.g. amount, type, date> },
  "steps": [
    {
      "kind": "analyze" | "tool_call" | "confirm" | "summarize" | "goal",
      "description": "<what this step does>",
      "toolName": "<one of the available actions, tool_call only>",
      "toolArgs": { <arguments, tool_call only> },
      "dependsOn": [<0-based positions of earlier steps>],
      "condition": "<optional condition>",
      "requiresConfirmation": <optional bool>
    }
  ]
}

Rules:
1. Steps must be listed so that every step comes after the steps it depends on.
2. Only use tool names from the available actions list.
3. Put a "confirm" step before anything that deletes or overwrites data."#;

/// Proposer backed by a text completion model.
pub struct LlmPlanProposer<B: CompletionBackend> {
    backend: B,
    name: String,
}

impl<B: CompletionBackend> LlmPlanProposer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            name: "llm".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn render_prompt(instruction: &str, context: &ProposalContext) -> String {
        let mut prompt = String::new();
        if !context.available_actions.is_empty() {
            prompt.push_str("AVAILABLE ACTIONS:\n");
            for action in &context.available_actions {
                prompt.push_str("- ");
                prompt.push_str(action);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        if let Some(past) = context.past_results_summary.as_deref() {
            prompt.push_str("RESULTS SO FAR:\n");
            prompt.push_str(past);
            prompt.push_str("\n\n");
        }
        prompt.push_str("USER REQUEST:\n");
        prompt.push_str(instruction);
        prompt
    }

    fn parse_completion(text: &str) -> ProposerResult<DraftProposal> {
        let mut value = extract_json_from_text(text)?;
        // Some models wrap the answer as {"plan": {...}}.
        if value.get("steps").is_none() {
            if let Some(inner) = value.get_mut("plan").map(Value::take) {
                value = inner;
            }
        }
        if !value.get("steps").is_some_and(Value::is_array) {
            return Err(ProposerError::Malformed(
                "completion has no `steps` array".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl<B: CompletionBackend> PlanProposer for LlmPlanProposer<B> {
    async fn propose(
        &self,
        instruction: &str,
        context: &ProposalContext,
    ) -> ProposerResult<DraftProposal> {
        let request = CompletionRequest::new(Self::render_prompt(instruction, context))
            .with_system_prompt(SYSTEM_PROMPT);
        let completion = self.backend.complete(&request).await?;
        debug!(chars = completion.len(), "Received plan completion");
        Self::parse_completion(&completion).inspect_err(|e| {
            warn!(error = %e, "Completion did not contain a usable proposal");
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
