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

pub mod llm;
pub mod template;
pub mod utils;

pub use llm::LlmPlanProposer;
pub use template::TemplateProposer;
pub use utils::extract_json_from_text;

use async_trait::async_trait;
use plan_contracts::{DraftProposal, PlanProposer, ProposalContext, ProposerError, ProposerResult};
use std::sync::Arc;
use tracing::debug;

/// Tries each strategy in order and returns the first draft.
///
/// Cancellation stops the chain immediately; any other failure moves on to the next strategy.
pub struct ChainedProposer {
    strategies: Vec<Arc<dyn PlanProposer>>,
}

impl ChainedProposer {
    pub fn new(strategies: Vec<Arc<dyn PlanProposer>>) -> Self {
        Self { strategies }
    }

    pub fn then(mut self, strategy: Arc<dyn PlanProposer>) -> Self {
        self.strategies.push(strategy);
        self
    }
}

#[async_trait]
impl PlanProposer for ChainedProposer {
    async fn propose(
        &self,
        instruction: &str,
        context: &ProposalContext,
    ) -> ProposerResult<DraftProposal> {
        let mut last_error = ProposerError::Unavailable("no strategies configured".to_string());
        for strategy in &self.strategies {
            match strategy.propose(instruction, context).await {
                Ok(draft) => return Ok(draft),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    debug!(strategy = strategy.name(), error = %e, "Strategy declined");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn name(&self) -> &str {
        "chained"
    }
}
