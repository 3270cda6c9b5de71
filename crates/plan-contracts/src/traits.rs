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

use crate::requests::{CompletionRequest, ProposalContext};
use crate::responses::{DraftProposal, ToolOutcome};
use crate::types::ProposerResult;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Turns free-form instructions into draft proposals.
#[async_trait]
pub trait PlanProposer: Send + Sync {
    async fn propose(
        &self,
        instruction: &str,
        context: &ProposalContext,
    ) -> ProposerResult<DraftProposal>;

    fn name(&self) -> &str;
}

/// Performs a named action. Argument validation belongs to the implementor.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, args: &Map<String, Value>) -> ToolOutcome;
}

/// Raw text completion, used by model-backed proposers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> ProposerResult<String>;
}
