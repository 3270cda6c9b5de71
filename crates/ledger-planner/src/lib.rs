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

pub mod config;
pub mod execution;
pub mod logging;
pub mod orchestration;
pub mod plan;
pub mod risk;
pub mod sourcing;

pub use config::OrchestratorConfig;
pub use execution::{ExecutionError, ExecutionResult, ExecutionState, ReadySet, ReplanBudget};
pub use orchestration::{
    AlwaysTrue, AutoApprove, AutoDecline, ConditionEvaluator, ConfirmationGate,
    OrchestrationError, OrchestrationResult, PlanEvent, PlanEventBus, PlanOrchestrator,
    PlanRecord, RunOutcome,
};
pub use plan::{
    estimate, validate, BuildError, FallbackPlanGenerator, GeneratedBy, Plan, PlanEstimate,
    PlanGraphBuilder, Step, StepKind, StepResult, StepStatus, ValidationResult,
};
pub use plan_contracts::{
    CompletionBackend, DraftProposal, PlanProposer, ProposalContext, ProposedStep,
    ProposerError, RiskPreferences, RiskTier, ToolExecutor, ToolOutcome,
};
pub use risk::{classify_action, RiskPolicy};
pub use sourcing::{ChainedProposer, LlmPlanProposer, TemplateProposer};

use std::path::Path;
use std::sync::Arc;

/// Reads the YAML file when given, otherwise starts from defaults, then applies the environment.
pub fn load_config(path: Option<&Path>) -> OrchestrationResult<OrchestratorConfig> {
    let config = match path {
        Some(path) => OrchestratorConfig::from_file(path)?,
        None => OrchestratorConfig::default(),
    };
    config.apply_env_overrides()
}

pub fn create_orchestrator(
    config: OrchestratorConfig,
    proposer: Option<Arc<dyn PlanProposer>>,
) -> PlanOrchestrator {
    let orchestrator = PlanOrchestrator::new(config);
    match proposer {
        Some(proposer) => orchestrator.with_proposer(proposer),
        None => orchestrator,
    }
}
