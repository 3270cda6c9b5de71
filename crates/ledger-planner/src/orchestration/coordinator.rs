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

use super::event_system::{PlanEvent, PlanEventBus};
use super::gates::{ConditionEvaluator, ConfirmationGate};
use crate::config::OrchestratorConfig;
use crate::execution::{ExecutionResult, ExecutionState, ReplanBudget, Replanner};
use crate::logging::{log_replan, log_step_result, log_validation_failure};
use crate::plan::{
    validate, FallbackPlanGenerator, GeneratedBy, Plan, PlanGraphBuilder, Step, StepKind,
    StepResult, StepStatus, ValidationResult,
};
use crate::risk::RiskPolicy;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use plan_contracts::{
    DraftProposal, PlanProposer, ProposalContext, ProposerError, ProposerResult, ToolExecutor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a call to [`PlanOrchestrator::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step reached a terminal status. `failed` counts failures that stranded nothing.
    Completed {
        plan_id: String,
        failed: usize,
        replans: u32,
    },
    Declined {
        step_id: String,
    },
    /// Dependents of a failed step cannot run and no successor plan was produced.
    Stranded {
        reason: String,
    },
    /// Stranded again after the replan budget was spent.
    Exhausted {
        reason: String,
        replans: u32,
    },
    /// No execution state was installed.
    Idle,
}

/// A superseded plan and its result ledger.
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub plan: Arc<Plan>,
    pub results: IndexMap<String, StepResult>,
    pub superseded_by: Option<String>,
    pub archived_at: DateTime<Utc>,
}

struct WaveSnapshot {
    plan: Arc<Plan>,
    ready: Vec<Step>,
    needs_replanning: bool,
    reason: Option<String>,
    finished: bool,
    failed: usize,
}

pub struct PlanOrchestrator {
    config: OrchestratorConfig,
    risk_policy: RiskPolicy,
    proposer: Option<Arc<dyn PlanProposer>>,
    state: Arc<RwLock<Option<ExecutionState>>>,
    history: Arc<RwLock<Vec<PlanRecord>>>,
    events: PlanEventBus,
}

impl PlanOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let risk_policy = config.risk_policy();
        let events = PlanEventBus::new(config.event_capacity);
        info!(
            max_replans = config.max_replans,
            parallel_dispatch = config.parallel_dispatch,
            proposer_timeout_secs = config.proposer_timeout_secs,
            "Plan orchestrator initialised"
        );
        Self {
            config,
            risk_policy,
            proposer: None,
            state: Arc::new(RwLock::new(None)),
            history: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    pub fn with_proposer(mut self, proposer: Arc<dyn PlanProposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn risk_policy(&self) -> &RiskPolicy {
        &self.risk_policy
    }

    pub fn has_proposer(&self) -> bool {
        self.proposer.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.events.subscribe()
    }

    /// Produces a risk-annotated plan for `instruction`.
    ///
    /// Proposer failures, timeouts, build errors and validation failures all
    /// end in the fallback plan; this never fails.
    pub async fn generate_plan(&self, instruction: &str) -> Plan {
        let context = self.proposal_context(None);
        match self
            .source_plan(instruction, instruction, &context, None)
            .await
        {
            Some(plan) => plan,
            None => self.fallback_plan(instruction, "proposer cancelled its own request"),
        }
    }

    /// Like [`generate_plan`](Self::generate_plan), but returns `None` once `cancel` fires.
    pub async fn generate_plan_with_cancel(
        &self,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> Option<Plan> {
        let context = self.proposal_context(None);
        self.source_plan(instruction, instruction, &context, Some(cancel))
            .await
    }

    pub fn validate_plan(&self, plan: &Plan) -> ValidationResult {
        let validation = validate(plan);
        if !validation.valid {
            log_validation_failure(&plan.id, &validation);
        }
        validation
    }

    /// Installs a fresh execution state at cursor 0. Any previous state is archived.
    pub async fn init_execution_state(&self, plan: Plan) -> Arc<Plan> {
        let plan = Arc::new(plan);
        let mut guard = self.state.write().await;
        if let Some(previous) = guard.take() {
            self.archive(previous, Some(plan.id.clone())).await;
        }
        *guard = Some(ExecutionState::new(Arc::clone(&plan)));
        info!(plan_id = %plan.id, steps = plan.steps.len(), "Execution state initialised");
        plan
    }

    pub async fn active_plan(&self) -> Option<Arc<Plan>> {
        let guard = self.state.read().await;
        guard.as_ref().map(|state| Arc::clone(state.plan()))
    }

    pub async fn current_step(&self) -> Option<Step> {
        let guard = self.state.read().await;
        guard.as_ref()?.current_step().cloned()
    }

    pub async fn advance(&self) -> Option<Step> {
        let mut guard = self.state.write().await;
        match guard.as_mut() {
            Some(state) => state.advance().cloned(),
            None => {
                warn!("advance called without an active plan");
                None
            }
        }
    }

    /// Appends to the active ledger and runs stranding detection on failures.
    ///
    /// Without an active plan this is a logged no-op.
    pub async fn record_result(&self, result: StepResult) -> ExecutionResult<()> {
        let mut guard = self.state.write().await;
        let Some(state) = guard.as_mut() else {
            warn!(step_id = %result.step_id, "record_result called without an active plan; ignoring");
            return Ok(());
        };
        let plan_id = state.plan().id.clone();
        if let Err(e) = state.record_result(result.clone()) {
            warn!(plan_id = %plan_id, error = %e, "Rejected step result");
            return Err(e);
        }
        log_step_result(&plan_id, &result);
        self.events.emit(PlanEvent::StepFinished {
            plan_id: plan_id.clone(),
            step_id: result.step_id.clone(),
            success: result.success,
            timestamp: Utc::now(),
        });

        if !result.success && !state.check_for_stranding(&result).is_empty() {
            let reason = state.replan_reason().unwrap_or_default().to_string();
            self.events.emit(PlanEvent::ReplanRequested {
                plan_id,
                reason,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    pub async fn needs_replanning(&self) -> bool {
        let guard = self.state.read().await;
        guard.as_ref().is_some_and(ExecutionState::needs_replanning)
    }

    pub async fn replan_reason(&self) -> Option<String> {
        let guard = self.state.read().await;
        guard.as_ref()?.replan_reason().map(String::from)
    }

    pub async fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        let guard = self.state.read().await;
        guard.as_ref()?.status_of(step_id)
    }

    pub async fn results(&self) -> IndexMap<String, StepResult> {
        let guard = self.state.read().await;
        guard
            .as_ref()
            .map(|state| state.results().clone())
            .unwrap_or_default()
    }

    pub async fn list_conditional_pending(&self) -> Vec<Step> {
        let guard = self.state.read().await;
        guard
            .as_ref()
            .map(|state| {
                state
                    .list_conditional_pending()
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Skips a pending step and everything downstream of it.
    pub async fn skip_step(&self, step_id: &str) -> ExecutionResult<Vec<String>> {
        let mut guard = self.state.write().await;
        let Some(state) = guard.as_mut() else {
            warn!(step_id, "skip_step called without an active plan; ignoring");
            return Ok(Vec::new());
        };
        let plan_id = state.plan().id.clone();
        let skipped = state.skip_with_dependents(step_id)?;
        for id in &skipped {
            self.events.emit(PlanEvent::StepSkipped {
                plan_id: plan_id.clone(),
                step_id: id.clone(),
                timestamp: Utc::now(),
            });
        }
        debug!(plan_id = %plan_id, skipped = skipped.len(), "Skipped steps");
        Ok(skipped)
    }

    pub async fn history(&self) -> Vec<PlanRecord> {
        self.history.read().await.clone()
    }

    /// Replaces the active plan with a successor built from its progress so far.
    ///
    /// Returns `None` without an active plan or a configured proposer.
    pub async fn replan(&self, reason: &str) -> Option<Arc<Plan>> {
        self.replan_inner(reason, None).await
    }

    /// Like [`replan`](Self::replan); a cancelled call leaves the active plan in place.
    pub async fn replan_with_cancel(
        &self,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Option<Arc<Plan>> {
        self.replan_inner(reason, Some(cancel)).await
    }

    /// Drives the active plan until every step is terminal or the run cannot continue.
    pub async fn run(
        &self,
        executor: &dyn ToolExecutor,
        gate: &dyn ConfirmationGate,
        evaluator: &dyn ConditionEvaluator,
    ) -> ExecutionResult<RunOutcome> {
        let mut budget = ReplanBudget::new(self.config.max_replans);
        loop {
            let Some(snapshot) = self.snapshot().await else {
                warn!("run called without an active plan");
                return Ok(RunOutcome::Idle);
            };

            if snapshot.needs_replanning {
                let reason = snapshot
                    .reason
                    .unwrap_or_else(|| "replanning requested".to_string());
                if self.proposer.is_none() {
                    return Ok(RunOutcome::Stranded { reason });
                }
                if !budget.can_replan() {
                    warn!(plan_id = %snapshot.plan.id, replans = budget.attempted, "Replan budget exhausted");
                    return Ok(RunOutcome::Exhausted {
                        reason,
                        replans: budget.attempted,
                    });
                }
                budget.record_replan();
                match self.replan(&reason).await {
                    Some(_) => continue,
                    None => return Ok(RunOutcome::Stranded { reason }),
                }
            }

            if snapshot.ready.is_empty() {
                if snapshot.finished {
                    info!(plan_id = %snapshot.plan.id, failed = snapshot.failed, "Plan run completed");
                    return Ok(RunOutcome::Completed {
                        plan_id: snapshot.plan.id.clone(),
                        failed: snapshot.failed,
                        replans: budget.attempted,
                    });
                }
                return Ok(RunOutcome::Stranded {
                    reason: format!("Plan {} has pending steps but none can run", snapshot.plan.id),
                });
            }

            let mut dispatch = Vec::new();
            for step in snapshot.ready {
                if let Some(condition) = step.condition() {
                    if !evaluator.evaluate(&step, condition) {
                        debug!(step_id = %step.id, condition, "Condition false");
                        self.skip_step(&step.id).await?;
                        continue;
                    }
                }
                match step.kind {
                    StepKind::Analysis => {
                        self.record_result(StepResult::success(&step.id, None))
                            .await?;
                    }
                    StepKind::Confirmation => {
                        if !self.confirm(gate, &snapshot.plan, &step).await? {
                            return Ok(RunOutcome::Declined { step_id: step.id });
                        }
                        self.record_result(StepResult::success(
                            &step.id,
                            Some(json!({ "confirmed": true })),
                        ))
                        .await?;
                    }
                    StepKind::ToolCall => {
                        if step.requires_confirmation
                            && !covered_by_confirmation(&snapshot.plan, &step)
                            && !self.confirm(gate, &snapshot.plan, &step).await?
                        {
                            return Ok(RunOutcome::Declined { step_id: step.id });
                        }
                        dispatch.push(step);
                    }
                }
            }

            if self.config.parallel_dispatch {
                for step in &dispatch {
                    self.mark_running(&step.id).await?;
                }
                let results = join_all(dispatch.iter().map(|step| execute_tool(executor, step))).await;
                for result in results {
                    self.record_result(result).await?;
                }
            } else {
                for step in &dispatch {
                    self.mark_running(&step.id).await?;
                    let result = execute_tool(executor, step).await;
                    let failed = !result.success;
                    self.record_result(result).await?;
                    if failed && self.needs_replanning().await {
                        break;
                    }
                }
            }
        }
    }

    async fn snapshot(&self) -> Option<WaveSnapshot> {
        let guard = self.state.read().await;
        let state = guard.as_ref()?;
        Some(WaveSnapshot {
            plan: Arc::clone(state.plan()),
            ready: state.ready_steps().into_iter().cloned().collect(),
            needs_replanning: state.needs_replanning(),
            reason: state.replan_reason().map(String::from),
            finished: state.is_finished(),
            failed: state.count_with_status(StepStatus::Failed),
        })
    }

    async fn confirm(
        &self,
        gate: &dyn ConfirmationGate,
        plan: &Plan,
        step: &Step,
    ) -> ExecutionResult<bool> {
        let approved = gate.confirm(plan, step).await;
        if approved {
            debug!(step_id = %step.id, "Confirmation approved");
        } else {
            info!(plan_id = %plan.id, step_id = %step.id, "Confirmation declined; halting run");
            self.skip_step(&step.id).await?;
        }
        Ok(approved)
    }

    async fn mark_running(&self, step_id: &str) -> ExecutionResult<()> {
        let mut guard = self.state.write().await;
        let Some(state) = guard.as_mut() else {
            return Ok(());
        };
        state.transition(step_id, StepStatus::Running)?;
        self.events.emit(PlanEvent::StepStarted {
            plan_id: state.plan().id.clone(),
            step_id: step_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn replan_inner(
        &self,
        reason: &str,
        cancel: Option<&CancellationToken>,
    ) -> Option<Arc<Plan>> {
        let (previous_id, original, summary, flagged) = {
            let guard = self.state.read().await;
            let Some(state) = guard.as_ref() else {
                warn!("replan requested without an active plan");
                return None;
            };
            (
                state.plan().id.clone(),
                state.plan().metadata.original_instruction.clone(),
                Replanner::summarise(state),
                state.needs_replanning(),
            )
        };
        if self.proposer.is_none() {
            warn!(plan_id = %previous_id, "No plan proposer configured; cannot replan");
            return None;
        }
        if !flagged {
            self.events.emit(PlanEvent::ReplanRequested {
                plan_id: previous_id.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        }

        let prompt = Replanner::augmented_instruction(&original, &summary, reason);
        let context = self.proposal_context(Some(summary));
        let mut plan = self
            .source_plan(&prompt, &original, &context, cancel)
            .await?;
        plan.metadata.replan_of = Some(previous_id.clone());

        let plan = self.init_execution_state(plan).await;
        log_replan(&previous_id, &plan.id, reason);
        self.events.emit(PlanEvent::Replanned {
            plan_id: plan.id.clone(),
            previous_plan_id: previous_id,
            timestamp: Utc::now(),
        });
        Some(plan)
    }

    /// Proposer, builder, validator, then risk annotation. `None` only when cancelled.
    async fn source_plan(
        &self,
        prompt: &str,
        original: &str,
        context: &ProposalContext,
        cancel: Option<&CancellationToken>,
    ) -> Option<Plan> {
        let Some(proposer) = self.proposer.as_deref() else {
            return Some(self.fallback_plan(original, "no plan proposer configured"));
        };

        let draft = match self.call_proposer(proposer, prompt, context, cancel).await {
            Ok(draft) => draft,
            Err(e) if !e.is_recoverable() => {
                info!(proposer = proposer.name(), "Plan generation cancelled");
                return None;
            }
            Err(e) => {
                warn!(proposer = proposer.name(), error = %e, "Plan proposer failed");
                return Some(self.fallback_plan(original, &e.to_string()));
            }
        };

        let mut plan = match PlanGraphBuilder::build(&draft, original, GeneratedBy::Proposer) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(proposer = proposer.name(), error = %e, "Draft proposal could not be built");
                return Some(self.fallback_plan(original, &e.to_string()));
            }
        };
        plan.metadata.proposer = Some(proposer.name().to_string());

        let validation = validate(&plan);
        if !validation.valid {
            log_validation_failure(&plan.id, &validation);
            self.events.emit(PlanEvent::PlanRejected {
                plan_id: plan.id.clone(),
                errors: validation.errors,
                timestamp: Utc::now(),
            });
            return Some(self.fallback_plan(original, "proposed plan failed validation"));
        }

        Some(self.finalise(plan))
    }

    async fn call_proposer(
        &self,
        proposer: &dyn PlanProposer,
        prompt: &str,
        context: &ProposalContext,
        cancel: Option<&CancellationToken>,
    ) -> ProposerResult<DraftProposal> {
        let seconds = self.config.proposer_timeout_secs;
        let bounded = async {
            tokio::time::timeout(Duration::from_secs(seconds), proposer.propose(prompt, context))
                .await
                .unwrap_or(Err(ProposerError::Timeout { seconds }))
        };
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ProposerError::Cancelled),
                result = bounded => result,
            },
            None => bounded.await,
        }
    }

    fn fallback_plan(&self, instruction: &str, reason: &str) -> Plan {
        let plan = FallbackPlanGenerator::generate(instruction);
        self.events.emit(PlanEvent::FallbackUsed {
            plan_id: plan.id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.finalise(plan)
    }

    fn finalise(&self, mut plan: Plan) -> Plan {
        self.risk_policy.annotate(&mut plan);
        info!(
            plan_id = %plan.id,
            generated_by = %plan.metadata.generated_by,
            steps = plan.steps.len(),
            requires_confirmation = plan.requires_confirmation,
            "Plan generated"
        );
        self.events.emit(PlanEvent::PlanGenerated {
            plan_id: plan.id.clone(),
            generated_by: plan.metadata.generated_by,
            step_count: plan.steps.len(),
            requires_confirmation: plan.requires_confirmation,
            timestamp: Utc::now(),
        });
        plan
    }

    fn proposal_context(&self, past_results: Option<String>) -> ProposalContext {
        let context = ProposalContext::new(self.config.available_actions.clone());
        match past_results {
            Some(summary) => context.with_past_results(summary),
            None => context,
        }
    }

    async fn archive(&self, state: ExecutionState, superseded_by: Option<String>) {
        let (plan, results) = state.into_record();
        debug!(plan_id = %plan.id, results = results.len(), "Archiving plan");
        self.history.write().await.push(PlanRecord {
            plan,
            results,
            superseded_by,
            archived_at: Utc::now(),
        });
    }
}

/// A tool call directly behind a Confirmation step was already approved there.
fn covered_by_confirmation(plan: &Plan, step: &Step) -> bool {
    step.dependencies
        .iter()
        .filter_map(|id| plan.step(id))
        .any(|dep| dep.kind == StepKind::Confirmation)
}

async fn execute_tool(executor: &dyn ToolExecutor, step: &Step) -> StepResult {
    let Some(tool_name) = step.tool_name.as_deref() else {
        return StepResult::failure(&step.id, "tool call step has no tool name");
    };
    let args = step.tool_args.clone().unwrap_or_default();
    let started = Instant::now();
    let outcome = executor.execute(tool_name, &args).await;
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let result = StepResult::from_outcome(&step.id, outcome);
    match result.duration_ms {
        Some(_) => result,
        None => result.with_duration(elapsed),
    }
}
