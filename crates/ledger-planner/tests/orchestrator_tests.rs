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

use async_trait::async_trait;
use ledger_planner::{
    AlwaysTrue, AutoApprove, AutoDecline, ConditionEvaluator, ConfirmationGate, GeneratedBy,
    OrchestratorConfig, Plan, PlanEvent, PlanOrchestrator, RiskTier, RunOutcome, Step,
    StepResult, StepStatus, TemplateProposer,
};
use plan_contracts::{
    DraftProposal, PlanProposer, ProposalContext, ProposedStep, ProposerError, ProposerResult,
    ToolExecutor, ToolOutcome,
};
use serde_json::{json, Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

struct ScriptedProposer {
    responses: Mutex<VecDeque<ProposerResult<DraftProposal>>>,
    prompts: Mutex<Vec<String>>,
    contexts: Mutex<Vec<ProposalContext>>,
}

impl ScriptedProposer {
    fn new(responses: Vec<ProposerResult<DraftProposal>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PlanProposer for ScriptedProposer {
    async fn propose(
        &self,
        instruction: &str,
        context: &ProposalContext,
    ) -> ProposerResult<DraftProposal> {
        self.prompts.lock().unwrap().push(instruction.to_string());
        self.contexts.lock().unwrap().push(context.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProposerError::Unavailable("script exhausted".into())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct SlowProposer;

#[async_trait]
impl PlanProposer for SlowProposer {
    async fn propose(
        &self,
        _instruction: &str,
        _context: &ProposalContext,
    ) -> ProposerResult<DraftProposal> {
        sleep(Duration::from_secs(600)).await;
        Ok(DraftProposal::new("too late").with_step(ProposedStep::analyze("late")))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[derive(Default)]
struct RecordingExecutor {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    fn failing(tools: &[&str]) -> Self {
        Self {
            failing: tools.iter().map(|t| t.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, tool_name: &str, _args: &Map<String, Value>) -> ToolOutcome {
        self.calls.lock().unwrap().push(tool_name.to_string());
        if self.failing.contains(tool_name) {
            ToolOutcome::failed(format!("{tool_name} is unavailable"))
        } else {
            ToolOutcome::ok(json!({ "tool": tool_name })).with_duration(3)
        }
    }
}

/// Only succeeds when every participant is in flight at the same time.
struct RendezvousExecutor {
    barrier: Barrier,
}

impl RendezvousExecutor {
    fn new(participants: usize) -> Self {
        Self {
            barrier: Barrier::new(participants),
        }
    }
}

#[async_trait]
impl ToolExecutor for RendezvousExecutor {
    async fn execute(&self, tool_name: &str, _args: &Map<String, Value>) -> ToolOutcome {
        match timeout(Duration::from_secs(5), self.barrier.wait()).await {
            Ok(_) => ToolOutcome::ok(json!({ "tool": tool_name })),
            Err(_) => ToolOutcome::failed(format!("{tool_name} ran alone")),
        }
    }
}

#[derive(Default)]
struct CountingGate {
    asked: AtomicUsize,
}

#[async_trait]
impl ConfirmationGate for CountingGate {
    async fn confirm(&self, _plan: &Plan, _step: &Step) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct NeverEvaluator;

impl ConditionEvaluator for NeverEvaluator {
    fn evaluate(&self, _step: &Step, condition: &str) -> bool {
        condition != "never"
    }
}

fn tool(description: &str, name: &str) -> ProposedStep {
    ProposedStep::tool_call(description, name, Map::new())
}

fn orchestrator_with(proposer: Arc<dyn PlanProposer>) -> PlanOrchestrator {
    PlanOrchestrator::new(OrchestratorConfig::default()).with_proposer(proposer)
}

#[tokio::test]
async fn test_no_proposer_uses_fallback() {
    let orchestrator = PlanOrchestrator::new(OrchestratorConfig::default());
    assert!(!orchestrator.has_proposer());
    let mut events = orchestrator.subscribe();

    let plan = orchestrator.generate_plan("删除这笔记录").await;
    assert!(plan.is_fallback());
    assert_eq!(plan.steps.len(), 4);
    assert!(plan.requires_confirmation);
    assert_eq!(plan.steps[2].metadata.risk_tier, Some(RiskTier::High));

    assert!(matches!(events.recv().await.unwrap(), PlanEvent::FallbackUsed { .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        PlanEvent::PlanGenerated {
            generated_by: GeneratedBy::Fallback,
            ..
        }
    ));
}

#[tokio::test]
async fn test_proposer_failure_falls_back() {
    let proposer = ScriptedProposer::new(vec![Err(ProposerError::Network("dns".into()))]);
    let orchestrator = orchestrator_with(proposer);

    let plan = orchestrator.generate_plan("查询本月支出").await;
    assert!(plan.is_fallback());
    assert_eq!(plan.steps.len(), 3);
    assert!(!plan.requires_confirmation);
}

#[tokio::test]
async fn test_invalid_proposal_is_rejected() {
    let empty = DraftProposal::new("  ");
    let orchestrator = orchestrator_with(ScriptedProposer::new(vec![Ok(empty)]));
    let mut events = orchestrator.subscribe();

    let plan = orchestrator.generate_plan("午饭35元").await;
    assert!(plan.is_fallback());

    match events.recv().await.unwrap() {
        PlanEvent::PlanRejected { errors, .. } => {
            assert!(errors.iter().any(|e| e.contains("description must not be empty")));
            assert!(errors.iter().any(|e| e.contains("at least one step")));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cyclic_proposal_falls_back() {
    let cyclic = DraftProposal::new("loop")
        .with_step(ProposedStep::analyze("a").depends_on(vec![1]))
        .with_step(ProposedStep::analyze("b").depends_on(vec![0]));
    let orchestrator = orchestrator_with(ScriptedProposer::new(vec![Ok(cyclic)]));
    let mut events = orchestrator.subscribe();

    let plan = orchestrator.generate_plan("午饭35元").await;
    assert!(plan.is_fallback());

    match events.recv().await.unwrap() {
        PlanEvent::FallbackUsed { reason, .. } => {
            assert!(reason.contains("does not precede"), "{reason}");
        }
        other => panic!("expected a fallback, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forward_reference_proposal_falls_back() {
    let backwards = DraftProposal::new("summary first")
        .with_step(ProposedStep::summarize("Summarise").depends_on(vec![1]))
        .with_step(ProposedStep::analyze("Analyse"));
    let orchestrator = orchestrator_with(ScriptedProposer::new(vec![Ok(backwards)]));

    let plan = orchestrator.generate_plan("查询本月支出").await;
    assert!(plan.is_fallback());

    let plan = orchestrator.init_execution_state(plan).await;
    let first = orchestrator.current_step().await.unwrap();
    assert_eq!(first.id, plan.steps[0].id);
    assert!(first.dependencies.is_empty());
}

#[tokio::test]
async fn test_out_of_range_proposal_falls_back() {
    let broken = DraftProposal::new("broken")
        .with_step(ProposedStep::analyze("a").depends_on(vec![3]));
    let orchestrator = orchestrator_with(ScriptedProposer::new(vec![Ok(broken)]));
    assert!(orchestrator.generate_plan("x").await.is_fallback());
}

#[tokio::test]
async fn test_valid_proposal_is_risk_annotated() {
    let draft = DraftProposal::new("Clear out duplicates")
        .with_step(ProposedStep::analyze("Find duplicates"))
        .with_step(tool("Delete them", "delete_transaction").depends_on(vec![0]));
    let orchestrator = orchestrator_with(ScriptedProposer::new(vec![Ok(draft)]));

    let plan = orchestrator.generate_plan("remove duplicate lunch").await;
    assert_eq!(plan.metadata.generated_by, GeneratedBy::Proposer);
    assert_eq!(plan.metadata.proposer.as_deref(), Some("scripted"));
    assert!(plan.steps[1].requires_confirmation);
    assert_eq!(plan.steps[1].metadata.risk_tier, Some(RiskTier::High));
    assert!(plan.requires_confirmation);
    assert!(orchestrator.validate_plan(&plan).valid);
}

#[tokio::test(start_paused = true)]
async fn test_proposer_timeout_falls_back() {
    let config = OrchestratorConfig {
        proposer_timeout_secs: 2,
        ..Default::default()
    };
    let orchestrator = PlanOrchestrator::new(config).with_proposer(Arc::new(SlowProposer));

    let plan = orchestrator.generate_plan("午饭35元").await;
    assert!(plan.is_fallback());
}

#[tokio::test]
async fn test_cancelled_generation_returns_none() {
    let orchestrator = orchestrator_with(Arc::new(SlowProposer));
    let token = CancellationToken::new();
    token.cancel();

    assert!(orchestrator
        .generate_plan_with_cancel("午饭35元", &token)
        .await
        .is_none());
    assert!(orchestrator.active_plan().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_slow_proposal() {
    let orchestrator = orchestrator_with(Arc::new(SlowProposer));
    let token = CancellationToken::new();

    let (plan, _) = tokio::join!(
        orchestrator.generate_plan_with_cancel("午饭35元", &token),
        async {
            sleep(Duration::from_secs(1)).await;
            token.cancel();
        }
    );
    assert!(plan.is_none());
}

#[tokio::test]
async fn test_driver_calls_without_state_are_no_ops() {
    let orchestrator = PlanOrchestrator::new(OrchestratorConfig::default());

    assert!(orchestrator.current_step().await.is_none());
    assert!(orchestrator.advance().await.is_none());
    assert!(orchestrator
        .record_result(StepResult::success("nowhere", None))
        .await
        .is_ok());
    assert!(!orchestrator.needs_replanning().await);
    assert!(orchestrator.replan("because").await.is_none());
    assert_eq!(
        orchestrator
            .run(&RecordingExecutor::default(), &AutoApprove, &AlwaysTrue)
            .await
            .unwrap(),
        RunOutcome::Idle
    );
}

#[tokio::test]
async fn test_manual_drive_detects_stranding_and_replans() {
    let first = DraftProposal::new("Look up and report")
        .with_step(tool("Look up the record", "query_transactions"))
        .with_step(ProposedStep::summarize("Report it").depends_on(vec![0]));
    let second = DraftProposal::new("Report from cache")
        .with_step(ProposedStep::summarize("Report what we know"));
    let proposer = ScriptedProposer::new(vec![Ok(first), Ok(second)]);
    let orchestrator = orchestrator_with(proposer.clone());

    let plan = orchestrator.generate_plan("show last month").await;
    let plan = orchestrator.init_execution_state(plan).await;
    assert_eq!(orchestrator.current_step().await.unwrap().id, plan.steps[0].id);

    orchestrator
        .record_result(StepResult::failure(&plan.steps[0].id, "ledger offline"))
        .await
        .unwrap();
    assert!(orchestrator.needs_replanning().await);

    let successor = orchestrator
        .replan("lookup failed")
        .await
        .expect("a proposer is configured");
    assert_ne!(successor.id, plan.id);
    assert_eq!(successor.metadata.replan_of.as_deref(), Some(plan.id.as_str()));
    assert_eq!(successor.metadata.original_instruction, "show last month");
    assert!(!orchestrator.needs_replanning().await);

    let history = orchestrator.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].plan.id, plan.id);
    assert_eq!(history[0].superseded_by.as_deref(), Some(successor.id.as_str()));
    assert!(!history[0].results[&plan.steps[0].id].success);

    let prompts = proposer.prompts.lock().unwrap().clone();
    assert!(prompts[1].starts_with("show last month"));
    assert!(prompts[1].contains("[Replanning context]"));
    assert!(prompts[1].contains("Look up the record: failed (ledger offline)"));
    let contexts = proposer.contexts.lock().unwrap().clone();
    assert!(contexts[0].past_results_summary.is_none());
    assert!(contexts[1].past_results_summary.is_some());
}

#[tokio::test]
async fn test_replan_without_proposer_returns_none() {
    let orchestrator = PlanOrchestrator::new(OrchestratorConfig::default());
    let plan = orchestrator.generate_plan("午饭35元").await;
    orchestrator.init_execution_state(plan).await;
    assert!(orchestrator.replan("no reason").await.is_none());
    assert!(orchestrator.active_plan().await.is_some());
}

#[tokio::test]
async fn test_duplicate_result_is_rejected_by_orchestrator() {
    let orchestrator = PlanOrchestrator::new(OrchestratorConfig::default());
    let plan = orchestrator.generate_plan("午饭35元").await;
    let plan = orchestrator.init_execution_state(plan).await;
    let id = plan.steps[0].id.clone();

    orchestrator
        .record_result(StepResult::success(&id, None))
        .await
        .unwrap();
    assert!(orchestrator
        .record_result(StepResult::success(&id, None))
        .await
        .is_err());
    assert_eq!(orchestrator.results().await.len(), 1);
}

#[tokio::test]
async fn test_run_template_plan_to_completion() {
    let orchestrator = orchestrator_with(Arc::new(TemplateProposer::new()));
    let executor = RecordingExecutor::default();

    let plan = orchestrator.generate_plan("午饭35元").await;
    assert_eq!(plan.metadata.proposer.as_deref(), Some("template"));
    let plan = orchestrator.init_execution_state(plan).await;

    let outcome = orchestrator
        .run(&executor, &AutoApprove, &AlwaysTrue)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            plan_id: plan.id.clone(),
            failed: 0,
            replans: 0
        }
    );
    assert_eq!(executor.calls(), vec!["create_transaction".to_string()]);
    let results = orchestrator.results().await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[&plan.steps[1].id].duration_ms, Some(3));
}

#[tokio::test]
async fn test_run_declined_confirmation_halts() {
    let orchestrator = PlanOrchestrator::new(OrchestratorConfig::default());
    let executor = RecordingExecutor::default();
    let plan = orchestrator.generate_plan("删除这笔记录").await;
    let plan = orchestrator.init_execution_state(plan).await;

    let outcome = orchestrator
        .run(&executor, &AutoDecline, &AlwaysTrue)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Declined {
            step_id: plan.steps[1].id.clone()
        }
    );
    assert!(executor.calls().is_empty());
    assert_eq!(
        orchestrator.status_of(&plan.steps[1].id).await,
        Some(StepStatus::Skipped)
    );
    assert_eq!(
        orchestrator.status_of(&plan.steps[2].id).await,
        Some(StepStatus::Skipped)
    );
}

#[tokio::test]
async fn test_run_asks_once_for_confirmed_deletion() {
    let orchestrator = PlanOrchestrator::new(OrchestratorConfig::default());
    let executor = RecordingExecutor::default();
    let gate = CountingGate::default();
    let plan = orchestrator.generate_plan("删除这笔记录").await;
    orchestrator.init_execution_state(plan).await;

    let outcome = orchestrator.run(&executor, &gate, &AlwaysTrue).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { failed: 0, .. }));
    assert_eq!(gate.asked.load(Ordering::SeqCst), 1);
    assert_eq!(executor.calls(), vec!["delete_transaction".to_string()]);
}

#[tokio::test]
async fn test_run_replans_after_stranding() {
    let first = DraftProposal::new("Query then report")
        .with_step(tool("Query", "query_transactions"))
        .with_step(ProposedStep::summarize("Report").depends_on(vec![0]));
    let second = DraftProposal::new("Record instead")
        .with_step(tool("Record", "create_transaction"));
    let orchestrator = orchestrator_with(ScriptedProposer::new(vec![Ok(first), Ok(second)]));
    let executor = RecordingExecutor::failing(&["query_transactions"]);

    let plan = orchestrator.generate_plan("show me").await;
    orchestrator.init_execution_state(plan).await;
    let outcome = orchestrator
        .run(&executor, &AutoApprove, &AlwaysTrue)
        .await
        .unwrap();

    let active = orchestrator.active_plan().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            plan_id: active.id.clone(),
            failed: 0,
            replans: 1
        }
    );
    assert_eq!(
        executor.calls(),
        vec!["query_transactions".to_string(), "create_transaction".to_string()]
    );
    assert_eq!(orchestrator.history().await.len(), 1);
}

#[tokio::test]
async fn test_run_without_replan_budget_is_exhausted() {
    let first = DraftProposal::new("Query then report")
        .with_step(tool("Query", "query_transactions"))
        .with_step(ProposedStep::summarize("Report").depends_on(vec![0]));
    let config = OrchestratorConfig {
        max_replans: 0,
        ..Default::default()
    };
    let orchestrator = PlanOrchestrator::new(config)
        .with_proposer(ScriptedProposer::new(vec![Ok(first)]));
    let executor = RecordingExecutor::failing(&["query_transactions"]);

    let plan = orchestrator.generate_plan("show me").await;
    orchestrator.init_execution_state(plan).await;
    let outcome = orchestrator
        .run(&executor, &AutoApprove, &AlwaysTrue)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Exhausted { replans: 0, .. }));
}

#[tokio::test]
async fn test_run_without_proposer_reports_stranding() {
    let orchestrator = PlanOrchestrator::new(OrchestratorConfig::default());
    let executor = RecordingExecutor::failing(&["create_transaction"]);
    let plan = orchestrator.generate_plan("午饭35元").await;
    orchestrator.init_execution_state(plan).await;

    let outcome = orchestrator
        .run(&executor, &AutoApprove, &AlwaysTrue)
        .await
        .unwrap();
    match outcome {
        RunOutcome::Stranded { reason } => assert!(reason.contains("Record the transaction")),
        other => panic!("expected stranding, got {other:?}"),
    }
}

#[tokio::test]
async fn test_false_condition_skips_step_and_dependents() {
    let draft = DraftProposal::new("Conditional cleanup")
        .with_step(ProposedStep::analyze("Inspect"))
        .with_step(tool("Clear cache", "clear_cache").depends_on(vec![0]).when("never"))
        .with_step(ProposedStep::summarize("Report cleanup").depends_on(vec![1]))
        .with_step(tool("Record", "create_transaction").depends_on(vec![0]));
    let orchestrator = orchestrator_with(ScriptedProposer::new(vec![Ok(draft)]));
    let executor = RecordingExecutor::default();

    let plan = orchestrator.generate_plan("tidy up").await;
    let plan = orchestrator.init_execution_state(plan).await;
    assert_eq!(orchestrator.list_conditional_pending().await.len(), 1);

    let outcome = orchestrator
        .run(&executor, &AutoApprove, &NeverEvaluator)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { failed: 0, .. }));
    assert_eq!(executor.calls(), vec!["create_transaction".to_string()]);
    assert_eq!(
        orchestrator.status_of(&plan.steps[2].id).await,
        Some(StepStatus::Skipped)
    );
}

#[tokio::test]
async fn test_parallel_dispatch_runs_independent_tool_calls() {
    let draft = DraftProposal::new("Two lookups")
        .with_step(tool("This month", "query_transactions"))
        .with_step(tool("Budget", "query_budget"))
        .with_step(ProposedStep::summarize("Compare").depends_on(vec![0, 1]));
    let config = OrchestratorConfig {
        parallel_dispatch: true,
        ..Default::default()
    };
    let orchestrator =
        PlanOrchestrator::new(config).with_proposer(ScriptedProposer::new(vec![Ok(draft)]));
    let executor = RendezvousExecutor::new(2);
    let mut events = orchestrator.subscribe();

    let plan = orchestrator.generate_plan("compare").await;
    orchestrator.init_execution_state(plan).await;
    let outcome = orchestrator
        .run(&executor, &AutoApprove, &AlwaysTrue)
        .await
        .unwrap();
    assert!(
        matches!(outcome, RunOutcome::Completed { failed: 0, replans: 0, .. }),
        "{outcome:?}"
    );
    assert_eq!(orchestrator.results().await.len(), 3);

    let mut started = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PlanEvent::StepStarted { .. }) {
            started += 1;
        }
    }
    assert_eq!(started, 2);
}
