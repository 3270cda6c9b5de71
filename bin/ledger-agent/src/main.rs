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

mod ledger;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ledger::DemoLedger;
use ledger_planner::{
    create_orchestrator, estimate, load_config, AlwaysTrue, AutoApprove, AutoDecline,
    ConfirmationGate, PlanOrchestrator, PlanProposer, RunOutcome, TemplateProposer,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-agent", about = "Plan and run bookkeeping instructions")]
struct Cli {
    /// YAML orchestrator configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Generate a plan and print it with its estimate
    Plan {
        #[arg(long)]
        instruction: String,
        /// Source plans from the bookkeeping templates instead of the fallback generator
        #[arg(long)]
        template: bool,
    },
    /// Generate a plan and run it against the in-memory demo ledger
    Run {
        #[arg(long)]
        instruction: String,
        #[arg(long)]
        template: bool,
        /// Approve every confirmation
        #[arg(long)]
        yes: bool,
        /// Force the named tool to fail; may be repeated
        #[arg(long, value_name = "TOOL")]
        fail: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Command::Plan {
            instruction,
            template,
        } => print_plan(&build_orchestrator(config, template), &instruction).await,
        Command::Run {
            instruction,
            template,
            yes,
            fail,
        } => run_plan(&build_orchestrator(config, template), &instruction, yes, fail).await,
    }
}

fn build_orchestrator(
    config: ledger_planner::OrchestratorConfig,
    template: bool,
) -> PlanOrchestrator {
    let proposer: Option<Arc<dyn PlanProposer>> = if template {
        Some(Arc::new(TemplateProposer::new()))
    } else {
        None
    };
    let orchestrator = create_orchestrator(config, proposer);
    if !orchestrator.has_proposer() {
        info!("No plan proposer configured, plans come from the fallback generator");
    }
    orchestrator
}

async fn print_plan(orchestrator: &PlanOrchestrator, instruction: &str) -> Result<()> {
    let plan = orchestrator.generate_plan(instruction).await;
    let report = json!({
        "plan": plan,
        "estimate": estimate(&plan),
        "validation": orchestrator.validate_plan(&plan),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_plan(
    orchestrator: &PlanOrchestrator,
    instruction: &str,
    yes: bool,
    fail: Vec<String>,
) -> Result<()> {
    let ledger = DemoLedger::new(fail);
    let gate: &dyn ConfirmationGate = if yes { &AutoApprove } else { &AutoDecline };
    let mut events = orchestrator.subscribe();

    let plan = orchestrator.generate_plan(instruction).await;
    info!(plan_id = %plan.id, steps = plan.steps.len(), "Running plan");
    orchestrator.init_execution_state(plan).await;

    let outcome = orchestrator.run(&ledger, gate, &AlwaysTrue).await?;

    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    match &outcome {
        RunOutcome::Completed {
            plan_id,
            failed,
            replans,
        } => println!("Completed {plan_id} ({failed} failed, {replans} replans)"),
        RunOutcome::Declined { step_id } => {
            println!("Stopped: confirmation declined at {step_id} (pass --yes to approve)")
        }
        RunOutcome::Stranded { reason } => println!("Stranded: {reason}"),
        RunOutcome::Exhausted { reason, replans } => {
            println!("Gave up after {replans} replans: {reason}")
        }
        RunOutcome::Idle => println!("Nothing to run"),
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "ledger": ledger.entries().await }))?
    );
    Ok(())
}
