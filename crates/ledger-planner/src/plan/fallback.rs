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

use super::builder::PlanGraphBuilder;
use super::schemas::{GeneratedBy, Plan};
use plan_contracts::ProposedStep;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackIntent {
    Delete,
    Query,
    Create,
}

struct IntentPattern {
    intent: FallbackIntent,
    keywords: &'static [&'static str],
}

/// Checked in order; the first group with a matching keyword wins.
const INTENT_PATTERNS: &[IntentPattern] = &[
    IntentPattern {
        intent: FallbackIntent::Delete,
        keywords: &["删除", "删掉", "移除", "去掉", "delete", "remove"],
    },
    IntentPattern {
        intent: FallbackIntent::Query,
        keywords: &[
            "查询", "查看", "查一下", "统计", "多少", "query", "view", "show", "statistics",
            "stats",
        ],
    },
];

/// Deterministic keyword-driven plans used when no proposer-authored plan is usable.
pub struct FallbackPlanGenerator;

impl FallbackPlanGenerator {
    pub fn detect_intent(instruction: &str) -> FallbackIntent {
        let text = instruction.to_lowercase();
        INTENT_PATTERNS
            .iter()
            .find(|pattern| pattern.keywords.iter().any(|k| text.contains(k)))
            .map_or(FallbackIntent::Create, |pattern| pattern.intent)
    }

    pub fn generate(instruction: &str) -> Plan {
        let intent = Self::detect_intent(instruction);
        let args = instruction_args(instruction);

        let (description, steps) = match intent {
            FallbackIntent::Delete => (
                "Delete a transaction",
                vec![
                    ProposedStep::analyze("Identify the record to delete"),
                    ProposedStep::confirm("Confirm the deletion with the user")
                        .requiring_confirmation(true),
                    ProposedStep::tool_call("Delete the record", "delete_transaction", args),
                    ProposedStep::summarize("Summarise what was deleted"),
                ],
            ),
            FallbackIntent::Query => (
                "Query transactions",
                vec![
                    ProposedStep::analyze("Parse the query criteria"),
                    ProposedStep::tool_call("Run the query", "query_transactions", args),
                    ProposedStep::summarize("Summarise the query results"),
                ],
            ),
            FallbackIntent::Create => (
                "Record a transaction",
                vec![
                    ProposedStep::analyze("Extract the transaction details"),
                    ProposedStep::tool_call(
                        "Record the transaction",
                        "create_transaction",
                        args,
                    ),
                    ProposedStep::summarize("Summarise the recorded transaction"),
                ],
            ),
        };

        let plan =
            PlanGraphBuilder::build_chain(description, &steps, instruction, GeneratedBy::Fallback);
        info!(plan_id = %plan.id, intent = ?intent, "Generated fallback plan");
        plan
    }
}

fn instruction_args(instruction: &str) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("instruction".into(), json!(instruction));
    args
}
