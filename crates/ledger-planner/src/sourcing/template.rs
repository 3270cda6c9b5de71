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
use lazy_static::lazy_static;
use plan_contracts::{
    DraftProposal, PlanProposer, ProposalContext, ProposedStep, ProposerError, ProposerResult,
};
use regex::Regex;
use serde_json::{json, Map};
use tracing::debug;

lazy_static! {
    static ref AMOUNT_REGEX: Regex =
        Regex::new(r"(?i)(\d+(?:\.\d{1,2})?)\s*(?:元|块|rmb|yuan|usd)?").unwrap();
}

const INCOME_KEYWORDS: &[&str] = &[
    "收入", "工资", "奖金", "报销", "收到", "income", "salary", "bonus", "refund",
];
const QUERY_KEYWORDS: &[&str] = &["查询", "查看", "统计", "多少", "query", "show", "how much"];
const DELETE_KEYWORDS: &[&str] = &["删除", "删掉", "移除", "delete", "remove"];

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "food",
        &["餐", "饭", "吃", "咖啡", "lunch", "dinner", "breakfast", "coffee"],
    ),
    ("transport", &["车", "地铁", "公交", "taxi", "bus", "metro"]),
    ("shopping", &["买", "购物", "shopping", "bought"]),
];

const PERIODS: &[(&str, &[&str])] = &[
    ("current_month", &["本月", "这个月", "this month"]),
    ("last_month", &["上月", "上个月", "last month"]),
    ("today", &["今天", "today"]),
    ("current_year", &["今年", "this year"]),
];

/// Regex/keyword templates for common bookkeeping phrases.
///
/// Declines with `Unsupported` when no template matches, so it can sit in front of a
/// model-backed proposer in a `ChainedProposer`.
#[derive(Debug, Default, Clone)]
pub struct TemplateProposer;

impl TemplateProposer {
    pub fn new() -> Self {
        Self
    }

    fn record_template(text: &str, original: &str) -> Option<DraftProposal> {
        let captures = AMOUNT_REGEX.captures(text)?;
        let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
        let kind = if contains_any(text, INCOME_KEYWORDS) {
            "income"
        } else {
            "expense"
        };
        let category = CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| contains_any(text, keywords))
            .map_or("other", |(name, _)| *name);
        let note = AMOUNT_REGEX.replace(original, "").trim().to_string();

        let mut extracted = Map::new();
        extracted.insert("amount".into(), json!(amount));
        extracted.insert("type".into(), json!(kind));
        extracted.insert("category".into(), json!(category));
        extracted.insert("note".into(), json!(note));

        Some(
            DraftProposal::new(format!("Record {kind} of {amount}"))
                .with_step(ProposedStep::analyze("Parse amount, type and category"))
                .with_step(
                    ProposedStep::tool_call(
                        "Record the transaction",
                        "create_transaction",
                        extracted.clone(),
                    )
                    .depends_on(vec![0])
                    .expecting("A new ledger entry"),
                )
                .with_step(
                    ProposedStep::summarize("Summarise the recorded transaction")
                        .depends_on(vec![1]),
                )
                .with_extracted(extracted),
        )
    }

    fn query_template(text: &str) -> Option<DraftProposal> {
        let period = PERIODS
            .iter()
            .find(|(_, keywords)| contains_any(text, keywords))
            .map(|(name, _)| *name)?;

        let mut args = Map::new();
        args.insert("period".into(), json!(period));
        if contains_any(text, &["支出", "花", "expense", "spent"]) {
            args.insert("type".into(), json!("expense"));
        } else if contains_any(text, INCOME_KEYWORDS) {
            args.insert("type".into(), json!("income"));
        }

        Some(
            DraftProposal::new(format!("Query transactions for {period}"))
                .with_step(ProposedStep::analyze("Resolve the reporting period"))
                .with_step(
                    ProposedStep::tool_call("Run the query", "query_transactions", args.clone())
                        .depends_on(vec![0])
                        .expecting("Matching transactions with totals"),
                )
                .with_step(
                    ProposedStep::summarize("Summarise totals for the period").depends_on(vec![1]),
                )
                .with_extracted(args),
        )
    }
}

#[async_trait]
impl PlanProposer for TemplateProposer {
    async fn propose(
        &self,
        instruction: &str,
        _context: &ProposalContext,
    ) -> ProposerResult<DraftProposal> {
        let text = instruction.to_lowercase();
        if contains_any(&text, DELETE_KEYWORDS) {
            return Err(ProposerError::Unsupported(
                "deletions are not templated".to_string(),
            ));
        }
        let draft = if contains_any(&text, QUERY_KEYWORDS) {
            Self::query_template(&text)
        } else {
            Self::record_template(&text, instruction)
        }
        .ok_or_else(|| ProposerError::Unsupported(instruction.to_string()))?;
        debug!(description = %draft.description, "Template matched");
        Ok(draft)
    }

    fn name(&self) -> &str {
        "template"
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

