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
use chrono::{DateTime, Utc};
use plan_contracts::{ToolExecutor, ToolOutcome};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: u64,
    pub amount: f64,
    pub kind: String,
    pub category: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Book {
    entries: Vec<Entry>,
    next_id: u64,
}

/// In-process ledger standing in for the app's real transaction store.
#[derive(Debug, Default)]
pub struct DemoLedger {
    book: Mutex<Book>,
    failing: HashSet<String>,
}

impl DemoLedger {
    pub fn new(failing: impl IntoIterator<Item = String>) -> Self {
        Self {
            book: Mutex::new(Book::default()),
            failing: failing.into_iter().collect(),
        }
    }

    pub async fn entries(&self) -> Vec<Entry> {
        self.book.lock().await.entries.clone()
    }

    async fn create(&self, args: &Map<String, Value>) -> ToolOutcome {
        let Some(amount) = amount_from(args) else {
            return ToolOutcome::failed("no amount given");
        };
        let mut book = self.book.lock().await;
        book.next_id += 1;
        let entry = Entry {
            id: book.next_id,
            amount,
            kind: str_arg(args, "type").unwrap_or("expense").to_lowercase(),
            category: str_arg(args, "category").unwrap_or("other").to_string(),
            note: str_arg(args, "note")
                .or_else(|| str_arg(args, "instruction"))
                .unwrap_or_default()
                .to_string(),
            created_at: Utc::now(),
        };
        info!(id = entry.id, amount, kind = %entry.kind, "Recorded transaction");
        let value = json!(entry);
        book.entries.push(entry);
        ToolOutcome::ok(value)
    }

    async fn query(&self, args: &Map<String, Value>) -> ToolOutcome {
        let book = self.book.lock().await;
        let kind = str_arg(args, "type").map(str::to_lowercase);
        let matching: Vec<&Entry> = book
            .entries
            .iter()
            .filter(|e| kind.as_deref().map_or(true, |k| e.kind == k))
            .collect();
        let total: f64 = matching.iter().map(|e| e.amount).sum();
        ToolOutcome::ok(json!({
            "period": str_arg(args, "period").unwrap_or("all"),
            "count": matching.len(),
            "total": total,
            "entries": matching,
        }))
    }

    async fn delete(&self, args: &Map<String, Value>) -> ToolOutcome {
        let mut book = self.book.lock().await;
        let position = match args.get("id").and_then(Value::as_u64) {
            Some(id) => book.entries.iter().position(|e| e.id == id),
            None => book.entries.len().checked_sub(1),
        };
        match position {
            Some(index) => {
                let removed = book.entries.remove(index);
                info!(id = removed.id, "Deleted transaction");
                ToolOutcome::ok(json!({ "deleted": removed }))
            }
            None => ToolOutcome::failed("no matching transaction"),
        }
    }
}

#[async_trait]
impl ToolExecutor for DemoLedger {
    async fn execute(&self, tool_name: &str, args: &Map<String, Value>) -> ToolOutcome {
        debug!(tool_name, "Demo ledger call");
        if self.failing.contains(tool_name) {
            return ToolOutcome::failed(format!("{tool_name} was forced to fail"));
        }
        match tool_name {
            "create_transaction" => self.create(args).await,
            "query_transactions" => self.query(args).await,
            "delete_transaction" => self.delete(args).await,
            other => ToolOutcome::failed(format!("unknown tool: {other}")),
        }
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Uses an explicit `amount`, else the first number found in the free-text instruction.
fn amount_from(args: &Map<String, Value>) -> Option<f64> {
    if let Some(amount) = args.get("amount").and_then(Value::as_f64) {
        return Some(amount);
    }
    let text = str_arg(args, "instruction")?;
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn create_query_delete() {
        let ledger = DemoLedger::default();
        let created = ledger
            .execute("create_transaction", &args(json!({"instruction": "打车 28.5"})))
            .await;
        assert!(created.success);

        let queried = ledger.execute("query_transactions", &Map::new()).await;
        assert_eq!(queried.result.unwrap()["total"], json!(28.5));

        assert!(ledger.execute("delete_transaction", &Map::new()).await.success);
        assert!(!ledger.execute("delete_transaction", &Map::new()).await.success);
        assert!(ledger.entries().await.is_empty());
    }

    #[tokio::test]
    async fn forced_failures_and_unknown_tools() {
        let ledger = DemoLedger::new(["create_transaction".to_string()]);
        let outcome = ledger
            .execute("create_transaction", &args(json!({"amount": 3})))
            .await;
        assert!(!outcome.success);
        assert!(!ledger.execute("launch_rocket", &Map::new()).await.success);
    }
}
