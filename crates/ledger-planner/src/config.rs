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

use crate::orchestration::{OrchestrationError, OrchestrationResult};
use crate::risk::RiskPolicy;
use plan_contracts::{RiskPreferences, RiskTier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const ENV_PREFIX: &str = "LEDGER_PLANNER_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub risk: RiskPreferences,
    #[serde(default)]
    pub tier_overrides: HashMap<String, RiskTier>,
    #[serde(default = "default_available_actions")]
    pub available_actions: Vec<String>,
    #[serde(default = "default_proposer_timeout_secs")]
    pub proposer_timeout_secs: u64,
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    #[serde(default)]
    pub parallel_dispatch: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_available_actions() -> Vec<String> {
    [
        "create_transaction",
        "update_transaction",
        "delete_transaction",
        "query_transactions",
        "batch_create_transactions",
        "batch_delete_transactions",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_proposer_timeout_secs() -> u64 {
    30
}
fn default_max_replans() -> u32 {
    2
}
fn default_event_capacity() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            risk: RiskPreferences::default(),
            tier_overrides: HashMap::new(),
            available_actions: default_available_actions(),
            proposer_timeout_secs: default_proposer_timeout_secs(),
            max_replans: default_max_replans(),
            parallel_dispatch: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_str(content: &str) -> OrchestrationResult<Self> {
        serde_yaml::from_str(content).map_err(|e| OrchestrationError::Yaml(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> OrchestrationResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestrationError::Io(format!("{}: {e}", path.display())))?;
        let config = Self::from_yaml_str(&content)?;
        debug!(path = %path.display(), "Loaded orchestrator configuration");
        Ok(config)
    }

    pub fn risk_policy(&self) -> RiskPolicy {
        RiskPolicy::new(self.risk.clone()).with_overrides(self.tier_overrides.clone())
    }

    /// Overlays `LEDGER_PLANNER_*` environment variables. Unparseable values are an error.
    pub fn apply_env_overrides(self) -> OrchestrationResult<Self> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> OrchestrationResult<Self> {
        if let Some(v) = lookup("CONFIRM_HIGH_RISK") {
            self.risk.confirm_high_risk = parse_value("CONFIRM_HIGH_RISK", &v)?;
        }
        if let Some(v) = lookup("CONFIRM_MEDIUM_RISK") {
            self.risk.confirm_medium_risk = parse_value("CONFIRM_MEDIUM_RISK", &v)?;
        }
        if let Some(v) = lookup("BATCH_THRESHOLD") {
            self.risk.batch_threshold = parse_value("BATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("PROPOSER_TIMEOUT_SECS") {
            self.proposer_timeout_secs = parse_value("PROPOSER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MAX_REPLANS") {
            self.max_replans = parse_value("MAX_REPLANS", &v)?;
        }
        if let Some(v) = lookup("PARALLEL_DISPATCH") {
            self.parallel_dispatch = parse_value("PARALLEL_DISPATCH", &v)?;
        }
        Ok(self)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> OrchestrationResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| OrchestrationError::Config(format!("{ENV_PREFIX}{key}: invalid value `{raw}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yaml_with_partial_fields() {
        let config = OrchestratorConfig::from_yaml_str(
            r#"
risk:
  confirm_medium_risk: true
tier_overrides:
  reset_ledger: critical
max_replans: 0
"#,
        )
        .unwrap();
        assert!(config.risk.confirm_high_risk);
        assert!(config.risk.confirm_medium_risk);
        assert_eq!(config.tier_overrides["reset_ledger"], RiskTier::Critical);
        assert_eq!(config.max_replans, 0);
        assert_eq!(config.proposer_timeout_secs, 30);
        assert!(config.available_actions.contains(&"delete_transaction".to_string()));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallel_dispatch: true").unwrap();
        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert!(config.parallel_dispatch);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = OrchestratorConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, OrchestrationError::Io(_)));
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let vars = HashMap::from([
            ("MAX_REPLANS".to_string(), "5".to_string()),
            ("CONFIRM_HIGH_RISK".to_string(), "false".to_string()),
        ]);
        let config = OrchestratorConfig::default()
            .apply_overrides(|k| vars.get(k).cloned())
            .unwrap();
        assert_eq!(config.max_replans, 5);
        assert!(!config.risk.confirm_high_risk);

        let bad = OrchestratorConfig::default()
            .apply_overrides(|k| (k == "BATCH_THRESHOLD").then(|| "lots".to_string()));
        assert!(matches!(bad, Err(OrchestrationError::Config(_))));
    }
}
