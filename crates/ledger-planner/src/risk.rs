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

use crate::plan::{Plan, StepKind};
use plan_contracts::{RiskPreferences, RiskTier};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Verb prefixes and their default tiers. Longest match wins.
const VERB_TIERS: &[(&str, RiskTier)] = &[
    ("batch_delete", RiskTier::High),
    ("batch_create", RiskTier::Medium),
    ("delete", RiskTier::High),
    ("clear", RiskTier::High),
    ("update", RiskTier::Medium),
];

/// Static tier of an action name, ignoring user overrides.
pub fn classify_action(action: &str) -> RiskTier {
    let action = action.trim().to_lowercase();
    VERB_TIERS
        .iter()
        .filter(|(verb, _)| {
            action == *verb
                || action
                    .strip_prefix(verb)
                    .is_some_and(|rest| rest.starts_with('_'))
        })
        .max_by_key(|(verb, _)| verb.len())
        .map_or(RiskTier::Low, |(_, tier)| *tier)
}

#[derive(Debug, Clone, Default)]
pub struct RiskPolicy {
    preferences: RiskPreferences,
    overrides: HashMap<String, RiskTier>,
}

impl RiskPolicy {
    pub fn new(preferences: RiskPreferences) -> Self {
        Self {
            preferences,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, RiskTier>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn preferences(&self) -> &RiskPreferences {
        &self.preferences
    }

    pub fn classify(&self, action: &str) -> RiskTier {
        self.overrides
            .get(action)
            .copied()
            .unwrap_or_else(|| classify_action(action))
    }

    /// Tier of a concrete call; `batch_*` actions over the batch threshold go up one tier.
    pub fn classify_call(&self, action: &str, args: Option<&Map<String, Value>>) -> RiskTier {
        let tier = self.classify(action);
        let is_batch = action.trim().to_lowercase().starts_with("batch_");
        match args {
            Some(args) if is_batch && exceeds_batch_threshold(args, self.preferences.batch_threshold) => {
                tier.escalate()
            }
            _ => tier,
        }
    }

    pub fn requires_confirmation(tier: RiskTier, preferences: &RiskPreferences) -> bool {
        match tier {
            RiskTier::Critical => true,
            RiskTier::High => preferences.confirm_high_risk,
            RiskTier::Medium => preferences.confirm_medium_risk,
            RiskTier::Low => false,
        }
    }

    /// Annotates tool-call steps with their tier and confirmation requirement.
    ///
    /// Only confirmation flags and tiers change; order and structure are left alone.
    /// An explicit step flag can add a confirmation but never waive one the policy demands.
    pub fn annotate(&self, plan: &mut Plan) {
        for step in plan.steps.iter_mut() {
            if step.kind != StepKind::ToolCall {
                continue;
            }
            let Some(tool) = step.tool_name.as_deref() else {
                continue;
            };
            let tier = self.classify_call(tool, step.tool_args.as_ref());
            let required = Self::requires_confirmation(tier, &self.preferences)
                || step.metadata.requires_confirmation.unwrap_or(false);
            step.metadata.risk_tier = Some(tier);
            step.requires_confirmation = required;
            debug!(step_id = %step.id, tool, tier = %tier, required, "Risk annotation");
        }
        plan.refresh_confirmation_flag();
    }
}

fn exceeds_batch_threshold(args: &Map<String, Value>, threshold: usize) -> bool {
    args.iter().any(|(key, value)| match value {
        Value::Array(items) => items.len() > threshold,
        Value::Number(n) if key == "count" => n
            .as_u64()
            .is_some_and(|count| count > threshold as u64),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verbs_map_to_tiers() {
        assert_eq!(classify_action("delete"), RiskTier::High);
        assert_eq!(classify_action("delete_transaction"), RiskTier::High);
        assert_eq!(classify_action("batch_delete_transactions"), RiskTier::High);
        assert_eq!(classify_action("clear"), RiskTier::High);
        assert_eq!(classify_action("update_transaction"), RiskTier::Medium);
        assert_eq!(classify_action("batch_create"), RiskTier::Medium);
        assert_eq!(classify_action("create_transaction"), RiskTier::Low);
        assert_eq!(classify_action("deleted_report"), RiskTier::Low);
    }

    #[test]
    fn confirmation_rules_follow_preferences() {
        let prefs = RiskPreferences {
            confirm_high_risk: false,
            confirm_medium_risk: true,
            batch_threshold: 10,
        };
        assert!(RiskPolicy::requires_confirmation(RiskTier::Critical, &prefs));
        assert!(!RiskPolicy::requires_confirmation(RiskTier::High, &prefs));
        assert!(RiskPolicy::requires_confirmation(RiskTier::Medium, &prefs));
        assert!(!RiskPolicy::requires_confirmation(RiskTier::Low, &prefs));
    }

    #[test]
    fn overrides_take_precedence() {
        let policy = RiskPolicy::default().with_overrides(HashMap::from([(
            "reset_ledger".to_string(),
            RiskTier::Critical,
        )]));
        assert_eq!(policy.classify("reset_ledger"), RiskTier::Critical);
        assert_eq!(policy.classify("delete_transaction"), RiskTier::High);
    }

    #[test]
    fn large_batches_escalate() {
        let policy = RiskPolicy::new(RiskPreferences {
            batch_threshold: 2,
            ..Default::default()
        });
        let small = json!({"items": [1, 2]});
        let large = json!({"items": [1, 2, 3]});
        let counted = json!({"count": 5});
        assert_eq!(
            policy.classify_call("batch_create", small.as_object()),
            RiskTier::Medium
        );
        assert_eq!(
            policy.classify_call("batch_create", large.as_object()),
            RiskTier::High
        );
        assert_eq!(
            policy.classify_call("batch_delete", counted.as_object()),
            RiskTier::Critical
        );
        assert_eq!(
            policy.classify_call("create_transaction", large.as_object()),
            RiskTier::Low
        );
    }
}
