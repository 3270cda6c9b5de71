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

use crate::plan::{Plan, Step};
use async_trait::async_trait;

/// Human approval for Confirmation steps and confirmation-flagged tool calls.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, plan: &Plan, step: &Step) -> bool;
}

/// Decides whether a step's opaque condition holds. The orchestrator never parses conditions itself.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, step: &Step, condition: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _plan: &Plan, _step: &Step) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecline;

#[async_trait]
impl ConfirmationGate for AutoDecline {
    async fn confirm(&self, _plan: &Plan, _step: &Step) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrue;

impl ConditionEvaluator for AlwaysTrue {
    fn evaluate(&self, _step: &Step, _condition: &str) -> bool {
        true
    }
}
