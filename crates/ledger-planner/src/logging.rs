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

use crate::plan::{StepResult, ValidationResult};
use serde_json::Value;
use tracing::{debug, info, warn};

pub fn log_plan_event(event: &str, plan_id: &str, payload: Value) {
    debug!(
        event = event,
        plan_id = plan_id,
        payload = %serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string()),
        "Plan event"
    );
}

pub fn log_step_result(plan_id: &str, result: &StepResult) {
    if result.success {
        debug!(
            plan_id = plan_id,
            step_id = %result.step_id,
            duration_ms = result.duration_ms,
            "Step completed"
        );
    } else {
        warn!(
            plan_id = plan_id,
            step_id = %result.step_id,
            error = result.error.as_deref().unwrap_or("unknown"),
            "Step failed"
        );
    }
}

pub fn log_validation_failure(plan_id: &str, validation: &ValidationResult) {
    warn!(
        plan_id = plan_id,
        error_count = validation.errors.len(),
        errors = %validation.errors.join("; "),
        "Plan failed validation"
    );
}

pub fn log_replan(previous_plan_id: &str, next_plan_id: &str, reason: &str) {
    info!(
        previous = previous_plan_id,
        next = next_plan_id,
        reason = reason,
        "Replanned"
    );
}
