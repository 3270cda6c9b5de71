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

pub mod ready_set;
pub mod replanner;
pub mod state;

pub use ready_set::ReadySet;
pub use replanner::{ReplanBudget, Replanner};
pub use state::ExecutionState;

use crate::plan::StepStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("A result for step {0} was already recorded")]
    DuplicateResult(String),
    #[error("Step {0} is not part of the active plan")]
    UnknownStep(String),
    #[error("Step {step} cannot move from {from} to {to}")]
    InvalidTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
