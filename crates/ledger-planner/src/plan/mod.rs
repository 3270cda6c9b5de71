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

pub mod builder;
pub mod estimator;
pub mod fallback;
pub mod schemas;
pub mod validator;

pub use builder::PlanGraphBuilder;
pub use estimator::{estimate, PlanEstimate};
pub use fallback::{FallbackIntent, FallbackPlanGenerator};
pub use schemas::{
    GeneratedBy, Plan, PlanMetadata, Step, StepKind, StepMetadata, StepResult, StepStatus,
};
pub use validator::{validate, ValidationResult};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Malformed proposal: {0}")]
    Malformed(String),
    #[error("Step {index} is a tool call without a tool name")]
    MissingToolName { index: usize },
    #[error("Step {step} depends on position {index}, but the proposal has only {len} steps")]
    DependencyOutOfRange {
        step: usize,
        index: usize,
        len: usize,
    },
    #[error("Step {step} depends on position {index}, which does not precede it")]
    ForwardDependency { step: usize, index: usize },
}

pub type BuildResult<T> = Result<T, BuildError>;
