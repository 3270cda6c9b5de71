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

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Step type tags as they appear in a draft proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStepKind {
    Analyze,
    ToolCall,
    Confirm,
    Summarize,
    Goal,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// One tier up, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            RiskTier::Low => RiskTier::Medium,
            RiskTier::Medium => RiskTier::High,
            RiskTier::High | RiskTier::Critical => RiskTier::Critical,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
            RiskTier::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposerError {
    #[error("Plan proposer unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: proposer did not answer within {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Malformed proposal: {0}")]
    Malformed(String),

    #[error("No proposal for this instruction: {0}")]
    Unsupported(String),

    #[error("Proposal cancelled by caller")]
    Cancelled,
}

pub type ProposerResult<T> = Result<T, ProposerError>;

impl From<serde_json::Error> for ProposerError {
    fn from(err: serde_json::Error) -> Self {
        ProposerError::Malformed(err.to_string())
    }
}

impl ProposerError {
    /// Whether the orchestrator may substitute a fallback plan for this failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProposerError::Cancelled)
    }
}
