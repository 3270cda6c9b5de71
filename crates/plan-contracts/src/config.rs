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

/// User preferences consulted by the risk policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPreferences {
    #[serde(default = "default_confirm_high_risk")]
    pub confirm_high_risk: bool,
    #[serde(default)]
    pub confirm_medium_risk: bool,
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
}

fn default_confirm_high_risk() -> bool {
    true
}
fn default_batch_threshold() -> usize {
    10
}

impl Default for RiskPreferences {
    fn default() -> Self {
        Self {
            confirm_high_risk: default_confirm_high_risk(),
            confirm_medium_risk: false,
            batch_threshold: default_batch_threshold(),
        }
    }
}
