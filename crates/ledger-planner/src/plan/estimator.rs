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

use super::schemas::{Plan, StepKind};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use plan_contracts::RiskTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const ANALYSIS_SECS: u64 = 1;
const TOOL_CALL_SECS: u64 = 2;
const CONFIRMATION_SECS: u64 = 5;

/// Display-only summary of a plan's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEstimate {
    pub step_count: usize,
    pub tool_call_count: usize,
    pub confirmation_count: usize,
    pub estimated_duration_secs: u64,
    pub critical_path_len: usize,
    pub can_parallelize: bool,
    pub highest_risk: RiskTier,
}

pub fn estimate(plan: &Plan) -> PlanEstimate {
    let mut tool_call_count = 0;
    let mut confirmation_count = 0;
    let mut estimated_duration_secs = 0;
    for step in &plan.steps {
        estimated_duration_secs += match step.kind {
            StepKind::Analysis => ANALYSIS_SECS,
            StepKind::ToolCall => {
                tool_call_count += 1;
                TOOL_CALL_SECS
            }
            StepKind::Confirmation => {
                confirmation_count += 1;
                CONFIRMATION_SECS
            }
        };
    }

    let highest_risk = plan
        .steps
        .iter()
        .filter_map(|s| s.metadata.risk_tier)
        .max()
        .unwrap_or_default();

    let (critical_path_len, can_parallelize) = depth_profile(plan);

    PlanEstimate {
        step_count: plan.steps.len(),
        tool_call_count,
        confirmation_count,
        estimated_duration_secs,
        critical_path_len,
        can_parallelize,
        highest_risk,
    }
}

/// Longest dependency chain, and whether any depth level holds more than one step.
fn depth_profile(plan: &Plan) -> (usize, bool) {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let nodes: HashMap<&str, NodeIndex> = plan
        .steps
        .iter()
        .map(|s| (s.id.as_str(), graph.add_node(s.id.as_str())))
        .collect();
    for step in &plan.steps {
        for dep in &step.dependencies {
            if let (Some(&from), Some(&to)) = (nodes.get(dep.as_str()), nodes.get(step.id.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }
    }

    let order = match toposort(&graph, None) {
        Ok(order) => order,
        Err(cycle) => {
            warn!(
                plan_id = %plan.id,
                node = %graph[cycle.node_id()],
                "Cannot estimate depth of a cyclic plan"
            );
            return (0, false);
        }
    };

    let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
    for node in order {
        let d = graph
            .neighbors_directed(node, petgraph::Direction::Incoming)
            .filter_map(|pred| depth.get(&pred))
            .max()
            .map_or(1, |d| d + 1);
        depth.insert(node, d);
    }

    let mut per_level: HashMap<usize, usize> = HashMap::new();
    for d in depth.values() {
        *per_level.entry(*d).or_default() += 1;
    }
    let critical = depth.values().copied().max().unwrap_or(0);
    (critical, per_level.values().any(|&n| n > 1))
}
