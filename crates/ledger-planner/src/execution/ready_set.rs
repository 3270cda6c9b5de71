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

use crate::plan::Plan;
use std::collections::{HashMap, HashSet, VecDeque};

/// Tracks, per step, how many dependencies have not yet completed.
///
/// A step is eligible once its count reaches zero.
#[derive(Debug, Clone, Default)]
pub struct ReadySet {
    remaining: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl ReadySet {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut remaining = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for step in &plan.steps {
            remaining.insert(step.id.clone(), step.dependencies.len());
            for dep in &step.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.id.clone());
            }
        }
        Self {
            remaining,
            dependents,
            order: plan.steps.iter().map(|s| s.id.clone()).collect(),
        }
    }

    pub fn is_eligible(&self, step_id: &str) -> bool {
        self.remaining.get(step_id) == Some(&0)
    }

    /// Eligible step ids in plan order.
    pub fn eligible(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .map(String::as_str)
            .filter(|id| self.is_eligible(id))
    }

    /// Records completion and returns the dependents that just became eligible.
    pub fn complete(&mut self, step_id: &str) -> Vec<String> {
        let mut unlocked = Vec::new();
        if let Some(dependents) = self.dependents.get(step_id) {
            for dependent in dependents {
                if let Some(count) = self.remaining.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        unlocked.push(dependent.clone());
                    }
                }
            }
        }
        unlocked
    }

    /// Every step reachable through dependent edges, in plan order.
    pub fn transitive_dependents(&self, step_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([step_id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for next in self.dependents.get(&current).into_iter().flatten() {
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
        self.order
            .iter()
            .filter(|id| seen.contains(*id))
            .cloned()
            .collect()
    }
}
