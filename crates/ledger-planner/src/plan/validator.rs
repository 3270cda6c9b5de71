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

use super::schemas::Plan;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Checks a candidate plan. All checks run; errors accumulate rather than short-circuit.
pub fn validate(plan: &Plan) -> ValidationResult {
    let mut errors = Vec::new();

    if plan.id.trim().is_empty() {
        errors.push("Plan id must not be empty".to_string());
    }
    if plan.description.trim().is_empty() {
        errors.push("Plan description must not be empty".to_string());
    }

    if plan.steps.is_empty() {
        errors.push("Plan must contain at least one step".to_string());
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.id.as_str()) && reported.insert(step.id.as_str()) {
            errors.push(format!("Duplicate step id: {}", step.id));
        }
    }

    for step in &plan.steps {
        for dep in &step.dependencies {
            if !seen.contains(dep.as_str()) {
                errors.push(format!(
                    "Step {} depends on nonexistent step {}",
                    step.id, dep
                ));
            }
        }
    }

    // Dangling edges are excluded so they are not reported twice.
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &plan.steps {
        let entry = edges.entry(step.id.as_str()).or_default();
        entry.extend(
            step.dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| seen.contains(dep)),
        );
    }
    let order: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    errors.extend(find_cycles(&order, &edges));

    ValidationResult::from_errors(errors)
}

/// Depth-first search with an explicit frame stack of `(node, next edge index)`;
/// `path` mirrors the frames so a back edge can be rendered as a ring.
fn find_cycles<'a>(order: &[&'a str], edges: &HashMap<&'a str, Vec<&'a str>>) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path: Vec<&str> = Vec::new();
    let mut frames: Vec<(&str, usize)> = Vec::new();
    let mut cycles = Vec::new();

    for &root in order {
        if !visited.insert(root) {
            continue;
        }
        on_stack.insert(root);
        path.push(root);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (node, cursor) = *frame;
            let outgoing = edges.get(node).map(Vec::as_slice).unwrap_or_default();
            let Some(&next) = outgoing.get(cursor) else {
                frames.pop();
                path.pop();
                on_stack.remove(node);
                continue;
            };
            frame.1 += 1;

            if on_stack.contains(next) {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut ring: Vec<&str> = path[start..].to_vec();
                ring.push(next);
                cycles.push(format!(
                    "Circular dependency detected: {}",
                    ring.join(" -> ")
                ));
            } else if visited.insert(next) {
                on_stack.insert(next);
                path.push(next);
                frames.push((next, 0));
            }
        }
    }
    cycles
}
