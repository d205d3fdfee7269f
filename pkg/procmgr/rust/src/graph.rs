// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Dependency graph over process names.
//! Built once from the descriptor store and read-only afterwards. Readiness
//! queries are pure reads over a [`StateSnapshot`].

use crate::descriptor::{Condition, DescriptorStore};
use crate::error::{Result, SchedulerError};
use crate::state::{HealthStatus, ProcessStatus, StateSnapshot};
use std::collections::{BTreeMap, BTreeSet};

/// `from` waits for `to` to reach `condition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Condition,
}

impl Edge {
    pub fn is_satisfied(&self, snapshot: &StateSnapshot) -> bool {
        let Some(upstream) = snapshot.states.get(&self.to) else {
            return false;
        };
        match self.condition {
            Condition::Started => matches!(
                upstream.status,
                ProcessStatus::Running | ProcessStatus::Restarting | ProcessStatus::Completed
            ),
            Condition::CompletedAny => upstream.status == ProcessStatus::Completed,
            Condition::CompletedSuccessfully => {
                upstream.status == ProcessStatus::Completed && upstream.exit_code == Some(0)
            }
            Condition::Healthy => snapshot.health(&self.to) == HealthStatus::Healthy,
        }
    }

    /// True when no future transition of the upstream can satisfy this edge.
    pub fn is_unsatisfiable(&self, snapshot: &StateSnapshot, blocked: &BTreeSet<String>) -> bool {
        if self.is_satisfied(snapshot) {
            return false;
        }
        if blocked.contains(&self.to) {
            return true;
        }
        snapshot
            .status(&self.to)
            .is_some_and(ProcessStatus::is_terminal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Outgoing edges per process, sorted by target.
    edges: BTreeMap<String, Vec<Edge>>,
    dependents: BTreeMap<String, Vec<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    pub fn build(store: &DescriptorStore) -> Result<Self> {
        let mut edges: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for descriptor in store.iter() {
            let name = descriptor.name().to_string();
            dependents.entry(name.clone()).or_default();
            let outgoing = edges.entry(name.clone()).or_default();
            for dep in descriptor.dependencies() {
                if !store.contains(&dep.target) {
                    return Err(SchedulerError::UnknownDependency {
                        process: name,
                        dependency: dep.target.clone(),
                    });
                }
                outgoing.push(Edge {
                    from: name.clone(),
                    to: dep.target.clone(),
                    condition: dep.condition,
                });
            }
        }
        for outgoing in edges.values() {
            for edge in outgoing {
                dependents
                    .entry(edge.to.clone())
                    .or_default()
                    .push(edge.from.clone());
            }
        }

        let order = topological_order(&edges)?;
        Ok(Self {
            edges,
            dependents,
            order,
        })
    }

    pub fn dependencies(&self, name: &str) -> &[Edge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every process appears after all of its dependencies.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// True iff every dependency edge of `name` is satisfied in `snapshot`.
    pub fn ready_predecessors(&self, name: &str, snapshot: &StateSnapshot) -> bool {
        self.dependencies(name)
            .iter()
            .all(|edge| edge.is_satisfied(snapshot))
    }

    /// First edge of `name` that can never become satisfied, if any.
    pub fn blocking_dependency(
        &self,
        name: &str,
        snapshot: &StateSnapshot,
        blocked: &BTreeSet<String>,
    ) -> Option<&Edge> {
        self.dependencies(name)
            .iter()
            .find(|edge| edge.is_unsatisfiable(snapshot, blocked))
    }
}

fn topological_order(edges: &BTreeMap<String, Vec<Edge>>) -> Result<Vec<String>> {
    let mut colors: BTreeMap<&str, Color> =
        edges.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(edges.len());

    for root in edges.keys() {
        if colors[root.as_str()] == Color::White {
            visit(root, edges, &mut colors, &mut path, &mut order)?;
        }
    }
    Ok(order)
}

fn visit<'a>(
    node: &'a str,
    edges: &'a BTreeMap<String, Vec<Edge>>,
    colors: &mut BTreeMap<&'a str, Color>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<()> {
    colors.insert(node, Color::Gray);
    path.push(node);

    for edge in edges.get(node).into_iter().flatten() {
        match colors.get(edge.to.as_str()).copied().unwrap_or(Color::White) {
            Color::Gray => {
                let start = path.iter().position(|n| *n == edge.to).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(edge.to.clone());
                return Err(SchedulerError::CyclicDependency { cycle });
            }
            Color::White => visit(edge.to.as_str(), edges, colors, path, order)?,
            Color::Black => {}
        }
    }

    path.pop();
    colors.insert(node, Color::Black);
    order.push(node.to_string());
    Ok(())
}
