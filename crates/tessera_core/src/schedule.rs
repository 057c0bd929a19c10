//! Dependency scheduling.
//!
//! The graph covers active instances only. Scheduling produces ordered
//! batches: every instance lands in exactly one batch, after all of its
//! dependencies, and members of a batch do not depend on each other. Batch
//! contents are sorted so the same graph always yields the same plan.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::error::CycleError;
use crate::instance::InstanceId;
use crate::resolve::DependencyEdge;

/// Ordered execution batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub batches: Vec<Vec<InstanceId>>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn instance_count(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }

    /// Position of the batch containing `id`.
    pub fn batch_of(&self, id: &InstanceId) -> Option<usize> {
        self.batches.iter().position(|b| b.contains(id))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Directed graph of active instances.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<InstanceId>,
    dependencies: BTreeMap<InstanceId, BTreeSet<InstanceId>>,
    dependents: BTreeMap<InstanceId, BTreeSet<InstanceId>>,
}

impl DependencyGraph {
    /// Build the graph. Edges touching unknown nodes are ignored.
    pub fn new(nodes: impl IntoIterator<Item = InstanceId>, edges: &[DependencyEdge]) -> Self {
        let nodes: BTreeSet<InstanceId> = nodes.into_iter().collect();
        let mut dependencies: BTreeMap<InstanceId, BTreeSet<InstanceId>> = BTreeMap::new();
        let mut dependents: BTreeMap<InstanceId, BTreeSet<InstanceId>> = BTreeMap::new();

        for edge in edges {
            if !nodes.contains(&edge.from) || !nodes.contains(&edge.to) {
                continue;
            }
            dependencies
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
            dependents
                .entry(edge.to.clone())
                .or_default()
                .insert(edge.from.clone());
        }

        Self {
            nodes,
            dependencies,
            dependents,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &InstanceId> {
        self.nodes.iter()
    }

    pub fn dependencies_of(&self, id: &InstanceId) -> impl Iterator<Item = &InstanceId> {
        self.dependencies.get(id).into_iter().flatten()
    }

    pub fn dependents_of(&self, id: &InstanceId) -> impl Iterator<Item = &InstanceId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Every instance that depends on `id`, directly or through others.
    pub fn transitive_dependents(&self, id: &InstanceId) -> BTreeSet<InstanceId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&InstanceId> = self.dependents_of(id).collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents_of(next));
            }
        }
        seen.remove(id);
        seen
    }

    /// Fail with the members of the first cycle found, if any.
    pub fn detect_cycle(&self) -> Result<(), CycleError> {
        let mut marks: HashMap<&InstanceId, Mark> = HashMap::new();
        let mut stack: Vec<&InstanceId> = Vec::new();

        for node in &self.nodes {
            self.visit(node, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    fn visit<'g>(
        &'g self,
        node: &'g InstanceId,
        marks: &mut HashMap<&'g InstanceId, Mark>,
        stack: &mut Vec<&'g InstanceId>,
    ) -> Result<(), CycleError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                return Err(CycleError {
                    members: stack[start..].iter().map(|n| (*n).clone()).collect(),
                });
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        stack.push(node);
        for dependency in self.dependencies_of(node) {
            self.visit(dependency, marks, stack)?;
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    /// Produce layered batches, or the cycle that prevents ordering.
    pub fn plan(&self) -> Result<Plan, CycleError> {
        self.detect_cycle()?;

        let mut remaining: BTreeMap<&InstanceId, usize> = self
            .nodes
            .iter()
            .map(|n| (n, self.dependencies_of(n).count()))
            .collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<InstanceId> = remaining
                .iter()
                .filter(|(_, pending)| **pending == 0)
                .map(|(n, _)| (*n).clone())
                .collect();

            if ready.is_empty() {
                return Err(CycleError {
                    members: remaining.keys().map(|n| (*n).clone()).collect(),
                });
            }

            for node in &ready {
                remaining.remove(node);
                for dependent in self.dependents_of(node) {
                    if let Some(pending) = remaining.get_mut(dependent) {
                        *pending -= 1;
                    }
                }
            }
            batches.push(ready);
        }

        debug!(
            "Scheduled {} instance(s) into {} batch(es)",
            self.nodes.len(),
            batches.len()
        );
        Ok(Plan { batches })
    }
}
