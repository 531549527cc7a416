//! Dependency graph and the invalidation sweep.

use super::controller::StageController;
use crate::core::{StageId, StageStatus, Transition};
use crate::errors::CycleDetectedError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// The stage dependency graph with a fixed topological order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    dependencies: BTreeMap<StageId, Vec<StageId>>,
    order: Vec<StageId>,
}

impl DependencyGraph {
    /// Builds the pipeline's fixed graph.
    pub fn standard() -> Result<Self, CycleDetectedError> {
        Self::from_edges(
            StageId::ALL
                .iter()
                .map(|stage| (*stage, stage.dependencies().to_vec())),
        )
    }

    /// Builds a graph from `(stage, dependencies)` pairs.
    ///
    /// Stages are ordered deterministically: a stage comes after all of its
    /// dependencies, ties broken by the order the stages were given in.
    pub fn from_edges(
        edges: impl IntoIterator<Item = (StageId, Vec<StageId>)>,
    ) -> Result<Self, CycleDetectedError> {
        let mut dependencies = BTreeMap::new();
        let mut insertion = Vec::new();
        for (stage, deps) in edges {
            if dependencies.insert(stage, deps).is_none() {
                insertion.push(stage);
            }
        }
        // Stages only named as dependencies still belong to the graph.
        let referenced: Vec<StageId> = dependencies.values().flatten().copied().collect();
        for stage in referenced {
            if !dependencies.contains_key(&stage) {
                dependencies.insert(stage, Vec::new());
                insertion.push(stage);
            }
        }

        let graph = Self {
            dependencies,
            order: Vec::new(),
        };
        graph.detect_cycles(&insertion)?;
        let order = graph.topological_sort(&insertion);
        Ok(Self { order, ..graph })
    }

    /// Returns every stage in topological order.
    #[must_use]
    pub fn order(&self) -> &[StageId] {
        &self.order
    }

    /// Returns the direct dependencies of a stage.
    #[must_use]
    pub fn dependencies(&self, stage: StageId) -> &[StageId] {
        self.dependencies
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the stages that directly depend on a stage.
    #[must_use]
    pub fn dependents(&self, stage: StageId) -> Vec<StageId> {
        self.order
            .iter()
            .copied()
            .filter(|s| self.dependencies(*s).contains(&stage))
            .collect()
    }

    /// Returns all transitive dependents of a stage in topological order.
    #[must_use]
    pub fn descendants(&self, stage: StageId) -> Vec<StageId> {
        let mut reached = BTreeSet::from([stage]);
        let mut result = Vec::new();
        // A single pass suffices: dependencies always precede dependents.
        for candidate in &self.order {
            if *candidate == stage {
                continue;
            }
            if self.dependencies(*candidate).iter().any(|d| reached.contains(d)) {
                reached.insert(*candidate);
                result.push(*candidate);
            }
        }
        result
    }

    fn detect_cycles(&self, insertion: &[StageId]) -> Result<(), CycleDetectedError> {
        let mut visited = BTreeSet::new();
        let mut on_stack = BTreeSet::new();
        let mut path = Vec::new();

        for stage in insertion {
            if !visited.contains(stage) {
                if let Some(cycle) = self.dfs_cycle(*stage, &mut visited, &mut on_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: StageId,
        visited: &mut BTreeSet<StageId>,
        on_stack: &mut BTreeSet<StageId>,
        path: &mut Vec<StageId>,
    ) -> Option<Vec<StageId>> {
        visited.insert(node);
        on_stack.insert(node);
        path.push(node);

        for dep in self.dependencies(node) {
            if !visited.contains(dep) {
                if let Some(cycle) = self.dfs_cycle(*dep, visited, on_stack, path) {
                    return Some(cycle);
                }
            } else if on_stack.contains(dep) {
                let start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(*dep);
                return Some(cycle);
            }
        }

        path.pop();
        on_stack.remove(&node);
        None
    }

    fn topological_sort(&self, insertion: &[StageId]) -> Vec<StageId> {
        fn visit(
            node: StageId,
            graph: &DependencyGraph,
            visited: &mut BTreeSet<StageId>,
            result: &mut Vec<StageId>,
        ) {
            if !visited.insert(node) {
                return;
            }
            for dep in graph.dependencies(node) {
                visit(*dep, graph, visited, result);
            }
            result.push(node);
        }

        let mut result = Vec::with_capacity(insertion.len());
        let mut visited = BTreeSet::new();
        for stage in insertion {
            visit(*stage, self, &mut visited, &mut result);
        }
        result
    }
}

/// Resets downstream stages when an upstream result changes.
#[derive(Debug, Clone)]
pub struct InvalidationCoordinator {
    graph: DependencyGraph,
}

impl InvalidationCoordinator {
    /// Creates a coordinator over a graph.
    #[must_use]
    pub fn new(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Returns true if this transition requires a sweep.
    #[must_use]
    pub fn should_sweep(transition: &Transition) -> bool {
        transition.changes_result()
    }

    /// Resets every descendant of `origin`, in topological order, in one
    /// pass.
    ///
    /// `controllers` is indexed by [`StageId::index`]. Returns the
    /// transitions of the stages that were not already idle. Resets done here
    /// never start further sweeps.
    pub fn sweep(&self, origin: StageId, controllers: &mut [StageController]) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for stage in self.graph.descendants(origin) {
            let Some(controller) = controllers.get_mut(stage.index()) else {
                continue;
            };
            if controller.state().status() == StageStatus::Idle
                && controller.outstanding().is_none()
            {
                continue;
            }
            transitions.push(controller.reset());
        }

        if transitions.is_empty() {
            debug!(origin = %origin, "Nothing to invalidate");
        } else {
            let reset: Vec<&str> = transitions.iter().map(|t| t.stage.as_str()).collect();
            info!(origin = %origin, ?reset, "Invalidated downstream stages");
        }
        transitions
    }
}
