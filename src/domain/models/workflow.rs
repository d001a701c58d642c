//! Workflow graph: a DAG of task nodes plus per-node state.
//!
//! Nodes live in an arena keyed by [`TaskId`]. Each node's execution level is
//! computed once, on insertion, as one more than the highest level among its
//! predecessors. For a static graph this is exactly the layering produced by
//! Kahn's algorithm. Because a node may only depend on nodes that already
//! exist, and a node may only be removed when nothing depends on it, no
//! mutation ever changes the level of another node.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::errors::{GraphError, GraphResult};

use super::report::{FailureReport, NodeOutcome, RunState};
use super::task::{TaskId, TaskNode, TaskState};

/// What happens to the rest of the run when a node fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip every unexecuted node; no further level starts.
    #[default]
    FailFast,
    /// Skip only the failed node's descendants; independent branches continue.
    BestEffort,
}

/// How nodes inside one level are dispatched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One node at a time, in level order with ascending-id ties.
    Sequential,
    /// Every node of a level at once. Under fail-fast, nodes already
    /// dispatched in the batch run to completion when a sibling fails.
    #[default]
    Parallel,
    /// A level at a time, at most `max_parallel` nodes per batch.
    Hybrid,
}

impl ExecutionStrategy {
    /// Split one level's ids into dispatch batches. Order is preserved.
    pub fn batches(self, level: Vec<TaskId>, max_parallel: usize) -> Vec<Vec<TaskId>> {
        if level.is_empty() {
            return Vec::new();
        }
        match self {
            Self::Sequential => level.into_iter().map(|id| vec![id]).collect(),
            Self::Parallel => vec![level],
            Self::Hybrid => level
                .chunks(max_parallel.max(1))
                .map(<[TaskId]>::to_vec)
                .collect(),
        }
    }
}

/// Task list handed over by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDecomposition {
    pub tasks: Vec<TaskNode>,
    #[serde(default, alias = "coordination_strategy", skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategy>,
}

impl TaskDecomposition {
    pub const fn new(tasks: Vec<TaskNode>) -> Self {
        Self {
            tasks,
            strategy: None,
        }
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

#[derive(Debug, Clone)]
struct Slot {
    node: TaskNode,
    level: usize,
    dependents: BTreeSet<TaskId>,
}

/// A directed acyclic graph of task nodes owned by one run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    slots: BTreeMap<TaskId, Slot>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a full decomposition.
    ///
    /// Rejects duplicate ids, self-dependencies, dependencies on ids outside
    /// the decomposition and cycles. Levels come from layered Kahn ordering.
    pub fn from_decomposition(tasks: Vec<TaskNode>) -> GraphResult<Self> {
        let mut by_id: BTreeMap<TaskId, TaskNode> = BTreeMap::new();
        for task in tasks {
            if task.dependencies.contains(&task.id) {
                return Err(GraphError::SelfDependency(task.id));
            }
            if by_id.contains_key(&task.id) {
                return Err(GraphError::DuplicateTask(task.id));
            }
            by_id.insert(task.id.clone(), task);
        }

        for task in by_id.values() {
            if let Some(missing) = task.dependencies.iter().find(|d| !by_id.contains_key(*d)) {
                return Err(GraphError::DanglingDependency {
                    task: task.id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        let levels = kahn_levels(&by_id)
            .map_err(|stuck| GraphError::Cycle(find_cycle(&by_id, &stuck)))?;

        let mut graph = Self::new();
        for (depth, level) in levels.into_iter().enumerate() {
            for id in level {
                if let Some(node) = by_id.remove(&id) {
                    graph.insert_slot(node, depth);
                }
            }
        }
        graph.settle();
        Ok(graph)
    }

    fn insert_slot(&mut self, mut node: TaskNode, level: usize) {
        node.state = TaskState::Pending;
        node.result = None;
        node.quality = None;
        node.failure = None;
        node.retry_count = 0;
        for dep in &node.dependencies {
            if let Some(slot) = self.slots.get_mut(dep) {
                slot.dependents.insert(node.id.clone());
            }
        }
        self.slots.insert(
            node.id.clone(),
            Slot {
                node,
                level,
                dependents: BTreeSet::new(),
            },
        );
    }

    /// Add a node to a live graph.
    ///
    /// Every dependency must already exist. Existing nodes keep their state
    /// and level. The new node starts `Ready` when all predecessors already
    /// completed, and `Skipped` when one of them can no longer complete.
    pub fn add_node(&mut self, node: TaskNode) -> GraphResult<()> {
        if self.slots.contains_key(&node.id) {
            return Err(GraphError::DuplicateTask(node.id));
        }
        if node.dependencies.contains(&node.id) {
            return Err(GraphError::SelfDependency(node.id));
        }
        if let Some(missing) = node.dependencies.iter().find(|d| !self.slots.contains_key(*d)) {
            return Err(GraphError::DanglingDependency {
                task: node.id.clone(),
                missing: missing.clone(),
            });
        }

        let level = node
            .dependencies
            .iter()
            .filter_map(|d| self.slots.get(d))
            .map(|slot| slot.level + 1)
            .max()
            .unwrap_or(0);

        let id = node.id.clone();
        self.insert_slot(node, level);
        self.settle_node(&id);
        Ok(())
    }

    /// Remove a node that nothing depends on and that is not running.
    pub fn remove_node(&mut self, id: &TaskId) -> GraphResult<TaskNode> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| GraphError::TaskNotFound(id.clone()))?;

        if slot.node.state == TaskState::Running {
            return Err(GraphError::TaskInFlight {
                task: id.clone(),
                state: slot.node.state,
            });
        }
        if !slot.dependents.is_empty() {
            return Err(GraphError::HasDependents {
                task: id.clone(),
                dependents: slot.dependents.iter().cloned().collect(),
            });
        }

        let slot = self
            .slots
            .remove(id)
            .ok_or_else(|| GraphError::TaskNotFound(id.clone()))?;
        for dep in &slot.node.dependencies {
            if let Some(parent) = self.slots.get_mut(dep) {
                parent.dependents.remove(id);
            }
        }
        Ok(slot.node)
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.slots.get(id).map(|s| &s.node)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.slots.values().map(|s| &s.node)
    }

    pub fn level_of(&self, id: &TaskId) -> Option<usize> {
        self.slots.get(id).map(|s| s.level)
    }

    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.slots
            .get(id)
            .map(|s| s.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Execution levels, each sorted by ascending id.
    pub fn levels(&self) -> Vec<Vec<TaskId>> {
        let mut grouped: BTreeMap<usize, Vec<TaskId>> = BTreeMap::new();
        for (id, slot) in &self.slots {
            grouped.entry(slot.level).or_default().push(id.clone());
        }
        grouped.into_values().collect()
    }

    /// Deterministic topological order: level by level, ascending id within a level.
    pub fn topological_order(&self) -> Vec<TaskId> {
        self.levels().into_iter().flatten().collect()
    }

    /// Lowest level that still holds a non-terminal node, with that level's
    /// `Ready` nodes in ascending id order.
    pub fn next_runnable(&self) -> Option<(usize, Vec<TaskId>)> {
        let level = self
            .slots
            .values()
            .filter(|s| !s.node.state.is_terminal())
            .map(|s| s.level)
            .min()?;
        let ready = self
            .slots
            .iter()
            .filter(|(_, s)| s.level == level && s.node.state == TaskState::Ready)
            .map(|(id, _)| id.clone())
            .collect();
        Some((level, ready))
    }

    pub fn is_finished(&self) -> bool {
        self.slots.values().all(|s| s.node.state.is_terminal())
    }

    fn transition(&mut self, id: &TaskId, to: TaskState) -> GraphResult<&mut TaskNode> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| GraphError::TaskNotFound(id.clone()))?;
        let from = slot.node.state;
        if !from.can_transition_to(to) {
            return Err(GraphError::InvalidTransition {
                task: id.clone(),
                from,
                to,
            });
        }
        slot.node.state = to;
        Ok(&mut slot.node)
    }

    pub fn mark_running(&mut self, id: &TaskId) -> GraphResult<()> {
        self.transition(id, TaskState::Running).map(|_| ())
    }

    /// Record a successful result and promote dependents whose predecessors
    /// have all completed.
    pub fn complete(&mut self, id: &TaskId, result: Value) -> GraphResult<Vec<TaskId>> {
        self.transition(id, TaskState::Completed)?.result = Some(result);
        let dependents = self.dependents_of(id);
        Ok(dependents
            .into_iter()
            .filter(|d| self.settle_node(d) == Some(TaskState::Ready))
            .collect())
    }

    pub fn fail(&mut self, id: &TaskId, failure: FailureReport) -> GraphResult<()> {
        self.transition(id, TaskState::Failed)?.failure = Some(failure);
        Ok(())
    }

    /// Mutable access for bookkeeping fields (retry count, quality result).
    pub(crate) fn node_mut(&mut self, id: &TaskId) -> Option<&mut TaskNode> {
        self.slots.get_mut(id).map(|s| &mut s.node)
    }

    /// Skip every unexecuted descendant of `id`.
    pub fn skip_descendants(&mut self, id: &TaskId) -> Vec<TaskId> {
        let mut skipped = Vec::new();
        let mut queue: VecDeque<TaskId> = self.dependents_of(id).into();
        let mut seen = BTreeSet::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(slot) = self.slots.get_mut(&next) {
                if slot.node.state.is_unexecuted() {
                    slot.node.state = TaskState::Skipped;
                    skipped.push(next.clone());
                }
                queue.extend(slot.dependents.iter().cloned());
            }
        }
        skipped.sort();
        skipped
    }

    /// Skip every node that has not been dispatched yet.
    pub fn skip_unexecuted(&mut self) -> Vec<TaskId> {
        let mut skipped = Vec::new();
        for (id, slot) in &mut self.slots {
            if slot.node.state.is_unexecuted() {
                slot.node.state = TaskState::Skipped;
                skipped.push(id.clone());
            }
        }
        skipped
    }

    /// Resolve `Pending` nodes whose predecessors are all terminal.
    ///
    /// Walks nodes in level order so chains resolve in one pass.
    pub fn settle(&mut self) -> Vec<(TaskId, TaskState)> {
        let order = self.topological_order();
        order
            .into_iter()
            .filter_map(|id| self.settle_node(&id).map(|state| (id, state)))
            .collect()
    }

    fn settle_node(&mut self, id: &TaskId) -> Option<TaskState> {
        let slot = self.slots.get(id)?;
        if slot.node.state != TaskState::Pending {
            return None;
        }
        let mut all_completed = true;
        for dep in &slot.node.dependencies {
            match self.slots.get(dep).map(|s| s.node.state) {
                Some(TaskState::Completed) => {}
                Some(TaskState::Failed | TaskState::Skipped) => all_completed = false,
                _ => return None,
            }
        }
        let next = if all_completed {
            TaskState::Ready
        } else {
            TaskState::Skipped
        };
        if let Some(slot) = self.slots.get_mut(id) {
            slot.node.state = next;
        }
        Some(next)
    }

    /// Ids of nodes in `state`, ascending.
    pub fn ids_in(&self, state: TaskState) -> Vec<TaskId> {
        self.slots
            .iter()
            .filter(|(_, s)| s.node.state == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Overall outcome under `policy`.
    pub fn run_state(&self, policy: FailurePolicy) -> RunState {
        if self.slots.values().all(|s| s.node.state == TaskState::Completed) {
            return RunState::Completed;
        }
        let any_failed = self
            .slots
            .values()
            .any(|s| s.node.state == TaskState::Failed);
        if policy == FailurePolicy::FailFast && any_failed {
            return RunState::Failed;
        }
        let sink_completed = self
            .slots
            .values()
            .filter(|s| s.dependents.is_empty())
            .any(|s| s.node.state == TaskState::Completed);
        if sink_completed {
            RunState::PartialSuccess
        } else {
            RunState::Failed
        }
    }

    /// Final per-node records in topological order.
    pub fn outcomes(&self) -> Vec<NodeOutcome> {
        self.topological_order()
            .into_iter()
            .filter_map(|id| self.slots.get(&id))
            .map(|slot| NodeOutcome {
                id: slot.node.id.clone(),
                agent: slot.node.agent.clone(),
                state: slot.node.state,
                level: slot.level,
                retry_count: slot.node.retry_count,
                result: slot.node.result.clone(),
                quality: slot.node.quality.clone(),
                failure: slot.node.failure.clone(),
            })
            .collect()
    }
}

/// Layered Kahn ordering. On a cycle, returns the ids never assigned a level.
fn kahn_levels(nodes: &BTreeMap<TaskId, TaskNode>) -> Result<Vec<Vec<TaskId>>, Vec<TaskId>> {
    let mut in_degree: BTreeMap<&TaskId, usize> = nodes
        .iter()
        .map(|(id, node)| (id, node.dependencies.len()))
        .collect();
    let mut dependents: BTreeMap<&TaskId, Vec<&TaskId>> = BTreeMap::new();
    for (id, node) in nodes {
        for dep in &node.dependencies {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut levels = Vec::new();
    let mut frontier: Vec<&TaskId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut assigned = 0;

    while !frontier.is_empty() {
        frontier.sort();
        assigned += frontier.len();
        let mut next = Vec::new();
        for id in &frontier {
            for child in dependents.get(id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(*child);
                    }
                }
            }
        }
        levels.push(frontier.into_iter().cloned().collect());
        frontier = next;
    }

    if assigned == nodes.len() {
        Ok(levels)
    } else {
        Err(in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Walk predecessor edges from the first stuck node until an id repeats.
///
/// Every node left over by Kahn has at least one stuck predecessor, so the
/// walk always closes a cycle.
fn find_cycle(nodes: &BTreeMap<TaskId, TaskNode>, stuck: &[TaskId]) -> Vec<TaskId> {
    let stuck_set: BTreeSet<&TaskId> = stuck.iter().collect();
    let Some(start) = stuck.first() else {
        return Vec::new();
    };

    let mut path: Vec<TaskId> = Vec::new();
    let mut current = start.clone();
    loop {
        if let Some(pos) = path.iter().position(|id| id == &current) {
            let mut cycle = path.split_off(pos);
            cycle.push(current);
            return cycle;
        }
        path.push(current.clone());
        let next = nodes
            .get(&current)
            .and_then(|n| n.dependencies.iter().find(|d| stuck_set.contains(d)));
        match next {
            Some(dep) => current = dep.clone(),
            None => return path,
        }
    }
}
