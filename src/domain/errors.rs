//! Domain errors for workflow graphs.

use thiserror::Error;

use super::models::task::{TaskId, TaskState};

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[TaskId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}

/// Structural errors raised while building or mutating a workflow graph.
///
/// These are always fatal to the operation that raised them and leave the
/// graph unchanged; they never abort a run in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    Cycle(Vec<TaskId>),

    #[error("Task {task} depends on unknown task {missing}")]
    DanglingDependency { task: TaskId, missing: TaskId },

    #[error("Task {0} depends on itself")]
    SelfDependency(TaskId),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Cannot remove task {task}: unexecuted dependents {}", format_ids(.dependents))]
    HasDependents { task: TaskId, dependents: Vec<TaskId> },

    #[error("Cannot remove task {task} while it is {state}")]
    TaskInFlight { task: TaskId, state: TaskState },

    #[error("Invalid state transition for {task} from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },
}

pub type GraphResult<T> = Result<T, GraphError>;
