//! Task failure classification surfaced to the task lifecycle manager.

use std::fmt;

use thiserror::Error;

use crate::task::TaskKind;

/// Semantic failure categories. The task manager maps these onto its own
/// retry policy and user-visible error surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskErrorKind {
    /// The resolver could not materialize the task's dependencies.
    DependencyResolutionFailed,
    /// The task was explicitly cancelled, at whatever stage it was in.
    TaskCancelled,
    /// The broker gave up because the runtime environment failed to build.
    RuntimeEnvSetupFailed,
    /// The placement group the task was bound to no longer exists.
    TaskPlacementGroupRemoved,
    /// Placement-group removal observed on an actor-creation task.
    ActorPlacementGroupRemoved,
    /// The broker determined the task can never be scheduled.
    TaskUnschedulable,
    /// The local broker stopped responding. Only surfaced by driver
    /// processes; workers exit instead.
    LocalBrokerDied,
    /// The push failed and the broker had no authoritative cause.
    WorkerDied,
    /// The failure-cause lookup itself failed; the whole node is presumed
    /// gone.
    NodeDied,
    /// The executor reported a retryable application exception.
    TaskExecutionException,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskErrorKind::DependencyResolutionFailed => "dependency-resolution-failed",
            TaskErrorKind::TaskCancelled => "task-cancelled",
            TaskErrorKind::RuntimeEnvSetupFailed => "runtime-env-setup-failed",
            TaskErrorKind::TaskPlacementGroupRemoved => "task-placement-group-removed",
            TaskErrorKind::ActorPlacementGroupRemoved => "actor-placement-group-removed",
            TaskErrorKind::TaskUnschedulable => "task-unschedulable",
            TaskErrorKind::LocalBrokerDied => "local-broker-died",
            TaskErrorKind::WorkerDied => "worker-died",
            TaskErrorKind::NodeDied => "node-died",
            TaskErrorKind::TaskExecutionException => "task-execution-exception",
        };
        f.write_str(name)
    }
}

/// Structured detail attached to a failure report.
#[derive(Debug, Clone)]
pub struct TaskErrorInfo {
    pub kind: TaskErrorKind,
    pub message: String,
}

/// Error returned by [`crate::submitter::TaskSubmitter::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("cannot submit {0:?} task; only normal and actor-creation tasks are accepted")]
    UnsupportedKind(TaskKind),
}
