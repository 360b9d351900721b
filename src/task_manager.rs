//! Task lifecycle manager seam.
//!
//! Pending/finished bookkeeping, the retry policy, and per-task metrics
//! live outside this crate; the submitter reports task fate through this
//! trait. Calls are synchronous and in-process.

use crate::error::{TaskErrorInfo, TaskErrorKind};
use crate::ids::{NodeId, TaskId, WorkerId};
use crate::rpc::{PushTaskReply, WorkerAddress};

pub trait TaskManager: Send + Sync {
    /// The resolver finished (successfully or not) for this task.
    fn mark_dependencies_resolved(&self, task_id: TaskId);

    /// The task was handed to a worker and awaits execution.
    fn mark_task_waiting_for_execution(&self, task_id: TaskId, node_id: NodeId, worker_id: WorkerId);

    /// Record a cancellation request against the task.
    fn mark_task_canceled(&self, task_id: TaskId);

    fn is_task_pending(&self, task_id: TaskId) -> bool;

    /// Apply the retry policy to a failed task. Returns true when a retry
    /// was scheduled, false when the task was failed terminally.
    #[allow(clippy::too_many_arguments)]
    fn fail_or_retry_pending_task(
        &self,
        task_id: TaskId,
        kind: TaskErrorKind,
        execution_status: Option<String>,
        info: Option<TaskErrorInfo>,
        mark_task_object_failed: bool,
        fail_immediately: bool,
    ) -> bool;

    /// Fail the task terminally, bypassing the retry policy.
    fn fail_pending_task(&self, task_id: TaskId, kind: TaskErrorKind, info: Option<TaskErrorInfo>);

    /// Offer the manager a retry for a retryable application exception.
    /// Returns true when the retry was accepted.
    fn retry_task_if_possible(&self, task_id: TaskId, info: TaskErrorInfo) -> bool;

    /// The task finished; the reply carries its outputs and error flags.
    fn complete_pending_task(
        &self,
        task_id: TaskId,
        reply: PushTaskReply,
        worker_addr: WorkerAddress,
        is_application_error: bool,
    );

    /// Resubmit a generator task whose produced objects are being
    /// recovered.
    fn mark_generator_failed_and_resubmit(&self, task_id: TaskId);
}
