//! Authoritative failure-cause lookup for failed pushes.

use tonic::Status;
use tracing::warn;

use crate::error::{TaskErrorInfo, TaskErrorKind};
use crate::ids::TaskId;
use crate::rpc::{TaskFailureCauseReply, WorkerAddress};
use crate::submitter::TaskSubmitter;

impl TaskSubmitter {
    /// Consume the broker's verdict on why a pushed task failed and route
    /// it through the task manager's retry policy. Returns whether a retry
    /// was scheduled.
    pub(crate) fn handle_get_task_failure_cause(
        &self,
        task_id: TaskId,
        addr: &WorkerAddress,
        push_error: String,
        cause: Result<TaskFailureCauseReply, Status>,
    ) -> bool {
        let mut kind = TaskErrorKind::WorkerDied;
        let mut info: Option<TaskErrorInfo> = None;
        let mut fail_immediately = false;
        match cause {
            Ok(reply) => {
                warn!(
                    task_id = %task_id,
                    cause = ?reply.failure_cause,
                    fail_immediately = reply.fail_task_immediately,
                    "task failure cause received"
                );
                if let Some(cause) = reply.failure_cause {
                    kind = cause.kind;
                    info = Some(cause);
                }
                fail_immediately = reply.fail_task_immediately;
            }
            Err(status) => {
                // The broker itself is unreachable: presume the whole node
                // is gone.
                warn!(
                    task_id = %task_id,
                    node_id = %addr.node_id,
                    ip = %addr.ip,
                    error = %status,
                    "failed to fetch task failure cause"
                );
                kind = TaskErrorKind::NodeDied;
                info = Some(TaskErrorInfo {
                    kind,
                    message: format!(
                        "Task failed because the node it was running on is dead or \
                         unreachable.\n\nThe node IP: {ip}, node ID: {node}\n\nThis can happen \
                         when the instance hosting the node fails, the node is preempted, or \
                         the broker crashes unexpectedly (for example from out-of-memory). \
                         Check the cluster node list for node_id={node} to see its death \
                         record, and inspect the broker logs on {ip} for crash output.",
                        ip = addr.ip,
                        node = addr.node_id,
                    ),
                });
            }
        }
        self.task_manager.fail_or_retry_pending_task(
            task_id,
            kind,
            Some(push_error),
            info,
            true,
            fail_immediately,
        )
    }
}
