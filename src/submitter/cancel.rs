//! Cooperative task cancellation across every stage of submission.

use std::sync::Arc;
use std::time::Duration;

use tonic::Status;
use tracing::{debug, info};

use crate::error::TaskErrorKind;
use crate::ids::ObjectId;
use crate::rpc::{CancelTaskReply, CancelTaskRequest, RemoteCancelTaskRequest, WorkerAddress};
use crate::scheduling::SchedulingKey;
use crate::submitter::{gc_entry_if_possible, TaskSubmitter};
use crate::task::TaskSpec;

impl TaskSubmitter {
    /// Cancel the task wherever it currently is: resolving, queued,
    /// awaiting a lease, or executing. Idempotent; concurrent cancels of
    /// the same task coalesce.
    pub fn cancel_task(self: &Arc<Self>, spec: TaskSpec, force_kill: bool, recursive: bool) {
        info!(task_id = %spec.task_id, force_kill, recursive, "cancelling task");
        let key = SchedulingKey::of(&spec);
        let task_id = spec.task_id;
        let client;
        {
            let mut state = self.state.lock().unwrap();
            state.generators_to_resubmit.remove(&task_id);

            if state.cancelled_tasks.contains(&task_id) {
                // Already being cancelled.
                return;
            }

            self.task_manager.mark_task_canceled(task_id);
            if !self.task_manager.is_task_pending(task_id) {
                // Finished or already failed; the mark is enough.
                return;
            }

            // Queued awaiting a lease: drop it from the queue directly.
            let removed = state
                .scheduling_key_entries
                .get_mut(&key)
                .and_then(|entry| {
                    entry
                        .task_queue
                        .iter()
                        .position(|queued| queued.task_id == task_id)
                        .and_then(|pos| entry.task_queue.remove(pos))
                })
                .is_some();
            if removed {
                self.cancel_worker_lease_if_needed(&mut state, &key);
                drop(state);
                self.task_manager
                    .fail_pending_task(task_id, TaskErrorKind::TaskCancelled, None);
                return;
            }

            // Cleared by the cancel RPC reply, the resolution callback, or
            // the failure-cause path.
            state.cancelled_tasks.insert(task_id);

            match state.executing_tasks.get(&task_id) {
                None => {
                    // Mid-resolution or mid-failure. A task whose failure
                    // cause is being fetched is left for that path to
                    // finish.
                    let fail_now = !state.failed_tasks_pending_failure_cause.contains(&task_id);
                    if fail_now {
                        self.resolver.cancel_resolution(task_id);
                    }
                    gc_entry_if_possible(&mut state, &key);
                    drop(state);
                    if fail_now {
                        self.task_manager.fail_pending_task(
                            task_id,
                            TaskErrorKind::TaskCancelled,
                            None,
                        );
                    }
                    return;
                }
                Some(addr) => {
                    client = self.executor_pool.get_or_connect(addr);
                }
            }
        }

        let request = CancelTaskRequest {
            intended_task_id: task_id,
            force_kill,
            recursive,
            caller_worker_id: spec.caller_worker_id,
        };
        let submitter = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = client.cancel_task(request).await;
            let Some(submitter) = submitter.upgrade() else {
                return;
            };
            submitter.handle_cancel_reply(spec, force_kill, recursive, result);
        });
    }

    fn handle_cancel_reply(
        self: &Arc<Self>,
        spec: TaskSpec,
        force_kill: bool,
        recursive: bool,
        result: Result<CancelTaskReply, Status>,
    ) {
        let task_id = spec.task_id;
        let mut state = self.state.lock().unwrap();
        debug!(task_id = %task_id, ok = result.is_ok(), "cancel RPC response received");
        state.cancelled_tasks.remove(&task_id);

        let reply = match result {
            Ok(reply) => reply,
            Err(status) => {
                // Force-kill may take the worker down before it can reply;
                // no retry.
                debug!(task_id = %task_id, error = %status, "failed to deliver cancel");
                return;
            }
        };
        if reply.attempt_succeeded {
            return;
        }
        if !reply.requested_task_running {
            debug!(task_id = %task_id, "worker does not have this task");
            return;
        }

        // The worker could not interrupt the task yet. Retry on the shared
        // timer slot so a burst of cancels cannot stampede the executor.
        let now = self.clock.monotonic_ms();
        if state.cancel_retry_deadline_ms <= now {
            state.cancel_retry_deadline_ms = now + self.config.cancellation_retry_ms;
        }
        let delay_ms = (state.cancel_retry_deadline_ms - now).max(0) as u64;
        drop(state);
        let submitter = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let Some(submitter) = submitter.upgrade() else {
                return;
            };
            submitter.cancel_task(spec, force_kill, recursive);
        });
    }

    /// Fire-and-forget cancel of a task running on a remote worker,
    /// identified by one of its return objects.
    pub fn cancel_remote_task(
        &self,
        object_id: ObjectId,
        worker_addr: &WorkerAddress,
        force_kill: bool,
        recursive: bool,
    ) {
        let client = self.executor_pool.get_or_connect(worker_addr);
        let request = RemoteCancelTaskRequest {
            remote_object_id: object_id,
            force_kill,
            recursive,
        };
        tokio::spawn(async move {
            if let Err(status) = client.remote_cancel_task(request).await {
                debug!(error = %status, "remote cancel failed");
            }
        });
    }

    /// Mark a generator task for resubmission once its in-flight push
    /// returns. Refused when the task is being cancelled.
    pub fn queue_generator_for_resubmit(&self, spec: &TaskSpec) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.cancelled_tasks.contains(&spec.task_id) {
            return false;
        }
        state.generators_to_resubmit.insert(spec.task_id);
        true
    }
}
