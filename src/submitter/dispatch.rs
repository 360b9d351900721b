//! Worker reuse: drive queued tasks onto idle leased workers, return
//! expired or unneeded workers, push tasks, and consume push replies.

use std::sync::Arc;

use tonic::Status;
use tracing::{debug, error};

use crate::error::{TaskErrorInfo, TaskErrorKind};
use crate::ids::TaskId;
use crate::rpc::{ExecutorClient, PushTaskReply, PushTaskRequest, ResourceMapEntry, WorkerAddress};
use crate::scheduling::SchedulingKey;
use crate::submitter::{gc_entry_if_possible, SubmitterState, TaskSubmitter};
use crate::task::TaskSpec;

impl TaskSubmitter {
    /// A leased worker became idle (fresh grant or finished push). Feed it
    /// the next queued task, or return it to its broker when it is no
    /// longer usable for this queue.
    pub(crate) fn on_worker_idle(
        self: &Arc<Self>,
        state: &mut SubmitterState,
        addr: &WorkerAddress,
        key: &SchedulingKey,
        was_error: bool,
        error_detail: String,
        worker_exiting: bool,
    ) {
        let Some(lease) = state.worker_to_lease_entry.get(addr) else {
            // Already returned.
            return;
        };
        let lease_expired = self.clock.monotonic_ms() > lease.lease_expiration_ms;
        let lease_busy = lease.is_busy;
        let queue_empty = state
            .scheduling_key_entries
            .get(key)
            .is_none_or(|entry| entry.task_queue.is_empty());

        if was_error || worker_exiting || lease_expired || queue_empty {
            // Return the worker only once it is not running anything.
            if !lease_busy {
                self.return_worker(state, addr, was_error, error_detail, worker_exiting, key);
            }
        } else {
            let client = self.executor_pool.get_or_connect(addr);
            // Normal workers run one task at a time; the loop stops at the
            // first busy slot.
            loop {
                let busy = match state.worker_to_lease_entry.get(addr) {
                    Some(lease) => lease.is_busy,
                    None => break,
                };
                if busy {
                    break;
                }
                let Some(mut spec) = state
                    .scheduling_key_entries
                    .get_mut(key)
                    .and_then(|entry| entry.task_queue.pop_front())
                else {
                    break;
                };
                if let Some(lease) = state.worker_to_lease_entry.get_mut(addr) {
                    lease.is_busy = true;
                }
                if let Some(entry) = state.scheduling_key_entries.get_mut(key) {
                    entry.num_busy_workers += 1;
                }
                spec.lease_grant_timestamp_ms = Some(self.clock.wall_ms());
                let queued_ms = spec
                    .dependency_resolution_timestamp_ms
                    .zip(spec.lease_grant_timestamp_ms)
                    .map(|(resolved, granted)| granted - resolved)
                    .unwrap_or_default();
                debug!(
                    task_id = %spec.task_id,
                    worker_id = %addr.worker_id,
                    queued_ms,
                    "dispatching task to leased worker"
                );
                let assigned_resources = state
                    .worker_to_lease_entry
                    .get(addr)
                    .map(|lease| lease.assigned_resources.clone())
                    .unwrap_or_default();
                state.executing_tasks.insert(spec.task_id, addr.clone());
                self.push_normal_task(addr, Arc::clone(&client), key, spec, assigned_resources);
            }
            self.cancel_worker_lease_if_needed(state, key);
        }
        self.request_new_worker_if_needed(state, key, None);
    }

    /// Hand a leased worker back to the broker that granted it. Errors on
    /// the return RPC are logged, never propagated.
    pub(crate) fn return_worker(
        &self,
        state: &mut SubmitterState,
        addr: &WorkerAddress,
        was_error: bool,
        error_detail: String,
        worker_exiting: bool,
        key: &SchedulingKey,
    ) {
        debug!(
            worker_id = %addr.worker_id,
            node_id = %addr.node_id,
            "returning worker to broker"
        );
        if let Some(entry) = state.scheduling_key_entries.get_mut(key) {
            entry.active_workers.remove(addr);
        }
        gc_entry_if_possible(state, key);
        let Some(lease) = state.worker_to_lease_entry.remove(addr) else {
            return;
        };
        debug_assert!(!lease.is_busy);
        let port = addr.port;
        let worker_id = addr.worker_id;
        tokio::spawn(async move {
            if let Err(status) = lease
                .broker_client
                .return_worker(port, worker_id, was_error, error_detail, worker_exiting)
                .await
            {
                error!(worker_id = %worker_id, error = %status, "error returning worker to broker");
            }
        });
    }

    /// Send one task to its worker and register the completion handler.
    pub(crate) fn push_normal_task(
        self: &Arc<Self>,
        addr: &WorkerAddress,
        client: Arc<dyn ExecutorClient>,
        key: &SchedulingKey,
        spec: TaskSpec,
        assigned_resources: Vec<ResourceMapEntry>,
    ) {
        debug!(
            task_id = %spec.task_id,
            worker_id = %addr.worker_id,
            node_id = %addr.node_id,
            "pushing task"
        );
        let task_id = spec.task_id;
        let is_actor_creation = spec.is_actor_creation();
        let retry_exceptions = spec.retry_exceptions;
        let request = PushTaskRequest {
            task_spec: spec,
            resource_mapping: assigned_resources,
            intended_worker_id: addr.worker_id,
        };
        self.task_manager
            .mark_task_waiting_for_execution(task_id, addr.node_id, addr.worker_id);

        let submitter = Arc::downgrade(self);
        let addr = addr.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = client.push_normal_task(request).await;
            let Some(submitter) = submitter.upgrade() else {
                return;
            };
            submitter.handle_push_reply(
                &addr,
                &key,
                task_id,
                is_actor_creation,
                retry_exceptions,
                result,
            );
        });
    }

    fn handle_push_reply(
        self: &Arc<Self>,
        addr: &WorkerAddress,
        key: &SchedulingKey,
        task_id: TaskId,
        is_actor_creation: bool,
        retry_exceptions: bool,
        result: Result<PushTaskReply, Status>,
    ) {
        debug!(
            task_id = %task_id,
            worker_id = %addr.worker_id,
            ok = result.is_ok(),
            "task push finished"
        );
        let resubmit_generator;
        {
            let mut state = self.state.lock().unwrap();
            state.executing_tasks.remove(&task_id);
            resubmit_generator = state.generators_to_resubmit.remove(&task_id);

            if let Some(lease) = state.worker_to_lease_entry.get_mut(addr) {
                debug_assert!(lease.is_busy);
                lease.is_busy = false;
            }
            if let Some(entry) = state.scheduling_key_entries.get_mut(key) {
                entry.num_busy_workers = entry.num_busy_workers.saturating_sub(1);
            }

            if let Err(status) = &result {
                // The broker that holds the lease has the authoritative
                // verdict on what happened to the worker.
                debug!(task_id = %task_id, "push failed; fetching failure cause from broker");
                let lease = state
                    .worker_to_lease_entry
                    .get(addr)
                    .map(|lease| (Arc::clone(&lease.broker_client), lease.lease_id));
                if let Some((broker, lease_id)) = lease {
                    state.failed_tasks_pending_failure_cause.insert(task_id);
                    let push_error = status.message().to_string();
                    let submitter = Arc::downgrade(self);
                    let cause_addr = addr.clone();
                    tokio::spawn(async move {
                        let cause = broker.get_task_failure_cause(lease_id).await;
                        let Some(submitter) = submitter.upgrade() else {
                            return;
                        };
                        let will_retry = submitter.handle_get_task_failure_cause(
                            task_id,
                            &cause_addr,
                            push_error,
                            cause,
                        );
                        let mut state = submitter.state.lock().unwrap();
                        if !will_retry {
                            // Submission and cancellation are the other two
                            // cleaners of this set; a task that will not be
                            // retried must be dropped here.
                            state.cancelled_tasks.remove(&task_id);
                        }
                        state.failed_tasks_pending_failure_cause.remove(&task_id);
                    });
                }
            }

            let worker_exiting = result
                .as_ref()
                .map(|reply| reply.worker_exiting)
                .unwrap_or(false);
            if result.is_err() || !is_actor_creation || worker_exiting {
                // A successful actor creation consumes the lease
                // indefinitely; every other outcome cycles the worker
                // through idle handling.
                let error_detail = result
                    .as_ref()
                    .err()
                    .map(|status| status.message().to_string())
                    .unwrap_or_default();
                self.on_worker_idle(
                    &mut state,
                    addr,
                    key,
                    result.is_err(),
                    error_detail,
                    worker_exiting,
                );
            }
        }

        if let Ok(reply) = result {
            if reply.was_cancelled_before_running {
                debug!(task_id = %task_id, "task was cancelled before it started running");
                self.task_manager
                    .fail_pending_task(task_id, TaskErrorKind::TaskCancelled, None);
            } else if resubmit_generator {
                self.task_manager.mark_generator_failed_and_resubmit(task_id);
            } else {
                let retried = retry_exceptions
                    && reply.is_retryable_error
                    && self.task_manager.retry_task_if_possible(
                        task_id,
                        TaskErrorInfo {
                            kind: TaskErrorKind::TaskExecutionException,
                            message: reply.task_execution_error.clone(),
                        },
                    );
                if !retried {
                    let is_application_error = reply.is_application_error;
                    self.task_manager.complete_pending_task(
                        task_id,
                        reply,
                        addr.clone(),
                        is_application_error,
                    );
                }
            }
        }
    }
}
