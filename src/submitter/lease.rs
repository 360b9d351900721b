//! Lease request engine: decides when to ask a broker for workers and
//! consumes every reply variant.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tonic::{Code, Status};
use tracing::{debug, error, info, warn};

use crate::error::{TaskErrorInfo, TaskErrorKind};
use crate::ids::TaskId;
use crate::rpc::{
    BrokerClient, LeaseReply, NodeAddress, ResourceMapEntry, SchedulingFailureType, WorkerAddress,
};
use crate::scheduling::{LeaseEntry, SchedulingKey};
use crate::settings::WorkerKind;
use crate::submitter::{gc_entry_if_possible, SubmitterState, TaskSubmitter};
use crate::task::TaskSpec;

impl TaskSubmitter {
    /// Request another worker lease for `key` when demand warrants one.
    ///
    /// `broker_hint` is set when a broker redirected (spilled back) a
    /// prior request; the retry is then sent grant-or-reject to the hinted
    /// node. With no hint the lease policy picks the node.
    pub(crate) fn request_new_worker_if_needed(
        self: &Arc<Self>,
        state: &mut SubmitterState,
        key: &SchedulingKey,
        broker_hint: Option<&NodeAddress>,
    ) {
        let max_pending = self
            .rate_limiter
            .max_pending_lease_requests_per_scheduling_category();

        let (resource_spec, queue_size) = {
            let Some(entry) = state.scheduling_key_entries.get(key) else {
                return;
            };
            if entry.pending_lease_requests.len() >= max_pending {
                debug!(limit = max_pending, "pending lease requests at limit");
                return;
            }
            if !entry.all_workers_busy() {
                // An idle leased worker will drain the queue; reuse beats
                // leasing.
                return;
            }
            if entry.task_queue.is_empty() {
                if entry.can_delete() {
                    state.scheduling_key_entries.remove(key);
                }
                return;
            }
            if entry.task_queue.len() <= entry.pending_lease_requests.len() {
                // Every queued task already has a lease request in flight.
                return;
            }
            (entry.resource_spec.clone(), entry.task_queue.len() as i64)
        };

        self.num_leases_requested.fetch_add(1, Ordering::Relaxed);

        // Fresh id per request: lease ids must never collide with user
        // task ids or with prior lease ids.
        let mut resource_spec = resource_spec;
        resource_spec.task_id = TaskId::random();
        let lease_id = resource_spec.task_id;
        let task_name = resource_spec.name.clone();

        let is_spillback = broker_hint.is_some();
        let (node_addr, selected_by_locality) = match broker_hint {
            Some(addr) => (addr.clone(), false),
            None => self.lease_policy.best_node_for_task(&resource_spec),
        };

        let client = self.broker_client_for(state, &node_addr);
        debug!(
            lease_id = %lease_id,
            node_id = %node_addr.node_id,
            spillback = is_spillback,
            "requesting worker lease"
        );
        if let Some(entry) = state.scheduling_key_entries.get_mut(key) {
            entry
                .pending_lease_requests
                .insert(lease_id, node_addr.clone());
        }

        let submitter = Arc::downgrade(self);
        let reply_key = key.clone();
        let reply_addr = node_addr.clone();
        tokio::spawn(async move {
            let result = client
                .request_worker_lease(resource_spec, is_spillback, queue_size, selected_by_locality)
                .await;
            let Some(submitter) = submitter.upgrade() else {
                return;
            };
            submitter.handle_lease_reply(
                &reply_key,
                lease_id,
                &reply_addr,
                is_spillback,
                task_name,
                result,
            );
        });

        self.report_worker_backlog_if_needed(state, key);

        // Keep requesting while demand outruns in-flight leases.
        let more_needed = state.scheduling_key_entries.get(key).is_some_and(|entry| {
            entry.task_queue.len() > entry.pending_lease_requests.len()
                && entry.pending_lease_requests.len() < max_pending
        });
        if more_needed {
            self.request_new_worker_if_needed(state, key, None);
        }
    }

    fn handle_lease_reply(
        self: &Arc<Self>,
        key: &SchedulingKey,
        lease_id: TaskId,
        node_addr: &NodeAddress,
        is_spillback: bool,
        task_name: String,
        result: Result<LeaseReply, Status>,
    ) {
        let mut tasks_to_fail: VecDeque<TaskSpec> = VecDeque::new();
        let mut error_kind = TaskErrorKind::WorkerDied;
        let mut error_message = String::new();
        {
            let mut state = self.state.lock().unwrap();
            {
                let Some(entry) = state.scheduling_key_entries.get_mut(key) else {
                    return;
                };
                entry.pending_lease_requests.remove(&lease_id);
            }

            match result {
                Ok(LeaseReply::Canceled {
                    failure_type,
                    message,
                }) => {
                    debug!(lease_id = %lease_id, ?failure_type, "lease request canceled by broker");
                    match failure_type {
                        SchedulingFailureType::RuntimeEnvSetupFailed
                        | SchedulingFailureType::PlacementGroupRemoved
                        | SchedulingFailureType::Unschedulable => {
                            error_kind = match failure_type {
                                SchedulingFailureType::RuntimeEnvSetupFailed => {
                                    TaskErrorKind::RuntimeEnvSetupFailed
                                }
                                SchedulingFailureType::Unschedulable => {
                                    TaskErrorKind::TaskUnschedulable
                                }
                                _ => TaskErrorKind::TaskPlacementGroupRemoved,
                            };
                            error_message =
                                format!("{message} lease_id={lease_id}, task_name={task_name}");
                            // These verdicts are terminal for every queued
                            // task of the key, not just the lease payload.
                            if let Some(entry) = state.scheduling_key_entries.get_mut(key) {
                                tasks_to_fail = std::mem::take(&mut entry.task_queue);
                            }
                            gc_entry_if_possible(&mut state, key);
                        }
                        SchedulingFailureType::Intended => {
                            self.request_new_worker_if_needed(&mut state, key, None);
                        }
                    }
                }
                Ok(LeaseReply::Rejected) => {
                    // Only grant-or-reject (spillback) requests can be
                    // rejected: the first broker's view of the peer's
                    // resources was stale. Retry from the top.
                    debug_assert!(is_spillback, "non-spillback lease request rejected");
                    debug!(lease_id = %lease_id, "lease rejected; retrying locally");
                    self.request_new_worker_if_needed(&mut state, key, None);
                }
                Ok(LeaseReply::Granted {
                    worker_address,
                    resource_mapping,
                }) => {
                    debug!(
                        lease_id = %lease_id,
                        worker_id = %worker_address.worker_id,
                        node_id = %worker_address.node_id,
                        "lease granted"
                    );
                    let client = self.broker_client_for(&mut state, node_addr);
                    self.add_worker_lease(
                        &mut state,
                        worker_address.clone(),
                        client,
                        resource_mapping,
                        key,
                        lease_id,
                    );
                    self.on_worker_idle(
                        &mut state,
                        &worker_address,
                        key,
                        false,
                        String::new(),
                        false,
                    );
                }
                Ok(LeaseReply::Spillback { retry_at }) => {
                    debug_assert!(!is_spillback, "grant-or-reject lease request was redirected");
                    debug!(
                        lease_id = %lease_id,
                        from = %node_addr.node_id,
                        to = %retry_at.node_id,
                        "lease request spilled back"
                    );
                    self.request_new_worker_if_needed(&mut state, key, Some(&retry_at));
                }
                Err(status) => {
                    if node_addr.node_id != self.local_broker_id {
                        info!(
                            lease_id = %lease_id,
                            node_id = %node_addr.node_id,
                            error = %status,
                            "remote lease request failed; retrying locally"
                        );
                        self.request_new_worker_if_needed(&mut state, key, None);
                    } else if status.code() == Code::Unavailable {
                        warn!(error = %status, "local broker is unavailable (crashed)");
                        if self.config.worker_kind == WorkerKind::Worker {
                            // The caller retries the task elsewhere once
                            // this process is gone.
                            error!("terminating the worker: local broker died");
                            (self.exit_hook)();
                            return;
                        }
                        error_kind = TaskErrorKind::LocalBrokerDied;
                        error_message = format!(
                            "The driver failed to receive a response from the local broker \
                             (node id: {}, ip: {}) because the broker is unavailable (crashed).",
                            node_addr.node_id, node_addr.ip
                        );
                        if let Some(entry) = state.scheduling_key_entries.get_mut(key) {
                            tasks_to_fail = std::mem::take(&mut entry.task_queue);
                        }
                        gc_entry_if_possible(&mut state, key);
                    } else {
                        warn!(
                            error = %status,
                            "local lease request failed but the broker is alive; retrying"
                        );
                        self.request_new_worker_if_needed(&mut state, key, None);
                    }
                }
            }
        }

        for spec in tasks_to_fail {
            let kind = if spec.is_actor_creation()
                && error_kind == TaskErrorKind::TaskPlacementGroupRemoved
            {
                TaskErrorKind::ActorPlacementGroupRemoved
            } else {
                error_kind
            };
            self.task_manager.fail_pending_task(
                spec.task_id,
                kind,
                Some(TaskErrorInfo {
                    kind,
                    message: error_message.clone(),
                }),
            );
        }
    }

    /// Record a granted lease and make the worker visible to dispatch.
    pub(crate) fn add_worker_lease(
        &self,
        state: &mut SubmitterState,
        addr: WorkerAddress,
        broker_client: Arc<dyn BrokerClient>,
        assigned_resources: Vec<ResourceMapEntry>,
        key: &SchedulingKey,
        lease_id: TaskId,
    ) {
        // Warm the executor stub before the first push.
        let _ = self.executor_pool.get_or_connect(&addr);
        let lease_expiration_ms = self.clock.monotonic_ms() + self.config.lease_timeout_ms;
        state.worker_to_lease_entry.insert(
            addr.clone(),
            LeaseEntry {
                broker_client,
                lease_expiration_ms,
                assigned_resources,
                scheduling_key: key.clone(),
                lease_id,
                is_busy: false,
            },
        );
        if let Some(entry) = state.scheduling_key_entries.get_mut(key) {
            entry.active_workers.insert(addr);
        }
    }

    /// With an empty queue there is no demand; withdraw every in-flight
    /// lease request for the key.
    pub(crate) fn cancel_worker_lease_if_needed(
        self: &Arc<Self>,
        state: &mut SubmitterState,
        key: &SchedulingKey,
    ) {
        let pending: Vec<(TaskId, NodeAddress)> = match state.scheduling_key_entries.get(key) {
            Some(entry) if entry.task_queue.is_empty() => entry
                .pending_lease_requests
                .iter()
                .map(|(id, addr)| (*id, addr.clone()))
                .collect(),
            // Still demand; let the lease requests land.
            _ => return,
        };
        if pending.is_empty() {
            return;
        }
        debug!("task queue is empty; canceling lease requests");
        for (lease_id, node_addr) in pending {
            let client = self.broker_client_for(state, &node_addr);
            debug!(lease_id = %lease_id, "canceling lease request");
            let submitter = Arc::downgrade(self);
            let key = key.clone();
            tokio::spawn(async move {
                let result = client.cancel_worker_lease(lease_id).await;
                let Some(submitter) = submitter.upgrade() else {
                    return;
                };
                if let Ok(reply) = result {
                    if !reply.success {
                        // The broker has not seen the lease request yet
                        // (message reordering), or we already consumed the
                        // lease. Re-issue; the retry is a no-op once local
                        // state agrees.
                        let mut state = submitter.state.lock().unwrap();
                        submitter.cancel_worker_lease_if_needed(&mut state, &key);
                    }
                }
            });
        }
    }
}
