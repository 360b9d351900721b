//! The task submitter: accepts tasks, resolves their dependencies, leases
//! workers from the cluster broker, dispatches tasks over RPC, and
//! reconciles task fate with the task lifecycle manager.
//!
//! The implementation is split across submodules:
//!
//! - `submit`: task intake and the dependency-resolution bridge
//! - `lease`: the lease request engine and broker reply handling
//! - `dispatch`: worker reuse, task pushes, and push completion
//! - `cancel`: cooperative cancellation across every stage
//! - `failure`: authoritative failure-cause lookup for failed pushes
//! - `backlog`: per-scheduling-class queue-depth reporting
//!
//! All mutable state lives in [`SubmitterState`] behind one lock. Engine
//! methods take `&mut SubmitterState`; the guard is never held across an
//! await. Outbound RPCs run on spawned tasks that capture a
//! `Weak<TaskSubmitter>`, so a completion that lands after teardown is a
//! no-op.

mod backlog;
mod cancel;
mod dispatch;
mod failure;
mod lease;
mod submit;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::clock::Clock;
use crate::ids::{JobId, NodeId, TaskId};
use crate::policy::LeasePolicy;
use crate::rate_limit::LeaseRequestRateLimiter;
use crate::resolver::DependencyResolver;
use crate::rpc::{
    BrokerClient, BrokerClientFactory, ExecutorClientPool, NodeAddress, WorkerAddress,
};
use crate::scheduling::{LeaseEntry, SchedulingKey, SchedulingKeyEntry};
use crate::settings::SubmitterConfig;
use crate::task_manager::TaskManager;

/// Everything the submitter mutates, behind one lock.
#[derive(Default)]
pub(crate) struct SubmitterState {
    pub(crate) scheduling_key_entries: HashMap<SchedulingKey, SchedulingKeyEntry>,
    pub(crate) worker_to_lease_entry: HashMap<WorkerAddress, LeaseEntry>,
    /// In-flight pushes: task id to the worker executing it.
    pub(crate) executing_tasks: HashMap<TaskId, WorkerAddress>,
    /// Tasks whose cancellation is being processed.
    pub(crate) cancelled_tasks: HashSet<TaskId>,
    /// Generator tasks marked for object-recovery resubmission.
    pub(crate) generators_to_resubmit: HashSet<TaskId>,
    /// Failed pushes awaiting the broker's failure-cause verdict.
    pub(crate) failed_tasks_pending_failure_cause: HashSet<TaskId>,
    /// Lazily created broker stubs, one per remote node.
    pub(crate) remote_broker_clients: HashMap<NodeId, Arc<dyn BrokerClient>>,
    /// Monotonic expiry of the shared cancel-retry timer slot.
    pub(crate) cancel_retry_deadline_ms: i64,
}

/// Drop the entry once nothing references it.
pub(crate) fn gc_entry_if_possible(state: &mut SubmitterState, key: &SchedulingKey) {
    if state
        .scheduling_key_entries
        .get(key)
        .is_some_and(|entry| entry.can_delete())
    {
        state.scheduling_key_entries.remove(key);
    }
}

/// Collaborators and identity handed to [`TaskSubmitter::new`].
pub struct SubmitterOptions {
    pub config: SubmitterConfig,
    pub job_id: JobId,
    /// Address this submitter's process is reachable at; its worker id
    /// identifies us in backlog reports.
    pub rpc_address: WorkerAddress,
    pub local_broker_id: NodeId,
    pub local_broker_client: Arc<dyn BrokerClient>,
    pub broker_client_factory: Arc<dyn BrokerClientFactory>,
    pub executor_pool: Arc<dyn ExecutorClientPool>,
    pub resolver: Arc<dyn DependencyResolver>,
    pub task_manager: Arc<dyn TaskManager>,
    pub lease_policy: Arc<dyn LeasePolicy>,
    pub rate_limiter: Arc<dyn LeaseRequestRateLimiter>,
    pub clock: Arc<dyn Clock>,
    /// Invoked when the local broker dies under a worker-kind process.
    /// Defaults to exiting the process.
    pub exit_hook: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Client-side scheduling and dispatch core. One instance per worker
/// process, shared behind `Arc`; requires a tokio runtime context.
pub struct TaskSubmitter {
    pub(crate) state: Mutex<SubmitterState>,
    pub(crate) config: SubmitterConfig,
    pub(crate) job_id: JobId,
    pub(crate) rpc_address: WorkerAddress,
    pub(crate) local_broker_id: NodeId,
    pub(crate) local_broker_client: Arc<dyn BrokerClient>,
    pub(crate) broker_client_factory: Arc<dyn BrokerClientFactory>,
    pub(crate) executor_pool: Arc<dyn ExecutorClientPool>,
    pub(crate) resolver: Arc<dyn DependencyResolver>,
    pub(crate) task_manager: Arc<dyn TaskManager>,
    pub(crate) lease_policy: Arc<dyn LeasePolicy>,
    pub(crate) rate_limiter: Arc<dyn LeaseRequestRateLimiter>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) exit_hook: Box<dyn Fn() + Send + Sync>,
    pub(crate) num_tasks_submitted: AtomicU64,
    pub(crate) num_leases_requested: AtomicU64,
}

impl TaskSubmitter {
    pub fn new(options: SubmitterOptions) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SubmitterState::default()),
            config: options.config,
            job_id: options.job_id,
            rpc_address: options.rpc_address,
            local_broker_id: options.local_broker_id,
            local_broker_client: options.local_broker_client,
            broker_client_factory: options.broker_client_factory,
            executor_pool: options.executor_pool,
            resolver: options.resolver,
            task_manager: options.task_manager,
            lease_policy: options.lease_policy,
            rate_limiter: options.rate_limiter,
            clock: options.clock,
            exit_hook: options
                .exit_hook
                .unwrap_or_else(|| Box::new(|| std::process::exit(1))),
            num_tasks_submitted: AtomicU64::new(0),
            num_leases_requested: AtomicU64::new(0),
        })
    }

    /// Broker stub for `addr`. The local broker uses the fixed client
    /// handed in at construction; remote stubs are created on demand and
    /// cached per node.
    pub(crate) fn broker_client_for(
        &self,
        state: &mut SubmitterState,
        addr: &NodeAddress,
    ) -> Arc<dyn BrokerClient> {
        if addr.node_id == self.local_broker_id {
            return Arc::clone(&self.local_broker_client);
        }
        if let Some(client) = state.remote_broker_clients.get(&addr.node_id) {
            return Arc::clone(client);
        }
        info!(node_id = %addr.node_id, ip = %addr.ip, "connecting to remote broker");
        let client = self.broker_client_factory.connect(addr);
        state
            .remote_broker_clients
            .insert(addr.node_id, Arc::clone(&client));
        client
    }

    pub fn num_tasks_submitted(&self) -> u64 {
        self.num_tasks_submitted.load(Ordering::Relaxed)
    }

    pub fn num_leases_requested(&self) -> u64 {
        self.num_leases_requested.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot of scheduling state, for operators and tests.
    pub fn stats(&self) -> SubmitterStats {
        let state = self.state.lock().unwrap();
        let queued_tasks = state
            .scheduling_key_entries
            .values()
            .map(|entry| entry.task_queue.len())
            .sum();
        let pending_lease_requests = state
            .scheduling_key_entries
            .values()
            .map(|entry| entry.pending_lease_requests.len())
            .sum();
        let busy_workers = state
            .worker_to_lease_entry
            .values()
            .filter(|lease| lease.is_busy)
            .count();
        SubmitterStats {
            scheduling_key_entries: state.scheduling_key_entries.len(),
            queued_tasks,
            pending_lease_requests,
            leased_workers: state.worker_to_lease_entry.len(),
            busy_workers,
            executing_tasks: state.executing_tasks.len(),
            pending_cancels: state.cancelled_tasks.len(),
            pending_failure_causes: state.failed_tasks_pending_failure_cause.len(),
            num_tasks_submitted: self.num_tasks_submitted(),
            num_leases_requested: self.num_leases_requested(),
        }
    }
}

/// Counters describing the submitter's current load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitterStats {
    pub scheduling_key_entries: usize,
    pub queued_tasks: usize,
    pub pending_lease_requests: usize,
    pub leased_workers: usize,
    pub busy_workers: usize,
    pub executing_tasks: usize,
    pub pending_cancels: usize,
    pub pending_failure_causes: usize,
    pub num_tasks_submitted: u64,
    pub num_leases_requested: u64,
}
