//! Scheduling equivalence classes and the per-class dispatch state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::ids::{ActorId, ObjectId, TaskId};
use crate::rpc::{BrokerClient, NodeAddress, ResourceMapEntry, WorkerAddress};
use crate::task::{SchedulingClass, TaskSpec};

/// Equivalence class of tasks that may interchangeably run on the same
/// leased worker. Tasks with equal keys are fungible for leasing; tasks
/// with unequal keys must never share a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchedulingKey {
    pub scheduling_class: SchedulingClass,
    /// Sorted, deduplicated large-object dependency ids.
    pub dependencies: Vec<ObjectId>,
    /// Set for actor-creation tasks. Actor ids are unique, so those keys
    /// are never shared across tasks.
    pub actor_creation_id: Option<ActorId>,
    pub runtime_env_hash: i32,
}

impl SchedulingKey {
    pub fn of(spec: &TaskSpec) -> Self {
        let mut dependencies = spec.dependencies.clone();
        dependencies.sort_unstable();
        dependencies.dedup();
        Self {
            scheduling_class: spec.scheduling_class,
            dependencies,
            actor_creation_id: spec.actor_creation_id(),
            runtime_env_hash: spec.runtime_env_hash,
        }
    }
}

/// Dispatch state for one live scheduling key.
#[derive(Debug)]
pub struct SchedulingKeyEntry {
    /// Ready-to-dispatch tasks, FIFO.
    pub task_queue: VecDeque<TaskSpec>,
    /// In-flight lease requests: synthetic lease id to the broker node the
    /// request was sent to.
    pub pending_lease_requests: HashMap<TaskId, NodeAddress>,
    /// Leased workers currently assigned to this key.
    pub active_workers: HashSet<WorkerAddress>,
    /// How many of `active_workers` are executing a task right now.
    pub num_busy_workers: usize,
    /// Template for lease-request payloads. Always the most recently queued
    /// spec; its task id is re-randomized for every request.
    pub resource_spec: TaskSpec,
    pub last_reported_backlog_size: i64,
}

impl SchedulingKeyEntry {
    pub fn new(resource_spec: TaskSpec) -> Self {
        Self {
            task_queue: VecDeque::new(),
            pending_lease_requests: HashMap::new(),
            active_workers: HashSet::new(),
            num_busy_workers: 0,
            resource_spec,
            last_reported_backlog_size: 0,
        }
    }

    /// True when every leased worker is executing something.
    pub fn all_workers_busy(&self) -> bool {
        self.num_busy_workers == self.active_workers.len()
    }

    /// The entry may be dropped only once nothing references it: no queued
    /// tasks, no in-flight lease requests, no leased workers.
    pub fn can_delete(&self) -> bool {
        self.task_queue.is_empty()
            && self.pending_lease_requests.is_empty()
            && self.active_workers.is_empty()
    }

    /// Queued tasks beyond those already covered by an in-flight lease
    /// request.
    pub fn backlog_size(&self) -> i64 {
        (self.task_queue.len() - self.task_queue.len().min(self.pending_lease_requests.len()))
            as i64
    }
}

/// State for one granted worker lease.
pub struct LeaseEntry {
    /// Broker that issued the lease; the worker must be returned here.
    pub broker_client: Arc<dyn BrokerClient>,
    /// Monotonic deadline after which the worker is returned instead of
    /// reused.
    pub lease_expiration_ms: i64,
    /// Resource assignment echoed back with pushes and on return.
    pub assigned_resources: Vec<ResourceMapEntry>,
    pub scheduling_key: SchedulingKey,
    /// Lease-request id this lease was granted under. The broker indexes
    /// the lease by it for failure-cause lookups.
    pub lease_id: TaskId,
    /// Exactly one task is in flight to the worker when set.
    pub is_busy: bool,
}
