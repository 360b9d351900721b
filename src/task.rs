//! Task specifications: the unit of user work this crate schedules.

use std::collections::BTreeMap;

use crate::ids::{ActorId, JobId, ObjectId, TaskId, WorkerId};

/// Coarse resource bucket used for backlog aggregation. Tasks with the same
/// scheduling class look identical to the broker's admission control even
/// when their exact dependencies differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulingClass(pub u32);

/// What flavor of work a spec describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// A stateless function invocation.
    Normal,
    /// A task whose successful completion turns the leased worker into a
    /// long-lived actor; the lease is consumed indefinitely.
    ActorCreation(ActorId),
    /// A method call on an existing actor. Routed through the actor
    /// submission path, never through this one.
    ActorMethod(ActorId),
}

/// Full description of one task: identity, classification, dependencies,
/// and resource demand. Cheap to clone; cloned copies are handed to the
/// resolver, the broker (as a lease payload), and the executor.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub name: String,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub scheduling_class: SchedulingClass,
    /// Large-object arguments. The resolver rewrites these to
    /// object-store-resident references before the task is queued.
    pub dependencies: Vec<ObjectId>,
    /// Hash of the runtime environment the task must execute under.
    pub runtime_env_hash: i32,
    /// Resource demand forwarded to the broker with lease requests.
    pub required_resources: BTreeMap<String, f64>,
    /// Whether an application exception from the executor may be retried.
    pub retry_exceptions: bool,
    /// Worker that submitted the task; echoed on cancel RPCs.
    pub caller_worker_id: WorkerId,
    /// Wall-clock stamp set when dependency resolution finishes.
    pub dependency_resolution_timestamp_ms: Option<i64>,
    /// Wall-clock stamp set when the task is assigned to a leased worker.
    pub lease_grant_timestamp_ms: Option<i64>,
}

impl TaskSpec {
    pub fn is_actor_creation(&self) -> bool {
        matches!(self.kind, TaskKind::ActorCreation(_))
    }

    /// The actor id for actor-creation tasks, `None` otherwise.
    pub fn actor_creation_id(&self) -> Option<ActorId> {
        match self.kind {
            TaskKind::ActorCreation(actor_id) => Some(actor_id),
            _ => None,
        }
    }
}
