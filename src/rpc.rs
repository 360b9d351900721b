//! Wire contracts for the broker and executor services.
//!
//! The submitter does not own transport. Both services appear here as
//! object-safe async traits whose error type is `tonic::Status`; production
//! implementations wrap generated gRPC stubs, tests substitute mocks. The
//! request/reply payloads are plain data.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::Status;

use crate::error::TaskErrorInfo;
use crate::ids::{NodeId, ObjectId, TaskId, WorkerId};
use crate::task::TaskSpec;

/// Network location of a leased execution worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerAddress {
    pub ip: String,
    pub port: u16,
    pub worker_id: WorkerId,
    /// Broker node the worker lives on.
    pub node_id: NodeId,
}

/// Network location of a broker node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub ip: String,
    pub port: u16,
    pub node_id: NodeId,
}

/// One entry of the resource assignment a broker attaches to a lease.
/// Opaque to the submitter; echoed back with every push and on return.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMapEntry {
    pub name: String,
    pub quantity: f64,
}

/// Why a broker gave up on scheduling a lease request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingFailureType {
    /// The runtime environment for the task could not be set up.
    RuntimeEnvSetupFailed,
    /// The placement group the request was bound to was removed.
    PlacementGroupRemoved,
    /// The request can never be satisfied by the cluster.
    Unschedulable,
    /// Cancelled on request (e.g. we cancelled the lease ourselves); the
    /// demand, if any remains, should be re-requested.
    Intended,
}

/// Broker verdict on one lease request. Exactly one variant per reply.
#[derive(Debug, Clone)]
pub enum LeaseReply {
    /// A worker was granted for the lease window.
    Granted {
        worker_address: WorkerAddress,
        resource_mapping: Vec<ResourceMapEntry>,
    },
    /// The broker redirected the request to a peer believed to have
    /// capacity. Never sent in reply to a grant-or-reject request.
    Spillback { retry_at: NodeAddress },
    /// A grant-or-reject request could not be granted.
    Rejected,
    /// The broker stopped trying to schedule this request.
    Canceled {
        failure_type: SchedulingFailureType,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct CancelLeaseReply {
    /// False when the broker had no record of the lease request yet.
    pub success: bool,
}

/// Authoritative cause for a failed push, as known to the broker that owns
/// the worker.
#[derive(Debug, Clone, Default)]
pub struct TaskFailureCauseReply {
    pub failure_cause: Option<TaskErrorInfo>,
    pub fail_task_immediately: bool,
}

/// Queued demand for one scheduling class.
#[derive(Debug, Clone)]
pub struct BacklogReport {
    /// Representative spec for the class.
    pub resource_spec: TaskSpec,
    pub backlog_size: i64,
}

/// RPC surface of a broker node.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Ask the broker for a worker lease. `grant_or_reject` is set on
    /// spillback retries and forbids further redirection.
    async fn request_worker_lease(
        &self,
        resource_spec: TaskSpec,
        grant_or_reject: bool,
        backlog_size: i64,
        selected_by_locality: bool,
    ) -> Result<LeaseReply, Status>;

    /// Withdraw an in-flight lease request.
    async fn cancel_worker_lease(&self, lease_id: TaskId) -> Result<CancelLeaseReply, Status>;

    /// Hand a leased worker back to the broker that granted it.
    async fn return_worker(
        &self,
        port: u16,
        worker_id: WorkerId,
        was_error: bool,
        error_detail: String,
        worker_exiting: bool,
    ) -> Result<(), Status>;

    /// Report queued demand per scheduling class.
    async fn report_worker_backlog(
        &self,
        worker_id: WorkerId,
        reports: Vec<BacklogReport>,
    ) -> Result<(), Status>;

    /// Fetch the authoritative failure cause for a lease whose push failed.
    async fn get_task_failure_cause(
        &self,
        lease_id: TaskId,
    ) -> Result<TaskFailureCauseReply, Status>;
}

/// Creates broker stubs for remote nodes. The submitter caches the stubs
/// per node id and shares them by reference.
pub trait BrokerClientFactory: Send + Sync {
    fn connect(&self, addr: &NodeAddress) -> Arc<dyn BrokerClient>;
}

#[derive(Debug, Clone)]
pub struct PushTaskRequest {
    pub task_spec: TaskSpec,
    /// The lease's resource assignment, forwarded verbatim.
    pub resource_mapping: Vec<ResourceMapEntry>,
    pub intended_worker_id: WorkerId,
}

#[derive(Debug, Clone, Default)]
pub struct PushTaskReply {
    pub is_application_error: bool,
    pub is_retryable_error: bool,
    /// The worker is shutting down and must not be reused.
    pub worker_exiting: bool,
    /// The task was cancelled before its first instruction ran.
    pub was_cancelled_before_running: bool,
    pub task_execution_error: String,
}

#[derive(Debug, Clone)]
pub struct CancelTaskRequest {
    pub intended_task_id: TaskId,
    pub force_kill: bool,
    pub recursive: bool,
    pub caller_worker_id: WorkerId,
}

#[derive(Debug, Clone, Default)]
pub struct CancelTaskReply {
    pub attempt_succeeded: bool,
    /// The worker is still running the task; the caller should retry.
    pub requested_task_running: bool,
}

#[derive(Debug, Clone)]
pub struct RemoteCancelTaskRequest {
    /// A return object of the task to cancel.
    pub remote_object_id: ObjectId,
    pub force_kill: bool,
    pub recursive: bool,
}

/// RPC surface of an execution worker.
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    async fn push_normal_task(&self, request: PushTaskRequest) -> Result<PushTaskReply, Status>;

    async fn cancel_task(&self, request: CancelTaskRequest) -> Result<CancelTaskReply, Status>;

    async fn remote_cancel_task(&self, request: RemoteCancelTaskRequest) -> Result<(), Status>;
}

/// Cache of executor stubs keyed by worker address. Thread-safe and shared
/// with the rest of the worker process.
pub trait ExecutorClientPool: Send + Sync {
    fn get_or_connect(&self, addr: &WorkerAddress) -> Arc<dyn ExecutorClient>;
}
