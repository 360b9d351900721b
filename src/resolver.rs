//! Dependency resolution seam.

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::TaskId;
use crate::task::TaskSpec;

/// Failure to materialize a task's object dependencies.
#[derive(Debug, Clone, Error)]
#[error("dependency resolution failed: {0}")]
pub struct ResolutionError(pub String);

/// Resolves a task's large-object arguments into object-store-resident
/// references before the task may be queued for dispatch.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Resolve in place. On success the spec's `dependencies` refer only to
    /// objects resident in the shared object store.
    async fn resolve_dependencies(&self, spec: &mut TaskSpec) -> Result<(), ResolutionError>;

    /// Abort an in-flight resolution. The pending `resolve_dependencies`
    /// future still completes with some status; callers reconcile with
    /// cancellation state afterwards.
    fn cancel_resolution(&self, task_id: TaskId);
}
