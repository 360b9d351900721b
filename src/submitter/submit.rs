//! Task intake and the dependency-resolution bridge.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{SubmitError, TaskErrorKind};
use crate::resolver::ResolutionError;
use crate::scheduling::{SchedulingKey, SchedulingKeyEntry};
use crate::submitter::TaskSubmitter;
use crate::task::{TaskKind, TaskSpec};

impl TaskSubmitter {
    /// Accept a task for execution. Dependency resolution runs
    /// asynchronously; the task joins its scheduling-key queue once its
    /// large-object arguments are object-store-resident.
    pub fn submit(self: &Arc<Self>, spec: TaskSpec) -> Result<(), SubmitError> {
        if let TaskKind::ActorMethod(_) = spec.kind {
            return Err(SubmitError::UnsupportedKind(spec.kind));
        }
        debug!(task_id = %spec.task_id, job_id = %self.job_id, name = %spec.name, "submitting task");
        self.num_tasks_submitted.fetch_add(1, Ordering::Relaxed);

        let resolver = Arc::clone(&self.resolver);
        let submitter = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut spec = spec;
            let result = resolver.resolve_dependencies(&mut spec).await;
            let Some(submitter) = submitter.upgrade() else {
                return;
            };
            submitter.on_dependencies_resolved(spec, result);
        });
        Ok(())
    }

    /// Resolution callback: reconcile with cancellation, queue the task,
    /// and kick dispatch plus the lease engine.
    fn on_dependencies_resolved(
        self: &Arc<Self>,
        mut spec: TaskSpec,
        result: Result<(), ResolutionError>,
    ) {
        let task_id = spec.task_id;
        self.task_manager.mark_dependencies_resolved(task_id);

        if let Err(err) = result {
            warn!(task_id = %task_id, error = %err, "resolving task dependencies failed");
            let will_retry = self.task_manager.fail_or_retry_pending_task(
                task_id,
                TaskErrorKind::DependencyResolutionFailed,
                Some(err.to_string()),
                None,
                true,
                false,
            );
            if !will_retry {
                // A concurrent cancel may have marked this task; nothing
                // will requeue it now, so drop the marker.
                self.state.lock().unwrap().cancelled_tasks.remove(&task_id);
            }
            return;
        }
        debug!(task_id = %task_id, "task dependencies resolved");

        let mut state = self.state.lock().unwrap();
        // Recheck under the lock: a cancel issued while resolution was in
        // flight must fail the task here, never queue it.
        if state.cancelled_tasks.remove(&task_id) {
            drop(state);
            self.task_manager
                .fail_pending_task(task_id, TaskErrorKind::TaskCancelled, None);
            return;
        }

        spec.dependency_resolution_timestamp_ms = Some(self.clock.wall_ms());
        let key = SchedulingKey::of(&spec);
        {
            let entry = state
                .scheduling_key_entries
                .entry(key.clone())
                .or_insert_with(|| SchedulingKeyEntry::new(spec.clone()));
            entry.task_queue.push_back(spec.clone());
            // The newest spec becomes the lease-request template for this
            // key.
            entry.resource_spec = spec;
        }

        // An idle leased worker can take the task right away.
        let idle_worker = match state.scheduling_key_entries.get(&key) {
            Some(entry) if !entry.all_workers_busy() => entry
                .active_workers
                .iter()
                .find(|addr| {
                    state
                        .worker_to_lease_entry
                        .get(*addr)
                        .is_some_and(|lease| !lease.is_busy)
                })
                .cloned(),
            _ => None,
        };
        if let Some(addr) = idle_worker {
            self.on_worker_idle(&mut state, &addr, &key, false, String::new(), false);
        }
        self.request_new_worker_if_needed(&mut state, &key, None);
    }
}
