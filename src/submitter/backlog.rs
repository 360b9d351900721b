//! Per-scheduling-class backlog reporting to the local broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::rpc::BacklogReport;
use crate::scheduling::SchedulingKey;
use crate::submitter::{SubmitterState, TaskSubmitter};
use crate::task::SchedulingClass;

impl TaskSubmitter {
    /// Report queued demand for every scheduling class to the local
    /// broker.
    pub fn report_worker_backlog(&self) {
        let mut state = self.state.lock().unwrap();
        self.report_worker_backlog_locked(&mut state);
    }

    /// Backlog is aggregated per scheduling class, not per scheduling key;
    /// keys sharing a class sum their backlog under one representative
    /// spec.
    pub(crate) fn report_worker_backlog_locked(&self, state: &mut SubmitterState) {
        let mut per_class: HashMap<SchedulingClass, BacklogReport> = HashMap::new();
        for (key, entry) in state.scheduling_key_entries.iter_mut() {
            let backlog_size = entry.backlog_size();
            per_class
                .entry(key.scheduling_class)
                .and_modify(|report| report.backlog_size += backlog_size)
                .or_insert_with(|| BacklogReport {
                    resource_spec: entry.resource_spec.clone(),
                    backlog_size,
                });
            entry.last_reported_backlog_size = backlog_size;
        }
        let reports: Vec<BacklogReport> = per_class.into_values().collect();
        let client = Arc::clone(&self.local_broker_client);
        let worker_id = self.rpc_address.worker_id;
        tokio::spawn(async move {
            if let Err(status) = client.report_worker_backlog(worker_id, reports).await {
                warn!(error = %status, "failed to report worker backlog");
            }
        });
    }

    /// Re-report only when this key's backlog changed since the last send.
    pub(crate) fn report_worker_backlog_if_needed(
        &self,
        state: &mut SubmitterState,
        key: &SchedulingKey,
    ) {
        let changed = state
            .scheduling_key_entries
            .get(key)
            .is_some_and(|entry| entry.last_reported_backlog_size != entry.backlog_size());
        if changed {
            self.report_worker_backlog_locked(state);
        }
    }

    /// Periodically re-report backlog, at the configured interval, until
    /// the submitter is dropped.
    pub fn spawn_backlog_reporter(self: &Arc<Self>) {
        let interval = Duration::from_millis(self.config.backlog_report_interval_ms);
        let submitter = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(submitter) = submitter.upgrade() else {
                    break;
                };
                submitter.report_worker_backlog();
            }
        });
    }
}
