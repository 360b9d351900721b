//! Backlog reporting tests.


use test_helpers::*;

#[tokio::test]
async fn backlog_counts_tasks_beyond_pending_leases() {
    let h = HarnessBuilder::new().max_pending(1).build();
    h.local_broker.hold_leases();

    for _ in 0..3 {
        h.submitter.submit(normal_spec(4)).unwrap();
    }
    wait_until("queued with one lease in flight", || {
        h.submitter.stats().queued_tasks == 3 && h.local_broker.lease_request_count() == 1
    })
    .await;

    h.submitter.report_worker_backlog();
    wait_until("backlog reported", || {
        h.local_broker
            .backlog_reports
            .lock()
            .unwrap()
            .last()
            .is_some_and(|reports| {
                reports.len() == 1 && reports[0].backlog_size == 2
            })
    })
    .await;
}

#[tokio::test]
async fn backlog_aggregates_per_scheduling_class() {
    let h = HarnessBuilder::new().max_pending(1).build();
    h.local_broker.hold_leases();

    // Two scheduling keys (different runtime envs), one scheduling class.
    let mut keyed_differently = normal_spec(4);
    keyed_differently.runtime_env_hash = 99;
    h.submitter.submit(normal_spec(4)).unwrap();
    h.submitter.submit(normal_spec(4)).unwrap();
    h.submitter.submit(keyed_differently).unwrap();
    wait_until("both keys queued with leases in flight", || {
        let stats = h.submitter.stats();
        stats.queued_tasks == 3 && stats.pending_lease_requests == 2
    })
    .await;

    h.submitter.report_worker_backlog();
    // Key one holds 2 queued / 1 pending, key two 1 queued / 1 pending:
    // class backlog is (2-1) + (1-1) = 1, in a single aggregated entry.
    wait_until("aggregated report", || {
        h.local_broker
            .backlog_reports
            .lock()
            .unwrap()
            .last()
            .is_some_and(|reports| reports.len() == 1 && reports[0].backlog_size == 1)
    })
    .await;
}

#[tokio::test]
async fn periodic_reporter_keeps_reporting() {
    let h = HarnessBuilder::new()
        .config(courier::settings::SubmitterConfig {
            backlog_report_interval_ms: 10,
            ..courier::settings::SubmitterConfig::default()
        })
        .build();
    h.submitter.spawn_backlog_reporter();
    wait_until("two reports", || {
        h.local_broker.backlog_reports.lock().unwrap().len() >= 2
    })
    .await;
    // Nothing queued: reports are sent and empty.
    assert!(h
        .local_broker
        .backlog_reports
        .lock()
        .unwrap()
        .iter()
        .all(|reports| reports.is_empty()));
}
