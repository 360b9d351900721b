//! Cancellation tests across every stage: queued, resolving, executing,
//! and mid-failure.


use std::time::Duration;

use courier::error::TaskErrorKind;
use courier::ids::ObjectId;
use courier::rpc::CancelTaskReply;
use courier::settings::SubmitterConfig;

use tonic::Status;

use test_helpers::*;

#[tokio::test]
async fn cancel_queued_task_removes_it_and_withdraws_lease() {
    let h = HarnessBuilder::new().build();
    h.local_broker.hold_leases();

    let spec = normal_spec(1);
    let task_id = spec.task_id;
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("queued with lease in flight", || {
        h.submitter.stats().queued_tasks == 1 && h.local_broker.lease_request_count() == 1
    })
    .await;

    h.submitter.cancel_task(spec, false, false);
    wait_until("failed as cancelled", || {
        h.manager.failed_kinds(task_id) == vec![TaskErrorKind::TaskCancelled]
    })
    .await;
    wait_until("lease request withdrawn", || {
        !h.local_broker.cancel_requests.lock().unwrap().is_empty()
    })
    .await;

    let stats = h.submitter.stats();
    assert_eq!(stats.queued_tasks, 0);
    assert_eq!(stats.pending_cancels, 0);
    assert_eq!(h.executor.push_count(), 0);
}

#[tokio::test]
async fn cancel_mid_resolution_aborts_the_resolver() {
    let h = HarnessBuilder::new().build();
    h.resolver.hold();

    let spec = normal_spec(1);
    let task_id = spec.task_id;
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("resolution started", || h.resolver.started_count() == 1).await;

    h.submitter.cancel_task(spec, false, false);
    wait_until("failed as cancelled", || {
        h.manager.failed_kinds(task_id) == vec![TaskErrorKind::TaskCancelled]
    })
    .await;
    assert!(h.resolver.cancelled.lock().unwrap().contains(&task_id));

    // Let the aborted resolution land; it must clean the cancel marker and
    // never queue the task.
    h.resolver.release(1);
    wait_until("cancel marker cleaned", || {
        h.submitter.stats().pending_cancels == 0
    })
    .await;
    assert_eq!(h.submitter.stats().queued_tasks, 0);
    assert_eq!(
        h.manager.failed_kinds(task_id),
        vec![TaskErrorKind::TaskCancelled]
    );
}

#[tokio::test]
async fn cancel_between_resolution_and_queueing_is_observed() {
    // The resolution callback rechecks the cancel set under the lock, so a
    // cancel that lands while the resolver is finishing fails the task
    // instead of queueing it, even when the resolver reports success.
    let h = HarnessBuilder::new().build();
    h.resolver.hold();
    h.resolver.ignore_cancellation();

    let spec = normal_spec(1);
    let task_id = spec.task_id;
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("resolution started", || h.resolver.started_count() == 1).await;

    h.submitter.cancel_task(spec, false, false);
    wait_until("cancel marker set", || {
        h.submitter.stats().pending_cancels == 1
    })
    .await;

    // The resolution now lands successfully; the recheck must consume the
    // marker and keep the task out of the queue.
    h.resolver.release(1);
    wait_until("cancel marker consumed", || {
        h.submitter.stats().pending_cancels == 0
    })
    .await;
    assert_eq!(h.submitter.stats().queued_tasks, 0);
    assert_eq!(h.local_broker.lease_request_count(), 0);
    assert!(h
        .manager
        .failed_kinds(task_id)
        .iter()
        .all(|kind| *kind == TaskErrorKind::TaskCancelled));
    assert!(!h.manager.failed_kinds(task_id).is_empty());
}

#[tokio::test]
async fn concurrent_cancels_coalesce() {
    let h = HarnessBuilder::new().auto_grant(true).build();
    h.executor.hold_pushes();
    h.executor.hold_cancels();

    let spec = normal_spec(1);
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("push started", || h.executor.push_count() == 1).await;

    h.submitter.cancel_task(spec.clone(), false, false);
    h.submitter.cancel_task(spec.clone(), false, false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.executor.cancels.lock().unwrap().len(), 1);

    // A generator resubmit is refused while the cancel is in progress.
    assert!(!h.submitter.queue_generator_for_resubmit(&spec));

    h.executor.release_cancels(1);
    h.executor.release_pushes(1);
    wait_until("cancel bookkeeping drained", || {
        h.submitter.stats().pending_cancels == 0
    })
    .await;
}

#[tokio::test]
async fn cancel_retries_while_task_still_running() {
    let h = HarnessBuilder::new()
        .auto_grant(true)
        .config(SubmitterConfig {
            cancellation_retry_ms: 20,
            ..SubmitterConfig::default()
        })
        .build();
    h.executor.hold_pushes();
    h.executor.push_cancel_reply(Ok(CancelTaskReply {
        attempt_succeeded: false,
        requested_task_running: true,
    }));
    h.executor.push_cancel_reply(Ok(CancelTaskReply {
        attempt_succeeded: true,
        requested_task_running: false,
    }));

    let spec = normal_spec(1);
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("push started", || h.executor.push_count() == 1).await;

    h.submitter.cancel_task(spec, false, false);
    wait_until("cancel retried", || h.executor.cancels.lock().unwrap().len() == 2).await;

    h.executor.release_pushes(1);
    wait_until("cancel bookkeeping drained", || {
        h.submitter.stats().pending_cancels == 0
    })
    .await;
}

#[tokio::test]
async fn cancel_rpc_failure_is_swallowed() {
    let h = HarnessBuilder::new().auto_grant(true).build();
    h.executor.hold_pushes();
    h.executor
        .push_cancel_reply(Err(Status::unavailable("worker force-killed")));

    let spec = normal_spec(1);
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("push started", || h.executor.push_count() == 1).await;

    h.submitter.cancel_task(spec, true, false);
    wait_until("cancel marker cleared", || {
        h.submitter.stats().pending_cancels == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    // No retry after a transport failure.
    assert_eq!(h.executor.cancels.lock().unwrap().len(), 1);
    h.executor.release_pushes(1);
}

#[tokio::test]
async fn cancel_of_finished_task_only_marks() {
    let h = HarnessBuilder::new().build();
    let spec = normal_spec(1);
    let task_id = spec.task_id;
    h.manager.set_not_pending(task_id);

    h.submitter.cancel_task(spec, false, false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let events = h.manager.events();
    assert!(events.contains(&TaskEvent::Canceled(task_id)));
    assert!(h.manager.failed_kinds(task_id).is_empty());
    assert!(h.executor.cancels.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_defers_to_pending_failure_cause() {
    let h = HarnessBuilder::new().auto_grant(true).build();
    h.executor
        .push_push_reply(Err(Status::internal("worker crashed")));
    h.local_broker.hold_failure_causes();

    let spec = normal_spec(1);
    let task_id = spec.task_id;
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("failure cause pending", || {
        h.submitter.stats().pending_failure_causes == 1
    })
    .await;

    h.submitter.cancel_task(spec, false, false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    // Deferred: no cancelled verdict while the cause is outstanding.
    assert!(h.manager.failed_kinds(task_id).is_empty());
    assert_eq!(h.submitter.stats().pending_cancels, 1);
    assert!(h.resolver.cancelled.lock().unwrap().is_empty());

    h.local_broker
        .push_failure_cause_reply(Err(Status::unavailable("broker gone")));
    h.local_broker.release_failure_causes(1);
    wait_until("failure path resolves the task", || {
        h.manager.events().iter().any(|event| {
            matches!(
                event,
                TaskEvent::FailedOrRetried {
                    task_id: id,
                    kind: TaskErrorKind::NodeDied,
                    ..
                } if *id == task_id
            )
        })
    })
    .await;
    wait_until("cancel marker cleaned", || {
        h.submitter.stats().pending_cancels == 0
    })
    .await;
}

#[tokio::test]
async fn generator_resubmit_consumed_on_reply() {
    let h = HarnessBuilder::new().auto_grant(true).build();
    h.executor.hold_pushes();

    let spec = normal_spec(1);
    let task_id = spec.task_id;
    h.submitter.submit(spec.clone()).unwrap();
    wait_until("push started", || h.executor.push_count() == 1).await;

    assert!(h.submitter.queue_generator_for_resubmit(&spec));
    h.executor.release_pushes(1);

    wait_until("generator resubmitted", || {
        h.manager
            .events()
            .contains(&TaskEvent::GeneratorResubmitted(task_id))
    })
    .await;
    assert!(!h.manager.completed(task_id));
}

#[tokio::test]
async fn cancel_remote_task_sends_fire_and_forget_rpc() {
    let h = HarnessBuilder::new().build();
    let worker = h.local_broker.fabricate_worker();
    let object_id = ObjectId::random();
    h.submitter.cancel_remote_task(object_id, &worker, true, false);

    wait_until("remote cancel sent", || {
        !h.executor.remote_cancels.lock().unwrap().is_empty()
    })
    .await;
    let requests = h.executor.remote_cancels.lock().unwrap().clone();
    assert_eq!(requests[0].remote_object_id, object_id);
    assert!(requests[0].force_kill);
    assert!(!requests[0].recursive);
}
