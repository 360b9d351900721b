//! Scheduling key and entry bookkeeping tests.


use courier::ids::ObjectId;
use courier::scheduling::{SchedulingKey, SchedulingKeyEntry};

use test_helpers::*;

#[test]
fn keys_are_fungible_regardless_of_dependency_order() {
    let a = ObjectId::random();
    let b = ObjectId::random();

    let mut first = normal_spec(1);
    first.dependencies = vec![a, b, b];
    let mut second = normal_spec(1);
    second.dependencies = vec![b, a];

    assert_eq!(SchedulingKey::of(&first), SchedulingKey::of(&second));
}

#[test]
fn keys_differ_on_class_env_and_actor() {
    let base = normal_spec(1);

    let other_class = normal_spec(2);
    assert_ne!(SchedulingKey::of(&base), SchedulingKey::of(&other_class));

    let mut other_env = normal_spec(1);
    other_env.runtime_env_hash = 42;
    assert_ne!(SchedulingKey::of(&base), SchedulingKey::of(&other_env));

    let actor = actor_spec(1);
    assert_ne!(SchedulingKey::of(&base), SchedulingKey::of(&actor));
    // Two actor creations never share a key.
    assert_ne!(
        SchedulingKey::of(&actor_spec(1)),
        SchedulingKey::of(&actor_spec(1))
    );
}

#[test]
fn backlog_is_demand_beyond_pending_leases() {
    let mut entry = SchedulingKeyEntry::new(normal_spec(1));
    assert_eq!(entry.backlog_size(), 0);

    for _ in 0..3 {
        entry.task_queue.push_back(normal_spec(1));
    }
    assert_eq!(entry.backlog_size(), 3);

    let node = courier::rpc::NodeAddress {
        ip: "127.0.0.1".to_string(),
        port: 7000,
        node_id: courier::ids::NodeId::random(),
    };
    entry
        .pending_lease_requests
        .insert(courier::ids::TaskId::random(), node.clone());
    assert_eq!(entry.backlog_size(), 2);

    // More leases in flight than queued tasks never goes negative.
    for _ in 0..5 {
        entry
            .pending_lease_requests
            .insert(courier::ids::TaskId::random(), node.clone());
    }
    assert_eq!(entry.backlog_size(), 0);
}

#[test]
fn entry_deletable_only_when_fully_drained() {
    let mut entry = SchedulingKeyEntry::new(normal_spec(1));
    assert!(entry.can_delete());

    entry.task_queue.push_back(normal_spec(1));
    assert!(!entry.can_delete());
    entry.task_queue.clear();

    let worker = courier::rpc::WorkerAddress {
        ip: "10.0.0.1".to_string(),
        port: 20_000,
        worker_id: courier::ids::WorkerId::random(),
        node_id: courier::ids::NodeId::random(),
    };
    entry.active_workers.insert(worker.clone());
    assert!(!entry.can_delete());
    assert!(!entry.all_workers_busy());
    entry.num_busy_workers = 1;
    assert!(entry.all_workers_busy());
}
