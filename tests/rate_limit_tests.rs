//! Lease-request rate limiter tests.

use courier::rate_limit::{
    ClusterSizeBasedLeaseRequestRateLimiter, LeaseRequestRateLimiter,
    StaticLeaseRequestRateLimiter,
};

#[test]
fn static_limiter_is_fixed() {
    let limiter = StaticLeaseRequestRateLimiter::new(7);
    assert_eq!(limiter.max_pending_lease_requests_per_scheduling_category(), 7);
}

#[test]
fn cluster_limiter_scales_with_alive_nodes() {
    let limiter = ClusterSizeBasedLeaseRequestRateLimiter::new(2);
    assert_eq!(limiter.max_pending_lease_requests_per_scheduling_category(), 2);

    for _ in 0..5 {
        limiter.on_node_alive();
    }
    assert_eq!(limiter.alive_nodes(), 5);
    assert_eq!(limiter.max_pending_lease_requests_per_scheduling_category(), 5);

    for _ in 0..4 {
        limiter.on_node_dead();
    }
    // Back under the floor.
    assert_eq!(limiter.alive_nodes(), 1);
    assert_eq!(limiter.max_pending_lease_requests_per_scheduling_category(), 2);
}

#[test]
fn cluster_limiter_never_counts_below_zero() {
    let limiter = ClusterSizeBasedLeaseRequestRateLimiter::new(1);
    limiter.on_node_dead();
    limiter.on_node_dead();
    assert_eq!(limiter.alive_nodes(), 0);
    limiter.on_node_alive();
    assert_eq!(limiter.alive_nodes(), 1);
}
