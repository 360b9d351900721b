//! Bounds on concurrent lease requests per scheduling category.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Supplies the current cap on in-flight lease requests for any one
/// scheduling category. Consulted on every pass of the lease engine, so
/// implementations may move the cap at runtime.
pub trait LeaseRequestRateLimiter: Send + Sync {
    fn max_pending_lease_requests_per_scheduling_category(&self) -> usize;
}

/// Fixed cap.
pub struct StaticLeaseRequestRateLimiter {
    limit: usize,
}

impl StaticLeaseRequestRateLimiter {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl LeaseRequestRateLimiter for StaticLeaseRequestRateLimiter {
    fn max_pending_lease_requests_per_scheduling_category(&self) -> usize {
        self.limit
    }
}

/// Scales the cap with cluster size: one in-flight request per alive
/// broker node, never below the configured floor. Liveness transitions are
/// fed in from cluster membership events.
pub struct ClusterSizeBasedLeaseRequestRateLimiter {
    min_limit: usize,
    alive_nodes: AtomicUsize,
}

impl ClusterSizeBasedLeaseRequestRateLimiter {
    pub fn new(min_limit: usize) -> Self {
        Self {
            min_limit,
            alive_nodes: AtomicUsize::new(0),
        }
    }

    pub fn on_node_alive(&self) {
        self.alive_nodes.fetch_add(1, Ordering::Relaxed);
    }

    /// Death events may race ahead of the matching alive event during
    /// startup; the count never goes below zero.
    pub fn on_node_dead(&self) {
        let _ = self
            .alive_nodes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn alive_nodes(&self) -> usize {
        self.alive_nodes.load(Ordering::Relaxed)
    }
}

impl LeaseRequestRateLimiter for ClusterSizeBasedLeaseRequestRateLimiter {
    fn max_pending_lease_requests_per_scheduling_category(&self) -> usize {
        self.min_limit.max(self.alive_nodes.load(Ordering::Relaxed))
    }
}
