//! Broker selection policy seam.

use crate::rpc::NodeAddress;
use crate::task::TaskSpec;

/// Picks the broker node a lease request should be sent to.
pub trait LeasePolicy: Send + Sync {
    /// Returns the chosen node and whether the choice was driven by data
    /// locality (the node already holds the task's large dependencies).
    fn best_node_for_task(&self, spec: &TaskSpec) -> (NodeAddress, bool);
}
