//! Typed identifiers used throughout the submitter.
//!
//! All ids are 128-bit random values. Distinct newtypes keep task ids,
//! worker ids, and object ids from being confused at call sites that
//! otherwise all traffic in opaque identifiers.

use std::fmt;

use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh random id.
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }
    };
}

define_id!(
    /// Identifies a single task attempt. Lease requests carry synthetic
    /// task ids drawn from the same space; [`TaskId::random`] guarantees
    /// they never collide with user task ids.
    TaskId
);

define_id!(
    /// Identifies one execution worker process.
    WorkerId
);

define_id!(
    /// Identifies one broker node in the cluster.
    NodeId
);

define_id!(
    /// Identifies an object in the distributed object store.
    ObjectId
);

define_id!(
    /// Identifies an actor; set on actor-creation tasks.
    ActorId
);

define_id!(
    /// Identifies the job a task belongs to.
    JobId
);
