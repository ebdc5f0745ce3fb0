//! Custom Resource Definitions for the Memcached operator

mod memcached;
mod types;

pub use memcached::{Memcached, MemcachedSpec, MemcachedStatus, CONDITION_AVAILABLE};
pub use types::{find_status_condition, set_status_condition, Condition, ConditionStatus};
