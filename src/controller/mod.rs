//! Memcached controller
//!
//! Contains the reconciliation state machine, the Deployment it maintains,
//! and the glue that runs it under a kube-runtime controller.

mod deployment;
mod memcached;

pub use deployment::{
    deployment_for, replicas, ControllerReference, OwnerLinker, DEFAULT_IMAGE, MEMCACHED_PORT,
};
pub use memcached::{
    error_policy, reconcile, Context, Outcome, Reconciler, ReconcilerBuilder, ReconcilerConfig,
    REASON_RECONCILING, REASON_RESIZING,
};
