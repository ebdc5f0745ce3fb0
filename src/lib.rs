//! Memcached operator - reconciles Memcached resources into Deployments
//!
//! A `Memcached` custom resource declares how many memcached replicas should
//! run. The controller keeps a Deployment of the same name at that size and
//! reports progress through an `Available` status condition.
//!
//! # Modules
//!
//! - [`crd`] - The Memcached Custom Resource Definition and condition types
//! - [`client`] - The client seam: live, fault-injecting and in-memory
//! - [`controller`] - The reconciliation state machine and kube-runtime glue
//! - [`telemetry`] - Tracing subscriber initialization
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod client;
pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
