//! Integration tests for the Memcached operator
//!
//! These tests require a Kubernetes cluster (kind) to run and tell the story
//! of how a Memcached resource is rolled out, kept at size, and reported on.
//!
//! # Test Organization
//!
//! - `memcached_lifecycle`: Stories about the reconciler creating, resizing
//!   and reporting on Deployments through the live API server
//!
//! # Running These Tests
//!
//! ```bash
//! kind create cluster
//! cargo test --test kind -- --ignored
//! ```

mod helpers;
mod memcached_lifecycle;
