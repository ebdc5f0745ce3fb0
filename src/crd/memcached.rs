//! Memcached Custom Resource Definition
//!
//! A Memcached resource declares how many memcached replicas should run.
//! The controller materializes it as a Deployment of the same name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{set_status_condition, Condition};

/// Condition type reported on every Memcached resource
pub const CONDITION_AVAILABLE: &str = "Available";

/// Specification for a Memcached resource
///
/// Example:
/// ```yaml
/// apiVersion: cache.example.com/v1alpha1
/// kind: Memcached
/// metadata:
///   name: memcached-sample
///   namespace: default
/// spec:
///   size: 1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cache.example.com",
    version = "v1alpha1",
    kind = "Memcached",
    plural = "memcacheds",
    shortname = "mc",
    status = "MemcachedStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedSpec {
    /// Number of memcached replicas to run
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub size: i32,
}

/// Status for a Memcached resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedStatus {
    /// Conditions representing the resource state; one entry per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Memcached {
    /// Declared replica count
    pub fn size(&self) -> i32 {
        self.spec.size
    }

    /// Current status conditions (empty when no status has been written)
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    /// Insert or update a status condition on this in-memory copy
    ///
    /// Returns true if the condition list changed.
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        let status = self.status.get_or_insert_with(MemcachedStatus::default);
        set_status_condition(&mut status.conditions, condition)
    }
}
