//! Error types for the Memcached operator
//!
//! Every [`ClientPort`](crate::client::ClientPort) implementation reports
//! failures through this one type so the reconciler can classify them the
//! same way regardless of which backing store produced them.

use thiserror::Error;

use crate::client::{ObjectKind, Operation};

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that has no more specific classification
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The requested object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: ObjectKind,
        /// Identity of the missing object (namespace/name)
        name: String,
    },

    /// The write was based on a stale resource version
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        /// Kind of the conflicting object
        kind: ObjectKind,
        /// Identity of the conflicting object (namespace/name)
        name: String,
        /// Description of the conflict
        message: String,
    },

    /// Create was called for an object that already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the existing object
        kind: ObjectKind,
        /// Identity of the existing object (namespace/name)
        name: String,
    },

    /// Any other backing-store failure (timeouts, unavailability, injected faults)
    #[error("store error: {0}")]
    Store(String),

    /// The owner reference for a dependent object could not be established
    #[error("owner reference error: {0}")]
    OwnerReference(String),

    /// The in-flight operation was aborted by a cancellation signal
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was in flight
        operation: Operation,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-found error for the given object
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a conflict error for the given object
    pub fn conflict(kind: ObjectKind, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a generic store error with the given message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an owner reference error with the given message
    pub fn owner_reference(msg: impl Into<String>) -> Self {
        Self::OwnerReference(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Normalize a kube API error for the given object
    ///
    /// 404, 409 Conflict and 409 AlreadyExists responses become the structured
    /// variants; everything else is kept as [`Error::Kube`].
    pub fn from_kube(err: kube::Error, kind: ObjectKind, name: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind,
                    name: name.into(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::conflict(kind, name, ae.message),
            other => Self::Kube(other),
        }
    }

    /// Returns true if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// Returns true if this error is a stale-version write conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409 && ae.reason != "AlreadyExists",
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Everything that reaches the dispatcher is requeued; this only tells
    /// the error policy whether a retry can succeed without a spec change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(source) => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Serialization(_) | Error::Internal(_) => false,
            _ => true,
        }
    }
}
