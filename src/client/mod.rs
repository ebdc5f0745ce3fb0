//! The client seam between the reconciler and the backing store
//!
//! [`ClientPort`] is the only way the reconciler reads or writes objects.
//! Implementations are chosen at construction time:
//!
//! - [`LiveClient`] forwards to the Kubernetes API server
//! - [`FaultInjectingClient`] replays a configured sequence of failures and
//!   otherwise delegates to another `ClientPort` (or does nothing)
//! - [`InMemoryClient`] is an in-process object store with resource-version
//!   conflict detection, used in place of an API server in tests

mod fault;
mod live;
mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::crd::Memcached;
use crate::Error;

pub use fault::{ExhaustionPolicy, FaultInjectingClient, FaultKind, FaultQueue, InjectedFault};
pub use live::{LiveClient, DEFAULT_FIELD_MANAGER};
pub use memory::InMemoryClient;

/// Key identifying one desired/observed resource pair
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
}

impl ResourceIdentity {
    /// Create an identity from a name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Identity of an existing kube object
    ///
    /// Objects without a namespace map to the `default` namespace.
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_else(|| "default".to_string()),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The object classes the reconciler reads and writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// The desired state (Memcached custom resource)
    Memcached,
    /// The observed state (apps/v1 Deployment)
    Deployment,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memcached => write!(f, "Memcached"),
            Self::Deployment => write!(f, "Deployment"),
        }
    }
}

/// An object passed through [`ClientPort`]
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    /// A Memcached custom resource
    Memcached(Memcached),
    /// An apps/v1 Deployment
    Deployment(Deployment),
}

impl Object {
    /// Kind of the wrapped object
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Memcached(_) => ObjectKind::Memcached,
            Self::Deployment(_) => ObjectKind::Deployment,
        }
    }

    /// Identity of the wrapped object
    pub fn identity(&self) -> ResourceIdentity {
        match self {
            Self::Memcached(m) => ResourceIdentity::of(m),
            Self::Deployment(d) => ResourceIdentity::of(d),
        }
    }

    /// Metadata of the wrapped object
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Memcached(m) => m.meta(),
            Self::Deployment(d) => d.meta(),
        }
    }

    /// Mutable metadata of the wrapped object
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Memcached(m) => m.meta_mut(),
            Self::Deployment(d) => d.meta_mut(),
        }
    }

    /// An object of the given kind carrying only its identity
    ///
    /// Returned by clients that have nothing to forward a fetch to.
    pub fn empty(kind: ObjectKind, identity: &ResourceIdentity) -> Self {
        let metadata = ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(identity.namespace.clone()),
            ..Default::default()
        };
        match kind {
            ObjectKind::Memcached => Self::Memcached(Memcached {
                metadata,
                spec: Default::default(),
                status: None,
            }),
            ObjectKind::Deployment => Self::Deployment(Deployment {
                metadata,
                ..Default::default()
            }),
        }
    }

    /// Unwrap a Memcached, failing on any other kind
    pub fn into_memcached(self) -> Result<Memcached, Error> {
        match self {
            Self::Memcached(m) => Ok(m),
            other => Err(Error::internal(format!(
                "expected Memcached, got {}",
                other.kind()
            ))),
        }
    }

    /// Unwrap a Deployment, failing on any other kind
    pub fn into_deployment(self) -> Result<Deployment, Error> {
        match self {
            Self::Deployment(d) => Ok(d),
            other => Err(Error::internal(format!(
                "expected Deployment, got {}",
                other.kind()
            ))),
        }
    }
}

impl From<Memcached> for Object {
    fn from(m: Memcached) -> Self {
        Self::Memcached(m)
    }
}

impl From<Deployment> for Object {
    fn from(d: Deployment) -> Self {
        Self::Deployment(d)
    }
}

/// The four operations a [`ClientPort`] offers, used to key fault queues
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    /// Read one object by identity and kind
    #[serde(alias = "Get")]
    Fetch,
    /// Create a new object
    Create,
    /// Replace an object's metadata and spec
    Update,
    /// Replace an object's status subresource
    #[serde(alias = "StatusUpdate")]
    UpdateStatus,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "Fetch"),
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::UpdateStatus => write!(f, "UpdateStatus"),
        }
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Fetch" | "Get" => Ok(Self::Fetch),
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "UpdateStatus" | "StatusUpdate" => Ok(Self::UpdateStatus),
            other => Err(Error::serialization(format!(
                "unknown operation '{other}', expected one of Fetch, Create, Update, UpdateStatus"
            ))),
        }
    }
}

/// Abstract backing store used by the reconciler
///
/// Every call blocks the calling reconcile invocation until it completes.
/// Failures are reported through [`Error`], classified with
/// [`Error::is_not_found`] and [`Error::is_conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientPort: Send + Sync {
    /// Fetch the object of `kind` identified by `identity`
    async fn fetch(&self, identity: &ResourceIdentity, kind: ObjectKind) -> Result<Object, Error>;

    /// Create `object`, returning the stored version
    async fn create(&self, object: Object) -> Result<Object, Error>;

    /// Replace `object`'s metadata and spec, returning the stored version
    async fn update(&self, object: Object) -> Result<Object, Error>;

    /// Replace `object`'s status, returning the stored version
    async fn update_status(&self, object: Object) -> Result<Object, Error>;
}
