//! [`ClientPort`] backed by the Kubernetes API server

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::trace;

use super::{ClientPort, Object, ObjectKind, ResourceIdentity};
use crate::crd::Memcached;
use crate::Error;

/// Field manager used when none is configured
pub const DEFAULT_FIELD_MANAGER: &str = "memcached-operator";

/// Live client forwarding every call to the API server
#[derive(Clone)]
pub struct LiveClient {
    client: Client,
    field_manager: String,
}

impl LiveClient {
    /// Wrap a kube client using the default field manager
    pub fn new(client: Client) -> Self {
        Self::with_field_manager(client, DEFAULT_FIELD_MANAGER)
    }

    /// Wrap a kube client writing under the given field manager
    pub fn with_field_manager(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    async fn get<K>(&self, identity: &ResourceIdentity, kind: ObjectKind) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        self.api::<K>(&identity.namespace)
            .get(&identity.name)
            .await
            .map_err(|e| Error::from_kube(e, kind, identity.to_string()))
    }

    async fn post<K>(&self, obj: K, kind: ObjectKind) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let identity = ResourceIdentity::of(&obj);
        self.api::<K>(&identity.namespace)
            .create(&self.post_params(), &obj)
            .await
            .map_err(|e| Error::from_kube(e, kind, identity.to_string()))
    }

    async fn replace<K>(&self, obj: K, kind: ObjectKind) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let identity = ResourceIdentity::of(&obj);
        self.api::<K>(&identity.namespace)
            .replace(&identity.name, &self.post_params(), &obj)
            .await
            .map_err(|e| Error::from_kube(e, kind, identity.to_string()))
    }

    /// Merge-patch the status subresource
    ///
    /// The object's resourceVersion is sent along so a stale write is
    /// rejected with 409 instead of overwriting a newer status.
    async fn patch_status<K, S>(
        &self,
        obj: &K,
        status: &S,
        kind: ObjectKind,
    ) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
        S: Serialize,
    {
        let identity = ResourceIdentity::of(obj);
        let mut patch = json!({ "status": status });
        if let Some(rv) = obj.resource_version() {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }

        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api::<K>(&identity.namespace)
            .patch_status(&identity.name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, kind, identity.to_string()))
    }
}

#[async_trait]
impl ClientPort for LiveClient {
    async fn fetch(&self, identity: &ResourceIdentity, kind: ObjectKind) -> Result<Object, Error> {
        trace!(object = %identity, %kind, "fetching");
        match kind {
            ObjectKind::Memcached => self.get::<Memcached>(identity, kind).await.map(Object::from),
            ObjectKind::Deployment => self.get::<Deployment>(identity, kind).await.map(Object::from),
        }
    }

    async fn create(&self, object: Object) -> Result<Object, Error> {
        let kind = object.kind();
        trace!(object = %object.identity(), %kind, "creating");
        match object {
            Object::Memcached(m) => self.post(m, kind).await.map(Object::from),
            Object::Deployment(d) => self.post(d, kind).await.map(Object::from),
        }
    }

    async fn update(&self, object: Object) -> Result<Object, Error> {
        let kind = object.kind();
        trace!(object = %object.identity(), %kind, "updating");
        match object {
            Object::Memcached(m) => self.replace(m, kind).await.map(Object::from),
            Object::Deployment(d) => self.replace(d, kind).await.map(Object::from),
        }
    }

    async fn update_status(&self, object: Object) -> Result<Object, Error> {
        let kind = object.kind();
        trace!(object = %object.identity(), %kind, "updating status");
        match object {
            Object::Memcached(m) => self
                .patch_status(&m, &m.status, kind)
                .await
                .map(Object::from),
            Object::Deployment(d) => self
                .patch_status(&d, &d.status, kind)
                .await
                .map(Object::from),
        }
    }
}

