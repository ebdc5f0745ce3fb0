//! In-process object store
//!
//! Behaves like a minimal API server: it assigns uids and resource versions,
//! rejects duplicate creates, and rejects writes based on a stale resource
//! version. Status and spec are separate subresources, so `update` never
//! touches status and `update_status` touches nothing else.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ClientPort, Object, ObjectKind, ResourceIdentity};
use crate::Error;

type Key = (ObjectKind, ResourceIdentity);

#[derive(Default)]
struct Store {
    objects: BTreeMap<Key, Object>,
    next_version: u64,
}

impl Store {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Look up the stored object for a write, rejecting stale versions
    fn current(&self, object: &Object) -> Result<&Object, Error> {
        let identity = object.identity();
        let stored = self
            .objects
            .get(&(object.kind(), identity.clone()))
            .ok_or_else(|| Error::not_found(object.kind(), identity.to_string()))?;

        if let Some(rv) = &object.meta().resource_version {
            if stored.meta().resource_version.as_ref() != Some(rv) {
                return Err(Error::conflict(
                    object.kind(),
                    identity.to_string(),
                    format!(
                        "the object has been modified; resourceVersion {rv} is stale (current {})",
                        stored.meta().resource_version.as_deref().unwrap_or("none")
                    ),
                ));
            }
        }
        Ok(stored)
    }
}

/// [`ClientPort`] keeping every object in memory
#[derive(Default)]
pub struct InMemoryClient {
    store: Mutex<Store>,
}

impl InMemoryClient {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, overwriting any existing one with the same identity
    ///
    /// The stored copy gets a uid and a fresh resource version and is
    /// returned.
    pub fn insert(&self, object: impl Into<Object>) -> Object {
        let mut object = object.into();
        let mut store = self.store.lock();
        let identity = object.identity();

        let rv = store.bump();
        let meta = object.meta_mut();
        meta.namespace = Some(identity.namespace.clone());
        meta.uid.get_or_insert_with(|| format!("uid-{}", identity));
        meta.resource_version = Some(rv);
        meta.generation.get_or_insert(1);

        store
            .objects
            .insert((object.kind(), identity), object.clone());
        object
    }

    /// Current stored copy of an object, if any
    pub fn get(&self, kind: ObjectKind, identity: &ResourceIdentity) -> Option<Object> {
        self.store
            .lock()
            .objects
            .get(&(kind, identity.clone()))
            .cloned()
    }

    /// Remove an object; returns true if it existed
    pub fn remove(&self, kind: ObjectKind, identity: &ResourceIdentity) -> bool {
        self.store
            .lock()
            .objects
            .remove(&(kind, identity.clone()))
            .is_some()
    }

    /// Number of stored objects of `kind`
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.store
            .lock()
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

/// Copy `from`'s status onto `into`; kinds are checked by the caller
fn carry_status(from: &Object, into: &mut Object) {
    match (from, into) {
        (Object::Memcached(src), Object::Memcached(dst)) => dst.status = src.status.clone(),
        (Object::Deployment(src), Object::Deployment(dst)) => dst.status = src.status.clone(),
        _ => {}
    }
}

fn spec_changed(stored: &Object, incoming: &Object) -> bool {
    match (stored, incoming) {
        (Object::Memcached(a), Object::Memcached(b)) => a.spec != b.spec,
        (Object::Deployment(a), Object::Deployment(b)) => a.spec != b.spec,
        _ => true,
    }
}

#[async_trait]
impl ClientPort for InMemoryClient {
    async fn fetch(&self, identity: &ResourceIdentity, kind: ObjectKind) -> Result<Object, Error> {
        self.get(kind, identity)
            .ok_or_else(|| Error::not_found(kind, identity.to_string()))
    }

    async fn create(&self, mut object: Object) -> Result<Object, Error> {
        let mut store = self.store.lock();
        let identity = object.identity();
        let key = (object.kind(), identity.clone());
        if store.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: object.kind(),
                name: identity.to_string(),
            });
        }

        let rv = store.bump();
        let meta = object.meta_mut();
        meta.namespace = Some(identity.namespace.clone());
        meta.uid = Some(format!("uid-{identity}"));
        meta.resource_version = Some(rv);
        meta.generation = Some(1);

        store.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, mut object: Object) -> Result<Object, Error> {
        let mut store = self.store.lock();
        let stored = store.current(&object)?.clone();

        carry_status(&stored, &mut object);
        let generation = stored.meta().generation.unwrap_or(1);
        let changed = spec_changed(&stored, &object);

        let rv = store.bump();
        let meta = object.meta_mut();
        meta.uid = stored.meta().uid.clone();
        meta.resource_version = Some(rv);
        meta.generation = Some(if changed { generation + 1 } else { generation });

        store
            .objects
            .insert((object.kind(), object.identity()), object.clone());
        Ok(object)
    }

    async fn update_status(&self, object: Object) -> Result<Object, Error> {
        let mut store = self.store.lock();
        let mut stored = store.current(&object)?.clone();

        carry_status(&object, &mut stored);
        let rv = store.bump();
        stored.meta_mut().resource_version = Some(rv);

        store
            .objects
            .insert((stored.kind(), stored.identity()), stored.clone());
        Ok(stored)
    }
}
