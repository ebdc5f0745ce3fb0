//! Fault-injecting client
//!
//! Replays a caller-supplied, per-operation sequence of outcomes before
//! falling back to a delegate [`ClientPort`] (or to a no-op when there is no
//! delegate). This lets every error branch of the reconciler be exercised
//! deterministically without an API server.
//!
//! Each operation has its own FIFO queue. A queued error is returned without
//! calling the delegate; a queued pass entry forwards to the delegate. Queues
//! are consumed destructively, so one client instance must only be driven by
//! one reconcile invocation at a time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use super::{ClientPort, Object, ObjectKind, Operation, ResourceIdentity};
use crate::Error;

/// Category of a fault described in configuration
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum FaultKind {
    /// The object does not exist
    NotFound,
    /// Stale resource version on write
    Conflict,
    /// The store did not answer in time
    Timeout,
    /// Any other store failure
    #[default]
    Other,
}

/// A fault described by kind and message, materialized into an [`Error`]
/// when it is popped so it can name the object it hit
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct InjectedFault {
    /// Fault category
    #[serde(default)]
    pub kind: FaultKind,
    /// Error message
    #[serde(default)]
    pub message: String,
}

impl InjectedFault {
    /// A NotFound fault
    pub fn not_found() -> Self {
        Self {
            kind: FaultKind::NotFound,
            message: String::new(),
        }
    }

    /// A fault of the given kind with a message
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// An `Other` fault without a message carries no failure
    fn is_empty(&self) -> bool {
        self.kind == FaultKind::Other && self.message.is_empty()
    }

    fn into_error(self, kind: ObjectKind, identity: &ResourceIdentity) -> Option<Error> {
        if self.is_empty() {
            return None;
        }
        Some(match self.kind {
            FaultKind::NotFound => Error::not_found(kind, identity.to_string()),
            FaultKind::Conflict => Error::conflict(kind, identity.to_string(), self.message),
            FaultKind::Timeout => Error::store(format!("timeout: {}", self.message)),
            FaultKind::Other => Error::store(self.message),
        })
    }
}

/// One queued outcome
#[derive(Debug)]
enum Fault {
    /// Proceed as if unconfigured
    Pass,
    /// Return this exact error
    Error(Error),
    /// Return an error built from this description
    Injected(InjectedFault),
}

/// Configuration entry as written in YAML/JSON
#[derive(Deserialize)]
#[serde(untagged)]
enum FaultEntry {
    Message(String),
    Detailed(InjectedFault),
}

impl From<Option<FaultEntry>> for Fault {
    fn from(entry: Option<FaultEntry>) -> Self {
        match entry {
            None => Fault::Pass,
            Some(FaultEntry::Message(m)) if m.is_empty() => Fault::Pass,
            Some(FaultEntry::Message(m)) => Fault::Injected(InjectedFault::new(FaultKind::Other, m)),
            Some(FaultEntry::Detailed(f)) => Fault::Injected(f),
        }
    }
}

/// Ordered outcomes per operation
///
/// Build one in code:
///
/// ```ignore
/// let faults = FaultQueue::new()
///     .pass(Operation::Fetch)
///     .fail(Operation::Fetch, Error::store("error reading the object"));
/// ```
///
/// or load it from YAML, where each entry is `null`/`""` (pass), a message
/// string, or `{kind, message}`:
///
/// ```yaml
/// Fetch: [null, null, {kind: NotFound}]
/// Create: ["error creating the object"]
/// ```
#[derive(Debug, Default)]
pub struct FaultQueue {
    entries: BTreeMap<Operation, VecDeque<Fault>>,
}

impl<'de> Deserialize<'de> for FaultQueue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<Operation, Vec<Option<FaultEntry>>>::deserialize(deserializer)?;
        let entries = raw
            .into_iter()
            .map(|(op, list)| (op, list.into_iter().map(Fault::from).collect()))
            .collect();
        Ok(Self { entries })
    }
}

impl FaultQueue {
    /// An empty configuration; every operation behaves as unconfigured
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from YAML (JSON is accepted too)
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization(format!("invalid fault queue: {e}")))
    }

    /// Append a pass-through entry for `op`
    pub fn pass(mut self, op: Operation) -> Self {
        self.push(op, Fault::Pass);
        self
    }

    /// Append an error entry for `op`
    pub fn fail(mut self, op: Operation, error: Error) -> Self {
        self.push(op, Fault::Error(error));
        self
    }

    /// Append a described fault for `op`
    pub fn inject(mut self, op: Operation, fault: InjectedFault) -> Self {
        self.push(op, Fault::Injected(fault));
        self
    }

    /// Register `op` with an empty queue
    pub fn configure(mut self, op: Operation) -> Self {
        self.entries.entry(op).or_default();
        self
    }

    /// Number of entries left for `op`
    pub fn remaining(&self, op: Operation) -> usize {
        self.entries.get(&op).map_or(0, VecDeque::len)
    }

    /// Returns true if `op` has a queue, even an exhausted one
    pub fn is_configured(&self, op: Operation) -> bool {
        self.entries.contains_key(&op)
    }

    fn push(&mut self, op: Operation, fault: Fault) {
        self.entries.entry(op).or_default().push_back(fault);
    }
}

/// What an exhausted queue does when its operation is called again
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Behave as if the operation were unconfigured
    #[default]
    PassThrough,
    /// Panic naming the operation; a missing entry is a test setup bug
    Panic,
}

/// [`ClientPort`] that replays a [`FaultQueue`] in front of an optional delegate
///
/// Entries are popped in call order, so running concurrent reconciles
/// against one instance gives an unspecified interleaving. Use one client
/// per scenario.
pub struct FaultInjectingClient {
    queue: Mutex<FaultQueue>,
    delegate: Option<Arc<dyn ClientPort>>,
    exhaustion: ExhaustionPolicy,
}

impl FaultInjectingClient {
    /// Client with no delegate; anything not failed by the queue is a no-op
    pub fn new(queue: FaultQueue) -> Self {
        Self {
            queue: Mutex::new(queue),
            delegate: None,
            exhaustion: ExhaustionPolicy::default(),
        }
    }

    /// Client that forwards to `delegate` whenever the queue does not fail
    pub fn with_delegate(queue: FaultQueue, delegate: Arc<dyn ClientPort>) -> Self {
        Self {
            queue: Mutex::new(queue),
            delegate: Some(delegate),
            exhaustion: ExhaustionPolicy::default(),
        }
    }

    /// Set the exhaustion policy
    pub fn exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    /// Number of entries left for `op`
    pub fn remaining(&self, op: Operation) -> usize {
        self.queue.lock().remaining(op)
    }

    /// Pop the next outcome for `op`; `Some` is the error to return
    fn next_error(
        &self,
        op: Operation,
        kind: ObjectKind,
        identity: &ResourceIdentity,
    ) -> Option<Error> {
        let mut queue = self.queue.lock();
        let entries = queue.entries.get_mut(&op)?;

        match entries.pop_front() {
            Some(Fault::Pass) => None,
            Some(Fault::Error(e)) => {
                debug!(operation = %op, object = %identity, error = %e, "injecting fault");
                Some(e)
            }
            Some(Fault::Injected(fault)) => {
                let err = fault.into_error(kind, identity);
                if let Some(ref e) = err {
                    debug!(operation = %op, object = %identity, error = %e, "injecting fault");
                }
                err
            }
            None => match self.exhaustion {
                ExhaustionPolicy::PassThrough => {
                    warn!(operation = %op, "fault queue exhausted, passing through");
                    None
                }
                ExhaustionPolicy::Panic => {
                    panic!("no more faults configured for '{op}'")
                }
            },
        }
    }
}

#[async_trait]
impl ClientPort for FaultInjectingClient {
    async fn fetch(&self, identity: &ResourceIdentity, kind: ObjectKind) -> Result<Object, Error> {
        if let Some(e) = self.next_error(Operation::Fetch, kind, identity) {
            return Err(e);
        }
        match &self.delegate {
            Some(delegate) => delegate.fetch(identity, kind).await,
            None => Ok(Object::empty(kind, identity)),
        }
    }

    async fn create(&self, object: Object) -> Result<Object, Error> {
        if let Some(e) = self.next_error(Operation::Create, object.kind(), &object.identity()) {
            return Err(e);
        }
        match &self.delegate {
            Some(delegate) => delegate.create(object).await,
            None => Ok(object),
        }
    }

    async fn update(&self, object: Object) -> Result<Object, Error> {
        if let Some(e) = self.next_error(Operation::Update, object.kind(), &object.identity()) {
            return Err(e);
        }
        match &self.delegate {
            Some(delegate) => delegate.update(object).await,
            None => Ok(object),
        }
    }

    async fn update_status(&self, object: Object) -> Result<Object, Error> {
        if let Some(e) =
            self.next_error(Operation::UpdateStatus, object.kind(), &object.identity())
        {
            return Err(e);
        }
        match &self.delegate {
            Some(delegate) => delegate.update_status(object).await,
            None => Ok(object),
        }
    }
}
