//! Memcached controller implementation
//!
//! The [`Reconciler`] compares a Memcached resource against the Deployment
//! that materializes it and issues at most one corrective write per
//! invocation. It never retries or sleeps internally; every follow-up is
//! expressed as an [`Outcome`] for the dispatcher to act on.
//!
//! Per invocation:
//!
//! 1. Fetch the Memcached. Missing means deleted, so stop.
//! 2. If it carries no conditions yet, record `Available=Unknown` and
//!    re-fetch it so later writes use the fresh resource version.
//! 3. Fetch the Deployment. If missing, build and create it, then requeue
//!    after a delay to observe the result.
//! 4. If the Deployment's replica count drifted, restore it and requeue
//!    immediately to confirm.
//! 5. Otherwise record `Available=True` and stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::deployment::{deployment_for, replicas, ControllerReference, OwnerLinker, DEFAULT_IMAGE};
use crate::client::{ClientPort, ObjectKind, Operation, ResourceIdentity, DEFAULT_FIELD_MANAGER};
use crate::crd::{Condition, ConditionStatus, Memcached, CONDITION_AVAILABLE};
use crate::Error;

/// Reason recorded while the controller is creating or checking the Deployment
pub const REASON_RECONCILING: &str = "Reconciling";

/// Reason recorded when restoring the replica count failed
pub const REASON_RESIZING: &str = "Resizing";

/// Result of one reconcile invocation
#[derive(Debug)]
pub enum Outcome {
    /// Nothing left to do until the resource changes
    Stop,
    /// Redeliver promptly
    Requeue,
    /// Redeliver no sooner than the given delay
    RequeueAfter(Duration),
    /// Redeliver and surface the error
    RequeueWithError(Error),
}

impl Outcome {
    /// Returns true if the dispatcher should redeliver the request
    pub fn requeue(&self) -> bool {
        !matches!(self, Outcome::Stop)
    }

    /// Minimum delay before redelivery, if one was requested
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Outcome::RequeueAfter(d) => Some(*d),
            _ => None,
        }
    }

    /// The error to surface, if any
    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::RequeueWithError(e) => Some(e),
            _ => None,
        }
    }

    /// Convert into the kube-runtime result shape
    ///
    /// Errors are returned as `Err` so the controller's error policy sees
    /// them.
    pub fn into_action(self) -> Result<Action, Error> {
        match self {
            Outcome::Stop => Ok(Action::await_change()),
            Outcome::Requeue => Ok(Action::requeue(Duration::ZERO)),
            Outcome::RequeueAfter(d) => Ok(Action::requeue(d)),
            Outcome::RequeueWithError(e) => Err(e),
        }
    }
}

impl From<Result<Outcome, Error>> for Outcome {
    fn from(result: Result<Outcome, Error>) -> Self {
        result.unwrap_or_else(Outcome::RequeueWithError)
    }
}

/// Tunables for the [`Reconciler`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Container image for new Deployments
    pub image: String,
    /// Delay before re-observing a freshly created Deployment
    pub create_requeue: Duration,
    /// Delay the error policy requeues failed reconciles with
    pub error_requeue: Duration,
    /// Field manager for writes made through the live client
    pub field_manager: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            create_requeue: Duration::from_secs(60),
            error_requeue: Duration::from_secs(5),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

/// The Memcached reconciliation state machine
pub struct Reconciler {
    client: Arc<dyn ClientPort>,
    owner_linker: Arc<dyn OwnerLinker>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a builder around the given client
    pub fn builder(client: Arc<dyn ClientPort>) -> ReconcilerBuilder {
        ReconcilerBuilder::new(client)
    }

    /// Reconciler with default configuration
    pub fn new(client: Arc<dyn ClientPort>) -> Self {
        Self::builder(client).build()
    }

    /// Active configuration
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one reconcile invocation for `identity`
    ///
    /// Every client call races `cancel`; a cancelled call ends the
    /// invocation with [`Error::Cancelled`] naming the operation.
    #[instrument(skip_all, fields(memcached = %identity))]
    pub async fn reconcile(&self, identity: &ResourceIdentity, cancel: &CancellationToken) -> Outcome {
        let outcome: Outcome = self.run(identity, cancel).await.into();
        debug!(?outcome, "reconcile finished");
        outcome
    }

    async fn run(
        &self,
        identity: &ResourceIdentity,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        let mut memcached = match self.fetch_memcached(identity, cancel).await {
            Ok(m) => m,
            Err(e) if e.is_not_found() => {
                info!("memcached resource not found, ignoring since object must be deleted");
                return Ok(Outcome::Stop);
            }
            Err(e) => {
                error!(error = %e, "failed to get memcached");
                return Err(e);
            }
        };
        debug!("memcached resource found");

        if memcached.conditions().is_empty() {
            memcached.set_condition(Condition::new(
                CONDITION_AVAILABLE,
                ConditionStatus::Unknown,
                REASON_RECONCILING,
                "Starting reconciliation",
            ));
            self.write_status(memcached, cancel).await?;

            // The status write bumped the resource version
            memcached = self
                .fetch_memcached(identity, cancel)
                .await
                .inspect_err(|e| error!(error = %e, "failed to re-fetch memcached"))?;
            info!("no status available, set to Unknown");
        }

        let mut deployment = match self.fetch_deployment(identity, cancel).await {
            Ok(d) => d,
            Err(e) if e.is_not_found() => return self.create_deployment(memcached, cancel).await,
            Err(e) => {
                error!(error = %e, "failed to get deployment");
                return Err(e);
            }
        };

        let size = memcached.size();
        let observed = replicas(&deployment);
        if observed != Some(size) {
            info!(
                deployment = %identity,
                ?observed,
                desired = size,
                "found diverging size, changing it back"
            );
            deployment.spec.get_or_insert_with(Default::default).replicas = Some(size);

            let update_err = match self
                .call(cancel, Operation::Update, self.client.update(deployment.into()))
                .await
            {
                Ok(_) => return Ok(Outcome::Requeue),
                Err(e) => e,
            };
            error!(error = %update_err, deployment = %identity, "failed to update deployment");

            let mut memcached = self
                .fetch_memcached(identity, cancel)
                .await
                .inspect_err(|e| error!(error = %e, "failed to re-fetch memcached"))?;
            memcached.set_condition(Condition::new(
                CONDITION_AVAILABLE,
                ConditionStatus::False,
                REASON_RESIZING,
                format!(
                    "Failed to update the size for the custom resource ({}): ({})",
                    memcached.name_any(),
                    update_err
                ),
            ));
            self.write_status(memcached, cancel).await?;
            return Err(update_err);
        }
        debug!(deployment = %identity, "no drift in size found");

        let message = format!(
            "Deployment for custom resource ({}) with {} replicas created successfully",
            memcached.name_any(),
            size
        );
        memcached.set_condition(Condition::new(
            CONDITION_AVAILABLE,
            ConditionStatus::True,
            REASON_RECONCILING,
            message,
        ));
        self.write_status(memcached, cancel).await?;
        Ok(Outcome::Stop)
    }

    /// Build, link and create the Deployment for `memcached`
    async fn create_deployment(
        &self,
        mut memcached: Memcached,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        let mut deployment = deployment_for(&memcached, &self.config.image);
        if let Err(e) = self
            .owner_linker
            .set_controller_reference(&memcached, &mut deployment)
        {
            error!(error = %e, "failed to define new deployment for memcached");
            memcached.set_condition(Condition::new(
                CONDITION_AVAILABLE,
                ConditionStatus::False,
                REASON_RECONCILING,
                format!(
                    "Failed to create Deployment for the custom resource ({}): ({})",
                    memcached.name_any(),
                    e
                ),
            ));
            self.write_status(memcached, cancel).await?;
            return Err(e);
        }

        let name = deployment.name_any();
        info!(deployment = %name, "creating a new deployment");
        self.call(cancel, Operation::Create, self.client.create(deployment.into()))
            .await
            .inspect_err(|e| error!(error = %e, deployment = %name, "failed to create deployment"))?;

        Ok(Outcome::RequeueAfter(self.config.create_requeue))
    }

    async fn fetch_memcached(
        &self,
        identity: &ResourceIdentity,
        cancel: &CancellationToken,
    ) -> Result<Memcached, Error> {
        self.call(
            cancel,
            Operation::Fetch,
            self.client.fetch(identity, ObjectKind::Memcached),
        )
        .await?
        .into_memcached()
    }

    async fn fetch_deployment(
        &self,
        identity: &ResourceIdentity,
        cancel: &CancellationToken,
    ) -> Result<Deployment, Error> {
        self.call(
            cancel,
            Operation::Fetch,
            self.client.fetch(identity, ObjectKind::Deployment),
        )
        .await?
        .into_deployment()
    }

    async fn write_status(
        &self,
        memcached: Memcached,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.call(
            cancel,
            Operation::UpdateStatus,
            self.client.update_status(memcached.into()),
        )
        .await
        .map(|_| ())
        .inspect_err(|e| error!(error = %e, "failed to update memcached status"))
    }

    /// Drive one client call, abandoning it if `cancel` fires first
    async fn call<T>(
        &self,
        cancel: &CancellationToken,
        operation: Operation,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(%operation, "client call cancelled");
                Err(Error::Cancelled { operation })
            }
            result = fut => result,
        }
    }
}

/// Builder for [`Reconciler`]
///
/// ```ignore
/// let reconciler = Reconciler::builder(Arc::new(LiveClient::new(client)))
///     .image("memcached:1.6.26-alpine3.19")
///     .build();
/// ```
pub struct ReconcilerBuilder {
    client: Arc<dyn ClientPort>,
    owner_linker: Option<Arc<dyn OwnerLinker>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    fn new(client: Arc<dyn ClientPort>) -> Self {
        Self {
            client,
            owner_linker: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the container image for new Deployments
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    /// Override the owner linker (primarily for testing)
    pub fn owner_linker(mut self, linker: Arc<dyn OwnerLinker>) -> Self {
        self.owner_linker = Some(linker);
        self
    }

    /// Build the Reconciler
    pub fn build(self) -> Reconciler {
        Reconciler {
            client: self.client,
            owner_linker: self
                .owner_linker
                .unwrap_or_else(|| Arc::new(ControllerReference)),
            config: self.config,
        }
    }
}

/// Controller context shared across reconcile calls
pub struct Context {
    /// The reconciliation state machine
    pub reconciler: Reconciler,
    /// Cancelled when the operator shuts down; aborts in-flight client calls
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a context around a reconciler
    pub fn new(reconciler: Reconciler, shutdown: CancellationToken) -> Self {
        Self {
            reconciler,
            shutdown,
        }
    }
}

/// Reconcile a Memcached resource
///
/// Entry point for the kube-runtime controller. The watched object is only
/// used for its identity; the reconciler fetches the current copy itself.
#[instrument(skip(memcached, ctx), fields(memcached = %memcached.name_any()))]
pub async fn reconcile(memcached: Arc<Memcached>, ctx: Arc<Context>) -> Result<Action, Error> {
    let identity = ResourceIdentity::of(memcached.as_ref());
    ctx.reconciler
        .reconcile(&identity, &ctx.shutdown)
        .await
        .into_action()
}

/// Error policy for the controller
///
/// Logs the failure and requeues after the configured error delay.
pub fn error_policy(memcached: Arc<Memcached>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        memcached = %memcached.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ctx.reconciler.config().error_requeue)
}
