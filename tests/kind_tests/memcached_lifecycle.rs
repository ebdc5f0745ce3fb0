//! Integration tests for the Memcached lifecycle
//!
//! These tests run the reconciler against a real API server through the
//! live client, so resource versions, owner references and the status
//! subresource are enforced by Kubernetes itself.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use tokio_util::sync::CancellationToken;

use memcached_operator::client::{
    FaultInjectingClient, FaultQueue, LiveClient, Operation, ResourceIdentity,
};
use memcached_operator::controller::{replicas, Outcome, Reconciler};
use memcached_operator::crd::{ConditionStatus, Memcached, MemcachedSpec};
use memcached_operator::Error;

use super::helpers::{cleanup, ensure_test_cluster, TEST_NAMESPACE};

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample(name: &str, size: i32) -> Memcached {
    let mut m = Memcached::new(name, MemcachedSpec { size });
    m.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    m
}

async fn apply(client: &Client, memcached: &Memcached) {
    let api: Api<Memcached> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.create(&PostParams::default(), memcached)
        .await
        .expect("failed to create Memcached");
}

async fn pass(reconciler: &Reconciler, name: &str) -> Outcome {
    reconciler
        .reconcile(
            &ResourceIdentity::new(name, TEST_NAMESPACE),
            &CancellationToken::new(),
        )
        .await
}

async fn deployment(client: &Client, name: &str) -> Deployment {
    let api: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.get(name).await.expect("deployment should exist")
}

async fn memcached(client: &Client, name: &str) -> Memcached {
    let api: Api<Memcached> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.get(name).await.expect("memcached should exist")
}

// =============================================================================
// Rollout Stories
// =============================================================================

/// Story: applying a Memcached produces an owned Deployment of the declared
/// size, and the second pass reports it Available.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_memcached_rolls_out_a_deployment() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to connect to test cluster");
    let name = "story-rollout";
    cleanup(&client, name).await;
    apply(&client, &sample(name, 2)).await;

    let reconciler = Reconciler::new(Arc::new(LiveClient::new(client.clone())));

    let first = pass(&reconciler, name).await;
    assert_eq!(first.requeue_after(), Some(Duration::from_secs(60)));

    let dep = deployment(&client, name).await;
    assert_eq!(replicas(&dep), Some(2));
    let owner = &dep.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "Memcached");
    assert_eq!(owner.controller, Some(true));

    let second = pass(&reconciler, name).await;
    assert!(matches!(second, Outcome::Stop));
    let m = memcached(&client, name).await;
    assert_eq!(m.conditions()[0].status, ConditionStatus::True);

    cleanup(&client, name).await;
}

/// Story: scaling the Deployment by hand is undone on the next pass.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_manual_scale_is_reverted_on_the_cluster() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to connect to test cluster");
    let name = "story-drift";
    cleanup(&client, name).await;
    apply(&client, &sample(name, 1)).await;

    let reconciler = Reconciler::new(Arc::new(LiveClient::new(client.clone())));
    pass(&reconciler, name).await;
    pass(&reconciler, name).await;

    let api: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(serde_json::json!({ "spec": { "replicas": 3 } })),
    )
    .await
    .expect("failed to scale deployment");

    let outcome = pass(&reconciler, name).await;
    assert!(matches!(outcome, Outcome::Requeue));
    assert_eq!(replicas(&deployment(&client, name).await), Some(1));

    cleanup(&client, name).await;
}

/// Story: a failing resize against the real API server is written to the
/// Memcached's status as a Resizing condition.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_failed_resize_is_visible_in_status() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to connect to test cluster");
    let name = "story-resize-failure";
    cleanup(&client, name).await;
    apply(&client, &sample(name, 1)).await;

    let live = Reconciler::new(Arc::new(LiveClient::new(client.clone())));
    pass(&live, name).await;
    pass(&live, name).await;

    let memcacheds: Api<Memcached> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    memcacheds
        .patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({ "spec": { "size": 4 } })),
        )
        .await
        .expect("failed to resize memcached");

    let faulty = Reconciler::new(Arc::new(FaultInjectingClient::with_delegate(
        FaultQueue::new().fail(Operation::Update, Error::store("injected update failure")),
        Arc::new(LiveClient::new(client.clone())),
    )));
    let outcome = pass(&faulty, name).await;
    assert!(outcome.error().is_some());

    let condition = memcached(&client, name).await.conditions()[0].clone();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, "Resizing");
    assert!(condition.message.contains("injected update failure"));

    cleanup(&client, name).await;
}

/// Story: reconciling a name that was never applied is a quiet no-op.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_unknown_memcached_is_ignored() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to connect to test cluster");
    let reconciler = Reconciler::new(Arc::new(LiveClient::new(client)));

    let outcome = pass(&reconciler, "story-never-applied").await;
    assert!(matches!(outcome, Outcome::Stop));
}
