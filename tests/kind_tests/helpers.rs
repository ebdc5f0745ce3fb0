//! Shared helpers for live-cluster tests

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use memcached_operator::crd::Memcached;

/// Namespace the stories run in
pub const TEST_NAMESPACE: &str = "default";

/// Connect to the current cluster and make sure the Memcached CRD is served
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let client = Client::try_default()
        .await
        .map_err(|e| format!("no cluster available: {e}"))?;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        "memcacheds.cache.example.com",
        &PatchParams::apply("memcached-operator-tests").force(),
        &Patch::Apply(&Memcached::crd()),
    )
    .await
    .map_err(|e| format!("failed to apply CRD: {e}"))?;

    // Give the API server a moment to start serving the new type
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(client)
}

/// Delete a Memcached and its Deployment, ignoring absence
pub async fn cleanup(client: &Client, name: &str) {
    let memcacheds: Api<Memcached> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = memcacheds.delete(name, &DeleteParams::default()).await;
    let _ = deployments.delete(name, &DeleteParams::default()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
}
