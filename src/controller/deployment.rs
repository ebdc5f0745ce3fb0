//! Deployment construction for a Memcached resource
//!
//! Builds the Deployment that materializes a Memcached: a single
//! `memcached` container under the restricted pod security profile,
//! scaled to `spec.size`, owned by the Memcached so it is garbage
//! collected with it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, PodSecurityContext, PodSpec, PodTemplateSpec,
    SeccompProfile, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::crd::Memcached;
use crate::Error;

/// Image used when none is configured
pub const DEFAULT_IMAGE: &str = "memcached:1.6.26-alpine3.19";

/// Port memcached listens on
pub const MEMCACHED_PORT: i32 = 11211;

/// Label key/value shared by the selector and the pod template
const APP_LABEL: (&str, &str) = ("app.kubernetes.io/name", "project");

/// UID the container runs as
const RUN_AS_USER: i64 = 1001;

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.0.to_string(), APP_LABEL.1.to_string())])
}

/// Build the Deployment for `memcached`, without an owner reference
///
/// Name and namespace are the Memcached's; replicas mirror `spec.size`.
pub fn deployment_for(memcached: &Memcached, image: &str) -> Deployment {
    let container = Container {
        name: "memcached".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(RUN_AS_USER),
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ports: Some(vec![ContainerPort {
            container_port: MEMCACHED_PORT,
            name: Some("memcached".to_string()),
            ..Default::default()
        }]),
        command: Some(
            ["memcached", "--memory-limit=64", "-o", "modern", "-v"]
                .into_iter()
                .map(String::from)
                .collect(),
        ),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(memcached.name_any()),
            namespace: memcached.namespace(),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(memcached.size()),
            selector: LabelSelector {
                match_labels: Some(labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        seccomp_profile: Some(SeccompProfile {
                            type_: "RuntimeDefault".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Replica count a Deployment declares, if any
pub fn replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|s| s.replicas)
}

/// Establishes the ownership link from a Memcached to its Deployment
#[cfg_attr(test, automock)]
pub trait OwnerLinker: Send + Sync {
    /// Mark `owner` as the controller of `dependent`
    fn set_controller_reference(
        &self,
        owner: &Memcached,
        dependent: &mut Deployment,
    ) -> Result<(), Error>;
}

/// Default [`OwnerLinker`]: a controller owner reference with blocking deletion
#[derive(Clone, Copy, Debug, Default)]
pub struct ControllerReference;

impl OwnerLinker for ControllerReference {
    fn set_controller_reference(
        &self,
        owner: &Memcached,
        dependent: &mut Deployment,
    ) -> Result<(), Error> {
        let mut reference = owner.controller_owner_ref(&()).ok_or_else(|| {
            Error::owner_reference(format!(
                "Memcached {} has no uid; it must be persisted before owning objects",
                owner.name_any()
            ))
        })?;
        reference.block_owner_deletion = Some(true);

        let dependent_name = dependent.name_any();
        let refs = dependent.owner_references_mut();
        if let Some(existing) = refs
            .iter()
            .find(|r| r.controller == Some(true) && r.uid != reference.uid)
        {
            return Err(Error::owner_reference(format!(
                "Deployment {} is already controlled by {} {}",
                dependent_name,
                existing.kind,
                existing.name
            )));
        }

        refs.retain(|r| r.uid != reference.uid);
        refs.push(reference);
        Ok(())
    }
}
