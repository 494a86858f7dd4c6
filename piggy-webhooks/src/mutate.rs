//! Pod admission mutation.
//!
//! Rewrites pod specs so that containers referencing `piggy:<key>`
//! environment values are started through the bootstrap agent installed in
//! a shared in-memory volume. Each rewritten container is bound to the
//! SHA-256 of its final argv through the command-signature manifest
//! annotation.

pub mod pod;
pub mod registry;

use crate::config::{ANNOTATION_NAMESPACE, PIGGY_UID, PiggyConfig};
use crate::mutate::registry::{ImageConfigSource, RegistryError};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::core::admission::AdmissionRequest;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Mapping from per-container uid to the hex SHA-256 of its final argv.
/// Serialized into the `piggysec.com/piggy-uid` annotation.
pub type SignatureManifest = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug)]
pub enum AdmissionError {
    #[error("could not serialize mutated pod: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("env source {kind} `{name}` referenced by container `{container}` not found")]
    SourceNotFound {
        kind: &'static str,
        name: String,
        container: String,
    },

    #[error("reading image config for container `{container}`: {source}")]
    Registry {
        container: String,
        #[source]
        source: RegistryError,
    },

    #[error("the kube client returned an error: `{0}`")]
    Kube(#[from] kube::Error),
}

/// Context extracted from the pod before containers are mutated in place.
#[derive(Debug, Clone, Default)]
pub struct PodContext {
    pub namespace: String,
    pub service_account: String,
    pub image_pull_secrets: Vec<String>,
    pub run_as_user: Option<i64>,
}

/// The admission mutator. Owns the kube client used to resolve env sources
/// and the image registry used to look up container entrypoints.
pub struct Mutator {
    client: Client,
    registry: Arc<dyn ImageConfigSource>,
}

impl Mutator {
    pub fn new(client: Client, registry: Arc<dyn ImageConfigSource>) -> Self {
        Self { client, registry }
    }

    pub(crate) fn client(&self) -> Client {
        self.client.clone()
    }

    pub(crate) fn registry(&self) -> &dyn ImageConfigSource {
        self.registry.as_ref()
    }

    /// Applies piggy to the pod of an admission request. Returns `None` when
    /// there is nothing to mutate: a non-pod resource, a pod without a
    /// configured secret source, or a pod with no spec.
    pub async fn mutate(
        &self,
        req: &AdmissionRequest<Pod>,
    ) -> Result<Option<Pod>, AdmissionError> {
        if req.resource.resource != "pods" {
            debug!(resource = %req.resource.resource, "skipping non-pod resource");
            return Ok(None);
        }
        let Some(pod) = req.object.as_ref() else {
            return Ok(None);
        };
        let annotations = pod.metadata.annotations.clone().unwrap_or_default();
        let config = PiggyConfig::from_annotations(&annotations);
        if !config.is_mutation_enabled() {
            return Ok(None);
        }
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .or_else(|| req.namespace.clone())
            .unwrap_or_else(|| "default".to_string());

        let mut mutated = pod.clone();
        match self.mutate_pod(&config, &namespace, &mut mutated).await? {
            true => Ok(Some(mutated)),
            false => Ok(None),
        }
    }
}

/// Hex SHA-256 over the whitespace-trimmed, single-space-joined argv.
pub fn command_signature(argv: &[String]) -> String {
    let joined = argv.join(" ");
    hex::encode(Sha256::digest(joined.trim().as_bytes()))
}

/// A fresh opaque container uid: 128 random bits as 32 hex chars, dashless.
pub fn generate_uid() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// The full annotation key holding the signature manifest.
pub fn manifest_annotation() -> String {
    format!("{ANNOTATION_NAMESPACE}{PIGGY_UID}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_pinned() {
        let argv = vec!["/bin/app".to_string(), "run".to_string()];
        assert_eq!(
            command_signature(&argv),
            "004292a5607b917c992dda037292d1fdeee6ea3c1129484fbb27d86dd425ec83"
        );
    }

    #[test]
    fn signature_trims_whitespace() {
        assert_eq!(
            command_signature(&["  /bin/app".to_string(), "run  ".to_string()]),
            command_signature(&["/bin/app".to_string(), "run".to_string()])
        );
        assert_eq!(
            command_signature(&[]),
            hex::encode(Sha256::digest(b""))
        );
    }

    #[test]
    fn uids_are_unique_and_dashless() {
        let a = generate_uid();
        let b = generate_uid();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
