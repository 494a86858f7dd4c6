//! Container image introspection.
//!
//! When a pod omits a container command, the mutator needs the image's
//! `Entrypoint`/`Cmd` to compute the argv it binds a signature to. Those are
//! read from the OCI registry using the pod's image pull secrets, and cached
//! per image reference unless the reference is mutable (`latest` tag) or the
//! pull policy forces a fresh pull.

use crate::config::PiggyConfig;
use crate::mutate::PodContext;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Secret, ServiceAccount};
use kube::{Api, Client};
use oci_client::secrets::RegistryAuth;
use oci_spec::distribution::Reference;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("container has no image")]
    MissingImage,

    #[error("invalid image reference `{image}`: {reason}")]
    InvalidReference { image: String, reason: String },

    #[error("pulling config of image `{image}`: {reason}")]
    Fetch { image: String, reason: String },

    #[error("decoding config of image `{image}`: {reason}")]
    Decode { image: String, reason: String },
}

/// The runtime config of an image, as stored in its OCI config blob.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ImageConfig {
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ImageConfigFile {
    #[serde(default)]
    config: Option<ImageConfig>,
}

/// Capability needed by the mutator; implemented by [ImageRegistry] and by
/// test stubs.
#[async_trait]
pub trait ImageConfigSource: Send + Sync {
    async fn image_config(
        &self,
        config: &PiggyConfig,
        ctx: &PodContext,
        container: &Container,
    ) -> Result<ImageConfig, RegistryError>;
}

/// Registry-backed image config lookup with an in-process cache.
///
/// The cache is owned here and lives for the duration of the server; misses
/// may race and fetch the same image twice, which is harmless.
pub struct ImageRegistry {
    client: Client,
    cache: RwLock<HashMap<String, ImageConfig>>,
}

impl ImageRegistry {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves registry credentials following the pull-secret order:
    /// pod `imagePullSecrets`, then the configured `image-pull-secret`, then
    /// the service account's attached pull secrets. Unreadable or unmatched
    /// secrets degrade to anonymous access.
    async fn registry_auth(
        &self,
        config: &PiggyConfig,
        ctx: &PodContext,
        reference: &Reference,
    ) -> RegistryAuth {
        let namespace = if config.image_pull_secret_namespace.is_empty() {
            ctx.namespace.clone()
        } else {
            config.image_pull_secret_namespace.clone()
        };
        let mut secret_names = ctx.image_pull_secrets.clone();
        if !config.image_pull_secret.is_empty() {
            secret_names.push(config.image_pull_secret.clone());
        }
        for name in service_account_pull_secrets(
            &self.client,
            &ctx.namespace,
            &ctx.service_account,
        )
        .await
        {
            if !secret_names.contains(&name) {
                secret_names.push(name);
            }
        }

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        for name in &secret_names {
            let secret = match secrets.get(name).await {
                Ok(secret) => secret,
                Err(err) => {
                    warn!(secret = %name, %namespace, error = %err, "cannot read image pull secret");
                    continue;
                }
            };
            if let Some(auth) = auth_from_pull_secret(&secret, reference) {
                debug!(secret = %name, registry = %reference.resolve_registry(), "using image pull secret");
                return auth;
            }
        }
        RegistryAuth::Anonymous
    }
}

#[async_trait]
impl ImageConfigSource for ImageRegistry {
    async fn image_config(
        &self,
        config: &PiggyConfig,
        ctx: &PodContext,
        container: &Container,
    ) -> Result<ImageConfig, RegistryError> {
        let image = container.image.as_deref().ok_or(RegistryError::MissingImage)?;
        if let Some(hit) = self.cache.read().expect("image cache poisoned").get(image) {
            debug!(%image, "found image in cache");
            return Ok(hit.clone());
        }

        let reference: Reference =
            image
                .parse()
                .map_err(|err: oci_spec::distribution::ParseError| RegistryError::InvalidReference {
                    image: image.to_string(),
                    reason: err.to_string(),
                })?;
        let auth = self.registry_auth(config, ctx, &reference).await;

        debug!(%image, "reading image config from registry");
        let client_config = oci_client::client::ClientConfig {
            accept_invalid_certificates: config.image_skip_verify_registry,
            ..Default::default()
        };
        let client = oci_client::Client::new(client_config);
        let (_manifest, _digest, config_json) = client
            .pull_manifest_and_config(&reference, &auth)
            .await
            .map_err(|err| RegistryError::Fetch {
                image: image.to_string(),
                reason: err.to_string(),
            })?;
        let parsed: ImageConfigFile =
            serde_json::from_str(&config_json).map_err(|err| RegistryError::Decode {
                image: image.to_string(),
                reason: err.to_string(),
            })?;
        let image_config = parsed.config.unwrap_or_default();

        if is_allowed_to_cache(container, &reference) {
            self.cache
                .write()
                .expect("image cache poisoned")
                .insert(image.to_string(), image_config.clone());
        }
        Ok(image_config)
    }
}

/// An image result may be cached only when the reference is stable: the pull
/// policy is not `Always` and the identifier is a digest or a non-`latest`
/// tag.
fn is_allowed_to_cache(container: &Container, reference: &Reference) -> bool {
    if container.image_pull_policy.as_deref() == Some("Always") {
        return false;
    }
    match reference.digest() {
        Some(_) => true,
        None => reference.tag().unwrap_or("latest") != "latest",
    }
}

async fn service_account_pull_secrets(
    client: &Client,
    namespace: &str,
    service_account: &str,
) -> Vec<String> {
    let name = if service_account.is_empty() {
        "default"
    } else {
        service_account
    };
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    match api.get_opt(name).await {
        Ok(Some(sa)) => sa
            .image_pull_secrets
            .unwrap_or_default()
            .into_iter()
            .map(|reference| reference.name)
            .filter(|name| !name.is_empty())
            .collect(),
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!(%namespace, service_account = %name, error = %err, "cannot read service account");
            Vec::new()
        }
    }
}

#[derive(Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: HashMap<String, DockerAuthConfig>,
}

#[derive(Deserialize, Default)]
struct DockerAuthConfig {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

/// Extracts basic credentials for the reference's registry from a
/// `kubernetes.io/dockerconfigjson` secret, if present.
fn auth_from_pull_secret(secret: &Secret, reference: &Reference) -> Option<RegistryAuth> {
    let data = secret.data.as_ref()?;
    let raw = data.get(".dockerconfigjson")?;
    let parsed: DockerConfigJson = serde_json::from_slice(&raw.0).ok()?;
    for (server, entry) in parsed.auths {
        if !registry_matches(&server, reference) {
            continue;
        }
        if let (Some(username), Some(password)) = (entry.username.clone(), entry.password.clone()) {
            return Some(RegistryAuth::Basic(username, password));
        }
        if let Some(auth) = entry.auth {
            use base64::Engine as _;
            let decoded = base64::engine::general_purpose::STANDARD.decode(auth).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            return Some(RegistryAuth::Basic(username.to_string(), password.to_string()));
        }
    }
    None
}

/// Compares a dockerconfigjson server key against the reference registry,
/// tolerating scheme prefixes, paths and the docker.io aliases.
fn registry_matches(server: &str, reference: &Reference) -> bool {
    let host = server
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    if host == reference.registry() || host == reference.resolve_registry() {
        return true;
    }
    // `docker.io` credentials are conventionally stored under index.docker.io.
    reference.registry() == "docker.io" && host == "index.docker.io"
}
