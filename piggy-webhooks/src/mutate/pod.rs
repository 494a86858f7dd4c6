//! Per-pod and per-container mutation.

use crate::config::PiggyConfig;
use crate::mutate::{
    AdmissionError, Mutator, PodContext, SignatureManifest, command_signature, generate_uid,
    manifest_annotation,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EmptyDirVolumeSource, EnvFromSource, EnvVar, EnvVarSource,
    ObjectFieldSelector, Pod, PodSpec, ResourceRequirements, Secret, SecurityContext, Volume,
    VolumeMount,
};
use kube::Api;
use std::collections::BTreeMap;
use tracing::{debug, info};

const VOLUME_NAME: &str = "piggy-env";
const INSTALL_CONTAINER_NAME: &str = "install-piggy-env";
const MOUNT_PATH: &str = "/piggy/";
const AGENT_PATH: &str = "/piggy/piggy-env";
const PLACEHOLDER_PREFIX: &str = "piggy:";

impl Mutator {
    /// Applies the per-pod actions: shared volume, container rewrites, the
    /// install init container and the signature manifest annotation. All
    /// appends are guarded by name so reinvocation does not duplicate
    /// anything.
    pub(crate) async fn mutate_pod(
        &self,
        config: &PiggyConfig,
        namespace: &str,
        pod: &mut Pod,
    ) -> Result<bool, AdmissionError> {
        let mut manifest = SignatureManifest::new();
        {
            let Some(spec) = pod.spec.as_mut() else {
                return Ok(false);
            };
            let ctx = PodContext {
                namespace: namespace.to_string(),
                service_account: spec
                    .service_account_name
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
                image_pull_secrets: spec
                    .image_pull_secrets
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|reference| reference.name)
                    .filter(|name| !name.is_empty())
                    .collect(),
                run_as_user: spec
                    .security_context
                    .as_ref()
                    .and_then(|sc| sc.run_as_user),
            };

            debug!("adding volumes to podspec");
            ensure_volume(spec);

            debug!("mutating containers");
            for container in spec.containers.iter_mut() {
                self.mutate_container(config, &ctx, container, &mut manifest)
                    .await?;
            }
            if let Some(init_containers) = spec.init_containers.as_mut() {
                for container in init_containers.iter_mut() {
                    self.mutate_container(config, &ctx, container, &mut manifest)
                        .await?;
                }
            }

            debug!("adding init-containers to podspec");
            ensure_install_container(config, spec, ctx.run_as_user);
        }

        pod.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(manifest_annotation(), serde_json::to_string(&manifest)?);
        info!(
            pod = pod.metadata.name.as_deref().unwrap_or_default(),
            containers = manifest.len(),
            "pod has been mutated"
        );
        Ok(true)
    }

    /// Rewrites one container when it references at least one `piggy:` value.
    /// A container that is already wrapped keeps its uid and argv; only its
    /// injected environment is refreshed.
    async fn mutate_container(
        &self,
        config: &PiggyConfig,
        ctx: &PodContext,
        container: &mut Container,
        manifest: &mut SignatureManifest,
    ) -> Result<bool, AdmissionError> {
        if !self.references_piggy_env(ctx, container).await? {
            return Ok(false);
        }

        let already_mutated = is_already_mutated(container);
        let (argv, uid) = if already_mutated {
            let args = container.args.as_deref().unwrap_or_default();
            let argv = args[1..].to_vec();
            let uid = env_value(container, "PIGGY_UID").unwrap_or_else(generate_uid);
            (argv, uid)
        } else {
            let argv = self.effective_argv(config, ctx, container).await?;
            (argv, generate_uid())
        };

        debug!(container = %container.name, "modifying container env");
        inject_reserved_env(config, container, &uid);
        debug!(container = %container.name, "modifying container volume mounts");
        mount_shared_volume(container);
        if !already_mutated {
            debug!(container = %container.name, "modifying container command");
            container.command = Some(vec![AGENT_PATH.to_string()]);
            let mut args = Vec::with_capacity(argv.len() + 1);
            args.push("--".to_string());
            args.extend(argv.iter().cloned());
            container.args = Some(args);
        }
        manifest.insert(uid, command_signature(&argv));
        Ok(true)
    }

    /// Resolves the container's declared environment. The container is
    /// rewritten only when at least one resolved value carries the `piggy:`
    /// prefix. Missing optional sources are skipped; missing required ones
    /// reject the whole admission request.
    async fn references_piggy_env(
        &self,
        ctx: &PodContext,
        container: &Container,
    ) -> Result<bool, AdmissionError> {
        let mut found = false;
        for var in container.env.as_deref().unwrap_or_default() {
            if let Some(value) = var.value.as_deref() {
                found |= value.starts_with(PLACEHOLDER_PREFIX);
            } else if let Some(value) = self.look_for_value_from(ctx, container, var).await? {
                found |= value.starts_with(PLACEHOLDER_PREFIX);
            }
        }
        for (_, value) in self
            .look_for_env_from(ctx, container, container.env_from.as_deref().unwrap_or_default())
            .await?
        {
            found |= value.starts_with(PLACEHOLDER_PREFIX);
        }
        Ok(found)
    }

    /// Resolves an `env[].valueFrom` reference to its current value, if it
    /// points at a config map or secret key.
    async fn look_for_value_from(
        &self,
        ctx: &PodContext,
        container: &Container,
        var: &EnvVar,
    ) -> Result<Option<String>, AdmissionError> {
        let Some(source) = var.value_from.as_ref() else {
            return Ok(None);
        };
        if let Some(selector) = source.config_map_key_ref.as_ref() {
            let api: Api<ConfigMap> = Api::namespaced(self.client(), &ctx.namespace);
            let Some(config_map) = api.get_opt(&selector.name).await? else {
                if selector.optional.unwrap_or(false) {
                    return Ok(None);
                }
                return Err(AdmissionError::SourceNotFound {
                    kind: "configmap",
                    name: selector.name.clone(),
                    container: container.name.clone(),
                });
            };
            return Ok(config_map
                .data
                .unwrap_or_default()
                .get(&selector.key)
                .cloned());
        }
        if let Some(selector) = source.secret_key_ref.as_ref() {
            let api: Api<Secret> = Api::namespaced(self.client(), &ctx.namespace);
            let Some(secret) = api.get_opt(&selector.name).await? else {
                if selector.optional.unwrap_or(false) {
                    return Ok(None);
                }
                return Err(AdmissionError::SourceNotFound {
                    kind: "secret",
                    name: selector.name.clone(),
                    container: container.name.clone(),
                });
            };
            return Ok(secret
                .data
                .unwrap_or_default()
                .get(&selector.key)
                .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned()));
        }
        Ok(None)
    }

    /// Resolves all `envFrom` sources into name/value pairs, applying the
    /// source prefix.
    async fn look_for_env_from(
        &self,
        ctx: &PodContext,
        container: &Container,
        env_from: &[EnvFromSource],
    ) -> Result<Vec<(String, String)>, AdmissionError> {
        let mut resolved = Vec::new();
        for source in env_from {
            let prefix = source.prefix.as_deref().unwrap_or_default();
            if let Some(reference) = source.config_map_ref.as_ref() {
                let api: Api<ConfigMap> = Api::namespaced(self.client(), &ctx.namespace);
                let Some(config_map) = api.get_opt(&reference.name).await? else {
                    if reference.optional.unwrap_or(false) {
                        continue;
                    }
                    return Err(AdmissionError::SourceNotFound {
                        kind: "configmap",
                        name: reference.name.clone(),
                        container: container.name.clone(),
                    });
                };
                for (key, value) in config_map.data.unwrap_or_default() {
                    resolved.push((format!("{prefix}{key}"), value));
                }
            }
            if let Some(reference) = source.secret_ref.as_ref() {
                let api: Api<Secret> = Api::namespaced(self.client(), &ctx.namespace);
                let Some(secret) = api.get_opt(&reference.name).await? else {
                    if reference.optional.unwrap_or(false) {
                        continue;
                    }
                    return Err(AdmissionError::SourceNotFound {
                        kind: "secret",
                        name: reference.name.clone(),
                        container: container.name.clone(),
                    });
                };
                for (key, value) in secret.data.unwrap_or_default() {
                    resolved.push((
                        format!("{prefix}{key}"),
                        String::from_utf8_lossy(&value.0).into_owned(),
                    ));
                }
            }
        }
        Ok(resolved)
    }

    /// Computes the argv the container would run with before wrapping:
    /// explicit command ++ args, or the image entrypoint (++ image cmd when
    /// the container declares no args) ++ args. A registry failure rejects
    /// the admission request; binding an empty argv to the empty-string
    /// signature would produce a container that can never exec.
    async fn effective_argv(
        &self,
        config: &PiggyConfig,
        ctx: &PodContext,
        container: &Container,
    ) -> Result<Vec<String>, AdmissionError> {
        let mut entry = container.command.clone().unwrap_or_default();
        if entry.is_empty() {
            let image_config = self
                .registry()
                .image_config(config, ctx, container)
                .await
                .map_err(|source| AdmissionError::Registry {
                    container: container.name.clone(),
                    source,
                })?;
            entry.extend(image_config.entrypoint.unwrap_or_default());
            // Without explicit args the image CMD applies, per the
            // kubernetes command/args override table.
            if container.args.as_deref().unwrap_or_default().is_empty() {
                entry.extend(image_config.cmd.unwrap_or_default());
            }
        }
        entry.extend(container.args.clone().unwrap_or_default());
        Ok(entry)
    }
}

fn is_already_mutated(container: &Container) -> bool {
    container
        .command
        .as_deref()
        .is_some_and(|command| command == [AGENT_PATH])
        && container
            .args
            .as_deref()
            .unwrap_or_default()
            .first()
            .map(String::as_str)
            == Some("--")
}

fn env_value(container: &Container, name: &str) -> Option<String> {
    container
        .env
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|var| var.name == name)
        .and_then(|var| var.value.clone())
}

/// Appends the shared in-memory volume once.
fn ensure_volume(spec: &mut PodSpec) {
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if volumes.iter().any(|volume| volume.name == VOLUME_NAME) {
        return;
    }
    volumes.push(Volume {
        name: VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });
}

/// Ensures the bootstrap install container is the first init container.
fn ensure_install_container(config: &PiggyConfig, spec: &mut PodSpec, run_as_user: Option<i64>) {
    let init_containers = spec.init_containers.get_or_insert_with(Vec::new);
    if init_containers
        .iter()
        .any(|container| container.name == INSTALL_CONTAINER_NAME)
    {
        return;
    }
    init_containers.insert(
        0,
        Container {
            name: INSTALL_CONTAINER_NAME.to_string(),
            image: Some(config.piggy_image.clone()),
            image_pull_policy: Some(config.piggy_image_pull_policy.clone()),
            args: Some(vec!["install".to_string(), "/piggy".to_string()]),
            volume_mounts: Some(vec![VolumeMount {
                name: VOLUME_NAME.to_string(),
                mount_path: MOUNT_PATH.to_string(),
                ..Default::default()
            }]),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(config.piggy_psp_allow_privilege_escalation),
                run_as_user,
                ..Default::default()
            }),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([
                    ("cpu".to_string(), config.piggy_resource_cpu_limit.clone()),
                    (
                        "memory".to_string(),
                        config.piggy_resource_memory_limit.clone(),
                    ),
                ])),
                requests: Some(BTreeMap::from([
                    (
                        "cpu".to_string(),
                        config.piggy_resource_cpu_request.clone(),
                    ),
                    (
                        "memory".to_string(),
                        config.piggy_resource_memory_request.clone(),
                    ),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
}

/// Replaces or appends an env var by name.
fn upsert_env(env: &mut Vec<EnvVar>, var: EnvVar) {
    match env.iter_mut().find(|existing| existing.name == var.name) {
        Some(existing) => *existing = var,
        None => env.push(var),
    }
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Injects the reserved `PIGGY_*` wiring, each entry gated on its config
/// option, replacing same-named entries instead of duplicating them.
fn inject_reserved_env(config: &PiggyConfig, container: &mut Container, uid: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    if !config.aws_secret_name.is_empty() {
        upsert_env(env, plain_env("PIGGY_AWS_SECRET_NAME", &config.aws_secret_name));
    }
    if !config.aws_ssm_parameter_path.is_empty() {
        upsert_env(
            env,
            plain_env("PIGGY_AWS_SSM_PARAMETER_PATH", &config.aws_ssm_parameter_path),
        );
    }
    if !config.aws_region.is_empty() {
        upsert_env(env, plain_env("PIGGY_AWS_REGION", &config.aws_region));
    }
    if config.debug {
        upsert_env(env, plain_env("PIGGY_DEBUG", "true"));
    }
    if config.standalone {
        upsert_env(env, plain_env("PIGGY_STANDALONE", "true"));
    } else if !config.piggy_address.is_empty() {
        upsert_env(env, plain_env("PIGGY_ADDRESS", &config.piggy_address));
        upsert_env(
            env,
            EnvVar {
                name: "PIGGY_POD_NAME".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.name".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        upsert_env(env, plain_env("PIGGY_UID", uid));
        if !config.piggy_skip_verify_tls {
            upsert_env(env, plain_env("PIGGY_SKIP_VERIFY_TLS", "false"));
        }
    }
    if config.piggy_ignore_no_env {
        upsert_env(env, plain_env("PIGGY_IGNORE_NO_ENV", "true"));
    }
    if !config.piggy_dns_resolver.is_empty() {
        upsert_env(env, plain_env("PIGGY_DNS_RESOLVER", &config.piggy_dns_resolver));
    }
    if let Some(delay) = config.piggy_initial_delay {
        upsert_env(
            env,
            plain_env("PIGGY_INITIAL_DELAY", format!("{}ms", delay.as_millis())),
        );
    }
    if config.piggy_number_of_retry > 1 {
        upsert_env(
            env,
            plain_env("PIGGY_NUMBER_OF_RETRY", config.piggy_number_of_retry.to_string()),
        );
    }
}

/// Mounts the shared volume once.
fn mount_shared_volume(container: &mut Container) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    if mounts.iter().any(|mount| mount.name == VOLUME_NAME) {
        return;
    }
    mounts.push(VolumeMount {
        name: VOLUME_NAME.to_string(),
        mount_path: MOUNT_PATH.to_string(),
        ..Default::default()
    });
}
