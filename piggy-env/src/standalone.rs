//! Standalone mode: fetch secrets directly from the cloud store using the
//! pod's own cloud identity, bypassing the secret server.
//!
//! The agent is synchronous; the async AWS SDK runs on a private
//! current-thread runtime.

use crate::error::AgentError;
use crate::settings::get_env;
use aws_config::{BehaviorVersion, Region};
use std::collections::BTreeMap;
use tracing::{debug, info};

const DEFAULT_VERSION_STAGE: &str = "AWSCURRENT";

/// Fetches the secret mapping from the parameter store when
/// `PIGGY_AWS_SSM_PARAMETER_PATH` is set, from the secrets manager
/// otherwise.
pub fn fetch_secrets() -> Result<BTreeMap<String, String>, AgentError> {
    let region = get_env("PIGGY_AWS_REGION", "");
    let parameter_path = get_env("PIGGY_AWS_SSM_PARAMETER_PATH", "");
    let secret_name = get_env("PIGGY_AWS_SECRET_NAME", "");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AgentError::Runtime(err.to_string()))?;
    runtime.block_on(async move {
        if !parameter_path.is_empty() {
            debug!(path = %parameter_path, "reading parameter store");
            read_parameters(&region, &parameter_path).await
        } else {
            debug!(secret = %secret_name, "reading secrets manager");
            read_secret(&region, &secret_name).await
        }
    })
}

async fn sdk_config(region: &str) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if !region.is_empty() {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

async fn read_secret(region: &str, secret_id: &str) -> Result<BTreeMap<String, String>, AgentError> {
    let config = sdk_config(region).await;
    let client = aws_sdk_secretsmanager::Client::new(&config);
    let output = client
        .get_secret_value()
        .secret_id(secret_id)
        .version_stage(DEFAULT_VERSION_STAGE)
        .send()
        .await
        .map_err(|err| AgentError::SecretsManager(err.to_string()))?;
    match output.secret_string() {
        Some(body) => serde_json::from_str(body)
            .map_err(|err| AgentError::MalformedSecret(err.to_string())),
        None => {
            info!("a binary secret is not supported");
            Ok(BTreeMap::new())
        }
    }
}

async fn read_parameters(
    region: &str,
    path: &str,
) -> Result<BTreeMap<String, String>, AgentError> {
    let config = sdk_config(region).await;
    let client = aws_sdk_ssm::Client::new(&config);
    let mut pages = client
        .get_parameters_by_path()
        .path(path)
        .recursive(true)
        .with_decryption(true)
        .into_paginator()
        .send();
    let mut parameters = BTreeMap::new();
    while let Some(page) = pages
        .try_next()
        .await
        .map_err(|err| AgentError::ParameterStore(err.to_string()))?
    {
        for parameter in page.parameters.unwrap_or_default() {
            let Some(name) = parameter.name else { continue };
            let key = name.rsplit('/').next().unwrap_or(&name).to_string();
            parameters.insert(key, parameter.value.unwrap_or_default());
        }
    }
    Ok(parameters)
}
