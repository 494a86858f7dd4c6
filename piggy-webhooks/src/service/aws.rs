//! Cloud secret store capabilities.
//!
//! The secret service depends on two operations only: reading one secret
//! value and listing a parameter subtree. Both are behind traits so tests
//! inject mocks; the production implementations wrap the AWS SDK clients.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("secrets manager: {0}")]
    SecretsManager(String),

    #[error("parameter store: {0}")]
    ParameterStore(String),
}

/// Reads one secret value from the secret store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretsStore: Send + Sync {
    /// Returns the secret's string body, or `None` when the secret only
    /// carries a binary body.
    async fn get_secret_value(
        &self,
        region: &str,
        secret_id: &str,
        version_stage: &str,
    ) -> Result<Option<String>, StoreError>;
}

/// Lists a parameter subtree from the parameter store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Returns all parameters below `path` (recursive, decrypted), keyed by
    /// the last path segment.
    async fn get_parameters_by_path(
        &self,
        region: &str,
        path: &str,
    ) -> Result<BTreeMap<String, String>, StoreError>;
}

async fn sdk_config(region: &str) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if !region.is_empty() {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

/// AWS Secrets Manager backed [SecretsStore].
#[derive(Debug, Default, Clone)]
pub struct AwsSecretsManager;

#[async_trait]
impl SecretsStore for AwsSecretsManager {
    async fn get_secret_value(
        &self,
        region: &str,
        secret_id: &str,
        version_stage: &str,
    ) -> Result<Option<String>, StoreError> {
        let config = sdk_config(region).await;
        let client = aws_sdk_secretsmanager::Client::new(&config);
        let output = client
            .get_secret_value()
            .secret_id(secret_id)
            .version_stage(version_stage)
            .send()
            .await
            .map_err(|err| StoreError::SecretsManager(err.to_string()))?;
        Ok(output.secret_string().map(str::to_string))
    }
}

/// AWS SSM Parameter Store backed [ParameterStore].
#[derive(Debug, Default, Clone)]
pub struct AwsParameterStore;

#[async_trait]
impl ParameterStore for AwsParameterStore {
    async fn get_parameters_by_path(
        &self,
        region: &str,
        path: &str,
    ) -> Result<BTreeMap<String, String>, StoreError> {
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
            .map_err(|err| StoreError::ParameterStore(err.to_string()))?
        {
            for parameter in page.parameters.unwrap_or_default() {
                let Some(name) = parameter.name else { continue };
                let key = name.rsplit('/').next().unwrap_or(&name).to_string();
                parameters.insert(key, parameter.value.unwrap_or_default());
            }
        }
        Ok(parameters)
    }
}
