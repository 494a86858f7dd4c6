//! Kubernetes client construction.

use kube::config::{KubeConfigOptions, KubeconfigError};
use kube::{Client, Config};
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum K8sError {
    #[error("the kube client returned an error: `{0}`")]
    Client(#[from] kube::Error),

    #[error("it is not possible to read kubeconfig: `{0}`")]
    Kubeconfig(#[from] KubeconfigError),
}

/// Constructs a Kubernetes client.
///
/// Tries the in-cluster configuration first and falls back to kubeconfig,
/// honoring `$KUBECONFIG`.
pub async fn try_client() -> Result<Client, K8sError> {
    debug!("trying inClusterConfig for k8s client");
    let config = match Config::incluster() {
        Ok(config) => config,
        Err(_) => {
            debug!("inClusterConfig failed, trying kubeconfig for k8s client");
            Config::from_kubeconfig(&KubeConfigOptions::default()).await?
        }
    };
    let client = Client::try_from(config)?;
    debug!("client creation succeeded");
    Ok(client)
}
