use piggy_webhooks::config::get_env_bool;
use piggy_webhooks::mutate::Mutator;
use piggy_webhooks::mutate::registry::ImageRegistry;
use piggy_webhooks::server::tls::install_default_crypto_provider;
use piggy_webhooks::server::{ServerConfig, run_server};
use piggy_webhooks::service::SecretService;
use piggy_webhooks::service::aws::{AwsParameterStore, AwsSecretsManager};
use piggy_webhooks::{k8s, logging};
use std::process::exit;
use std::sync::Arc;
use tracing::error;

#[tokio::main]
async fn main() {
    logging::init(get_env_bool("DEBUG", false));
    install_default_crypto_provider();

    let client = match k8s::try_client().await {
        Ok(client) => client,
        Err(err) => {
            error!("error creating client: {err}");
            exit(1);
        }
    };

    let registry = Arc::new(ImageRegistry::new(client.clone()));
    let mutator = Mutator::new(client.clone(), registry);
    let service = SecretService::new(
        client,
        Arc::new(AwsSecretsManager),
        Arc::new(AwsParameterStore),
    );

    if let Err(err) = run_server(ServerConfig::from_env(), mutator, service).await {
        error!("error serving webhook: {err}");
        exit(1);
    }
}
