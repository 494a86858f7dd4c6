//! The piggy HTTP server.
//!
//! One actix-web server exposes the admission endpoint, the secret endpoint
//! and a health check. TLS is enabled when both a certificate and a key file
//! are configured. Shutdown is handled by the actix signal integration:
//! SIGTERM stops accepting connections and drains in-flight handlers.

pub mod admission;
pub mod secret;
pub mod tls;

use crate::config::get_env;
use crate::mutate::Mutator;
use crate::service::SecretService;
use actix_web::{App, HttpResponse, HttpServer, web};
use std::path::PathBuf;
use tracing::info;

const DEFAULT_WORKERS: usize = 2;
const DEFAULT_LISTEN_ADDRESS: &str = ":8080";

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("binding listener: `{0}`")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tls(#[from] tls::TlsConfigError),
}

/// Listener configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_address: String,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let cert = get_env("TLS_CERT_FILE", "");
        let key = get_env("TLS_PRIVATE_KEY_FILE", "");
        Self {
            listen_address: get_env("LISTEN_ADDRESS", DEFAULT_LISTEN_ADDRESS),
            cert_file: (!cert.is_empty()).then(|| PathBuf::from(cert)),
            key_file: (!key.is_empty()).then(|| PathBuf::from(key)),
        }
    }

    /// Normalizes a Go-style `:8080` address to a bindable `host:port`.
    fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().finish()
}

/// Runs the server until shutdown.
pub async fn run_server(
    config: ServerConfig,
    mutator: Mutator,
    service: SecretService,
) -> Result<(), ServerError> {
    let mutator = web::Data::new(mutator);
    let service = web::Data::new(service);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(mutator.clone())
            .app_data(service.clone())
            .service(web::resource("/healthz").route(web::get().to(healthz)))
            .service(web::resource("/mutate").route(web::post().to(admission::mutate_handler)))
            .service(web::resource("/secret").route(web::post().to(secret::secret_handler)))
    })
    .workers(DEFAULT_WORKERS);

    let address = config.bind_address();
    let server = match (&config.cert_file, &config.key_file) {
        (Some(cert), Some(key)) => {
            info!(%address, "listening with TLS");
            server.bind_rustls_0_23(&address, tls::server_config(cert, key)?)?
        }
        _ => {
            info!(%address, "listening without TLS");
            server.bind(&address)?
        }
    };

    server.run().await?;
    Ok(())
}
