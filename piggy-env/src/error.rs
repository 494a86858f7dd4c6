//! Agent error kinds. Secrets and tokens never appear in messages.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("no command specified after `--`")]
    MissingCommand,

    #[error("reading service account token {path}: {source}")]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("building http client: {0}")]
    HttpClient(String),

    #[error("resolving `{host}` over {transport}: {reason}")]
    DnsResolve {
        host: String,
        transport: String,
        reason: String,
    },

    #[error("requesting secrets from {address}: [{errors}]")]
    SecretRequest { address: String, errors: String },

    #[error("secrets manager: {0}")]
    SecretsManager(String),

    #[error("parameter store: {0}")]
    ParameterStore(String),

    #[error("secret payload is not a JSON object of strings: {0}")]
    MalformedSecret(String),

    #[error("building async runtime: {0}")]
    Runtime(String),

    #[error("[{0}] not found")]
    UnresolvedReference(String),

    #[error("installing to {destination}: {source}")]
    Install {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment entry `{0}` contains an interior NUL")]
    InvalidEnvEntry(String),

    #[error("failed to exec `{command}`: {reason}")]
    Exec { command: String, reason: String },
}
