//! Proxy mode: request secrets from the attested secret server.
//!
//! The agent authenticates with the mounted service-account token and binds
//! itself to the pod by recomputing the command signature the mutator wrote
//! at admission time.

use crate::error::AgentError;
use crate::settings::{get_env, get_env_bool, get_env_u32};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// The wire payload of `POST /secret`. The token travels in the `X-Token`
/// header only.
#[derive(Debug, Serialize)]
pub struct GetSecretPayload {
    pub resources: String,
    pub name: String,
    pub uid: String,
    pub signature: String,
}

/// Hex SHA-256 over the whitespace-trimmed, single-space-joined argv. Must
/// match what the mutator bound into the pod annotation.
pub fn command_signature(argv: &[String]) -> String {
    let joined = argv.join(" ");
    hex::encode(Sha256::digest(joined.trim().as_bytes()))
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub address: String,
    pub skip_verify_tls: bool,
    pub dns_resolver: String,
    pub pod_name: String,
    pub uid: String,
    pub retries: u32,
    pub token_file: PathBuf,
}

impl ProxySettings {
    pub fn from_env(retries: u32) -> Self {
        Self {
            address: get_env("PIGGY_ADDRESS", ""),
            skip_verify_tls: get_env_bool("PIGGY_SKIP_VERIFY_TLS", true),
            dns_resolver: get_env("PIGGY_DNS_RESOLVER", ""),
            pod_name: get_env("PIGGY_POD_NAME", ""),
            uid: get_env("PIGGY_UID", ""),
            retries: get_env_u32("PIGGY_NUMBER_OF_RETRY", retries).max(1),
            token_file: PathBuf::from(TOKEN_PATH),
        }
    }
}

/// Requests the secret mapping, retrying with a fixed 500 ms pause and
/// aggregating the per-attempt failures.
pub fn request_secrets(
    settings: &ProxySettings,
    signature: &str,
) -> Result<BTreeMap<String, String>, AgentError> {
    let token = std::fs::read_to_string(&settings.token_file)
        .map_err(|source| AgentError::Token {
            path: settings.token_file.clone(),
            source,
        })?
        .trim()
        .to_string();
    let client = build_client(settings)?;
    let payload = GetSecretPayload {
        resources: "pods".to_string(),
        name: settings.pod_name.clone(),
        uid: settings.uid.clone(),
        signature: signature.to_string(),
    };
    let url = format!("{}/secret", settings.address.trim_end_matches('/'));
    debug!(address = %settings.address, "requesting secrets");

    let mut errors = Vec::new();
    for attempt in 1..=settings.retries {
        match send_request(&client, &url, &token, &payload) {
            Ok(secrets) => return Ok(secrets),
            Err(reason) => {
                warn!(attempt, "secret request failed");
                errors.push(format!("attempt {attempt}: {reason}"));
                if attempt < settings.retries {
                    std::thread::sleep(RETRY_INTERVAL);
                }
            }
        }
    }
    Err(AgentError::SecretRequest {
        address: settings.address.clone(),
        errors: errors.join("; "),
    })
}

fn send_request(
    client: &reqwest::blocking::Client,
    url: &str,
    token: &str,
    payload: &GetSecretPayload,
) -> Result<BTreeMap<String, String>, String> {
    let response = client
        .post(url)
        .header("X-Token", token)
        .json(payload)
        .send()
        .map_err(|err| err.to_string())?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(format!("server returned {status}: {body}"));
    }
    response
        .json::<BTreeMap<String, String>>()
        .map_err(|err| format!("decoding response: {err}"))
}

fn build_client(settings: &ProxySettings) -> Result<reqwest::blocking::Client, AgentError> {
    let mut builder = reqwest::blocking::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(settings.skip_verify_tls);
    if let Some((host, address)) = resolve_server(settings)? {
        builder = builder.resolve(&host, address);
    }
    builder
        .build()
        .map_err(|err| AgentError::HttpClient(err.to_string()))
}

/// When a DNS transport override is configured, resolves the secret-server
/// host through the system nameservers over that transport and pins the
/// result on the HTTP client.
fn resolve_server(settings: &ProxySettings) -> Result<Option<(String, SocketAddr)>, AgentError> {
    let transport = settings.dns_resolver.to_ascii_lowercase();
    if transport.is_empty() {
        return Ok(None);
    }
    let url = url::Url::parse(&settings.address)
        .map_err(|err| AgentError::HttpClient(format!("invalid address: {err}")))?;
    let Some(host) = url.host_str() else {
        return Ok(None);
    };
    if host.parse::<IpAddr>().is_ok() {
        return Ok(None);
    }
    let ip = resolve_with_transport(host, &transport)?;
    debug!(%host, %ip, %transport, "pinned secret server address");
    Ok(Some((host.to_string(), SocketAddr::new(ip, 0))))
}

fn resolve_with_transport(host: &str, transport: &str) -> Result<IpAddr, AgentError> {
    use hickory_resolver::Resolver;
    use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig};
    use hickory_resolver::system_conf::read_system_conf;

    let protocol = match transport {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        other => {
            warn!(transport = %other, "unknown dns transport, using udp");
            Protocol::Udp
        }
    };
    let dns_error = |reason: String| AgentError::DnsResolve {
        host: host.to_string(),
        transport: transport.to_string(),
        reason,
    };
    let (system_config, options) = read_system_conf().map_err(|err| dns_error(err.to_string()))?;
    let mut config = ResolverConfig::new();
    for name_server in system_config.name_servers() {
        config.add_name_server(NameServerConfig::new(name_server.socket_addr, protocol));
    }
    let resolver = Resolver::new(config, options).map_err(|err| dns_error(err.to_string()))?;
    let lookup = resolver
        .lookup_ip(host)
        .map_err(|err| dns_error(err.to_string()))?;
    lookup
        .iter()
        .next()
        .ok_or_else(|| dns_error("no addresses found".to_string()))
}
