//! TLS configuration for the webhook listener.
//!
//! Serving uses TLS 1.2 as the floor, the NIST P curves for key exchange and
//! ECDHE AES-GCM cipher suites only (plus the TLS 1.3 AES-GCM suites, which
//! the protocol mandates). rustls applies server-side suite preference.

use rustls::crypto::CryptoProvider;
use rustls::crypto::aws_lc_rs::{self, cipher_suite, kx_group};
use rustls::{ServerConfig, SupportedCipherSuite};
use rustls::crypto::SupportedKxGroup;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::warn;

static TLS_CIPHER_SUITES: &[SupportedCipherSuite] = &[
    cipher_suite::TLS13_AES_128_GCM_SHA256,
    cipher_suite::TLS13_AES_256_GCM_SHA384,
    cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
];

static TLS_KX_GROUPS: &[&dyn SupportedKxGroup] =
    &[kx_group::SECP256R1, kx_group::SECP384R1, kx_group::SECP521R1];

#[derive(thiserror::Error, Debug)]
pub enum TlsConfigError {
    #[error("error building tls config: `{0}`")]
    BuildingError(String),

    #[error("IO error: `{0}`")]
    IoError(String),
}

/// Installs the process-wide rustls crypto provider. Must run early; a
/// repeated install is harmless.
pub fn install_default_crypto_provider() {
    aws_lc_rs::default_provider()
        .install_default()
        .unwrap_or_else(|_| {
            warn!("rustls default crypto provider was already installed for this process")
        });
}

/// Builds the server TLS configuration from PEM certificate and key files.
pub fn server_config(cert_file: &Path, key_file: &Path) -> Result<ServerConfig, TlsConfigError> {
    let certs = certs_from_file(cert_file)?;
    if certs.is_empty() {
        return Err(TlsConfigError::BuildingError(format!(
            "no certificates found in {}",
            cert_file.to_string_lossy()
        )));
    }
    let key = rustls_pemfile::private_key(&mut open(key_file)?)
        .map_err(|err| {
            TlsConfigError::BuildingError(format!(
                "invalid private key {}: {}",
                key_file.to_string_lossy(),
                err
            ))
        })?
        .ok_or_else(|| {
            TlsConfigError::BuildingError(format!(
                "no private key found in {}",
                key_file.to_string_lossy()
            ))
        })?;

    let provider = CryptoProvider {
        cipher_suites: TLS_CIPHER_SUITES.to_vec(),
        kx_groups: TLS_KX_GROUPS.to_vec(),
        ..aws_lc_rs::default_provider()
    };
    ServerConfig::builder_with_provider(provider.into())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|err| TlsConfigError::BuildingError(err.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| TlsConfigError::BuildingError(err.to_string()))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsConfigError> {
    Ok(BufReader::new(File::open(path).map_err(|err| {
        TlsConfigError::IoError(format!("cannot read {}: {}", path.to_string_lossy(), err))
    })?))
}

fn certs_from_file(
    path: &Path,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, TlsConfigError> {
    rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            TlsConfigError::BuildingError(format!(
                "invalid certificate {}: {}",
                path.to_string_lossy(),
                err
            ))
        })
}
