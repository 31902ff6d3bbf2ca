//! TLS client configuration for etcd connections.
//!
//! Builds a rustls `ClientConfig` from the three certificate file paths used
//! during bootstrap: CA certificate, client certificate, client key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while loading TLS material.
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid PEM in {path}: {reason}")]
    InvalidPem { path: PathBuf, reason: String },

    #[error("Client certificate and key must be provided together")]
    IncompleteIdentity,

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// TLS configuration for etcd connections (file paths).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsClientConfig {
    /// Path to CA certificate file. `None` disables server verification.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to client certificate file.
    pub cert_path: Option<PathBuf>,
    /// Path to client key file.
    pub key_path: Option<PathBuf>,
}

impl TlsClientConfig {
    /// Build from string paths, treating empty strings as absent.
    pub fn from_paths(ca_cert_path: &str, cert_path: &str, key_path: &str) -> Self {
        let non_empty = |p: &str| (!p.is_empty()).then(|| PathBuf::from(p));
        Self {
            ca_cert_path: non_empty(ca_cert_path),
            cert_path: non_empty(cert_path),
            key_path: non_empty(key_path),
        }
    }

    /// Whether server certificates are accepted without verification.
    pub fn is_insecure(&self) -> bool {
        self.ca_cert_path.is_none()
    }

    /// Load the certificate files and build a rustls client configuration.
    ///
    /// ALPN is set to `h2` as required for gRPC over TLS.
    pub fn load(&self) -> Result<Arc<ClientConfig>, TlsError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let builder =
            ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

        let builder = match &self.ca_cert_path {
            Some(path) => builder.with_root_certificates(load_root_store(path)?),
            None => {
                warn!(
                    "No CA certificate configured for etcd client; server certificates will NOT be verified"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            }
        };

        let mut config = match (&self.cert_path, &self.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certs(cert_path)?;
                let key = load_private_key(key_path)?;
                builder.with_client_auth_cert(certs, key)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => return Err(TlsError::IncompleteIdentity),
        };

        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(Arc::new(config))
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidPem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(TlsError::InvalidPem {
            path: path.to_path_buf(),
            reason: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read_file(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| TlsError::InvalidPem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| TlsError::InvalidPem {
            path: path.to_path_buf(),
            reason: "no private key found".to_string(),
        })
}

/// Verifier used when no CA is configured: the chain is not checked, but
/// handshake signatures still are.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
