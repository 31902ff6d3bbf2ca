//! Bootstrap configuration for the local etcd member.
//!
//! Loaded from a YAML document, e.g.:
//! ```yaml
//! advertiseAddress: 10.0.0.3
//! highAvailabilityPeer: 10.0.0.1:6443,10.0.0.2:6443
//! certificatesDir: /etc/kubernetes/pki
//! kubernetesVersion: v1.13.5
//! etcd:
//!   dataDir: /var/lib/etcd
//!   extraArgs:
//!     heartbeat-interval: "250"
//! discovery:
//!   retryIntervalSeconds: 5
//!   maxAttempts: 120
//! ```

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::TlsClientConfig;
use crate::membership::RetryPolicy;

/// Address used when no advertise address is configured.
pub const DEFAULT_ADVERTISE_ADDRESS: &str = "127.0.0.1";

/// CA certificate file name under the certificates directory.
pub const CA_CERT_NAME: &str = "ca.crt";
/// Client certificate used to talk to an existing etcd cluster.
pub const ETCD_CLIENT_CERT_NAME: &str = "apiserver-etcd-client.crt";
/// Client key used to talk to an existing etcd cluster.
pub const ETCD_CLIENT_KEY_NAME: &str = "apiserver-etcd-client.key";
/// Serving and peer certificate of the local etcd member.
pub const SERVER_CERT_NAME: &str = "apiserver.crt";
/// Serving and peer key of the local etcd member.
pub const SERVER_KEY_NAME: &str = "apiserver.key";

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Node bootstrap configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// IP address this node's etcd endpoints are reachable on.
    /// Defaults to loopback when empty.
    #[serde(default)]
    pub advertise_address: String,

    /// Comma-separated endpoints of an already running control plane.
    /// Empty means this node forms a new cluster.
    #[serde(default)]
    pub high_availability_peer: String,

    /// Directory holding the CA, client and serving certificates.
    #[serde(default = "default_certificates_dir")]
    pub certificates_dir: String,

    /// Registry prefix for core images.
    #[serde(default = "default_image_repository")]
    pub image_repository: String,

    /// Kubernetes version, used to pick the etcd image tag.
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,

    /// Local etcd settings.
    #[serde(default)]
    pub etcd: EtcdSpec,

    /// Membership discovery settings.
    #[serde(default)]
    pub discovery: DiscoverySpec,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            advertise_address: String::new(),
            high_availability_peer: String::new(),
            certificates_dir: default_certificates_dir(),
            image_repository: default_image_repository(),
            kubernetes_version: default_kubernetes_version(),
            etcd: EtcdSpec::default(),
            discovery: DiscoverySpec::default(),
        }
    }
}

fn default_certificates_dir() -> String {
    "/etc/kubernetes/pki".to_string()
}

fn default_image_repository() -> String {
    "k8s.gcr.io".to_string()
}

fn default_kubernetes_version() -> String {
    "v1.13.5".to_string()
}

/// Local etcd member settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdSpec {
    /// Host directory for etcd data (default: /var/lib/etcd).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Full image reference overriding the resolved default.
    #[serde(default)]
    pub image: String,

    /// Extra etcd flags (without leading dashes); override defaults.
    #[serde(default)]
    pub extra_args: BTreeMap<String, String>,
}

impl Default for EtcdSpec {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            image: String::new(),
            extra_args: BTreeMap::new(),
        }
    }
}

fn default_data_dir() -> String {
    "/var/lib/etcd".to_string()
}

/// Settings for discovering and joining an existing cluster.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySpec {
    /// Seconds between attempts (default: 5).
    #[serde(default = "default_retry_interval_seconds")]
    pub retry_interval_seconds: u64,

    /// Maximum attempts (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,

    /// Overall deadline in seconds (0 = none).
    #[serde(default)]
    pub deadline_seconds: u64,

    /// Connection timeout per attempt, including the TLS handshake (default: 3).
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Timeout per request (default: 5).
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for DiscoverySpec {
    fn default() -> Self {
        Self {
            retry_interval_seconds: default_retry_interval_seconds(),
            max_attempts: 0,
            deadline_seconds: 0,
            connect_timeout_seconds: default_connect_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

fn default_retry_interval_seconds() -> u64 {
    5
}

fn default_connect_timeout_seconds() -> u64 {
    3
}

fn default_request_timeout_seconds() -> u64 {
    5
}

impl DiscoverySpec {
    /// Retry policy for the membership resolver.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_secs(self.retry_interval_seconds),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            deadline: (self.deadline_seconds > 0).then(|| Duration::from_secs(self.deadline_seconds)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl BootstrapConfig {
    /// Parse configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Effective advertise address (loopback when unset).
    pub fn advertise_address(&self) -> &str {
        let addr = self.advertise_address.trim();
        if addr.is_empty() {
            DEFAULT_ADVERTISE_ADDRESS
        } else {
            addr
        }
    }

    /// Configured peer endpoint list, if any.
    pub fn peer_endpoints(&self) -> Option<&str> {
        let peer = self.high_availability_peer.trim();
        (!peer.is_empty()).then_some(peer)
    }

    /// Path of a file under the certificates directory.
    pub fn certificate_path(&self, name: &str) -> PathBuf {
        Path::new(&self.certificates_dir).join(name)
    }

    /// TLS material used to query an existing cluster.
    pub fn probe_tls(&self) -> TlsClientConfig {
        TlsClientConfig {
            ca_cert_path: Some(self.certificate_path(CA_CERT_NAME)),
            cert_path: Some(self.certificate_path(ETCD_CLIENT_CERT_NAME)),
            key_path: Some(self.certificate_path(ETCD_CLIENT_KEY_NAME)),
        }
    }

    /// Validate the configuration.
    ///
    /// Returns `Ok(())` or the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr = self.advertise_address();
        if addr.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "advertiseAddress {:?} is not an IP address",
                addr
            )));
        }

        if self.certificates_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "certificatesDir must not be empty".to_string(),
            ));
        }

        if !Path::new(&self.etcd.data_dir).is_absolute() {
            return Err(ConfigError::Validation(format!(
                "etcd.dataDir {:?} must be an absolute path",
                self.etcd.data_dir
            )));
        }

        for key in self.etcd.extra_args.keys() {
            if key.is_empty() || key.starts_with('-') || key.contains('=') {
                return Err(ConfigError::Validation(format!(
                    "etcd.extraArgs key {:?} must be a bare flag name",
                    key
                )));
            }
        }

        if self.discovery.retry_interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "discovery.retryIntervalSeconds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
