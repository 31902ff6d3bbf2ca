//! etcd command line construction.
//!
//! Default flags are derived from the bootstrap configuration and the
//! membership decision, then merged with user overrides. Keys are emitted in
//! ascending order so identical inputs always render identical commands.

use std::collections::BTreeMap;

use crate::client::types::{ETCD_CLIENT_PORT, ETCD_PEER_PORT, https_url};
use crate::config::{BootstrapConfig, CA_CERT_NAME, SERVER_CERT_NAME, SERVER_KEY_NAME};
use crate::membership::MembershipDecision;

/// etcd binary name in the image.
pub const ETCD_BINARY: &str = "etcd";

/// Cluster token shared by all control plane members.
pub const INITIAL_CLUSTER_TOKEN: &str = "k8s";

/// Plain-HTTP client listener for local health checks.
pub const LOCAL_CLIENT_URL: &str = "http://127.0.0.1:2379";

/// Merge defaults with overrides into `--key=value` tokens.
///
/// An override replaces the default with the same key; keys only present in
/// the overrides are included as well. Keys must be non-empty.
pub fn build_argument_list(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }

    merged
        .iter()
        .map(|(key, value)| {
            debug_assert!(!key.is_empty(), "etcd argument keys must be non-empty");
            format!("--{}={}", key, value)
        })
        .collect()
}

/// Default etcd flags for this node.
pub fn default_etcd_arguments(
    cfg: &BootstrapConfig,
    decision: &MembershipDecision,
) -> BTreeMap<String, String> {
    let addr = cfg.advertise_address();
    let ca = path_arg(cfg, CA_CERT_NAME);
    let cert = path_arg(cfg, SERVER_CERT_NAME);
    let key = path_arg(cfg, SERVER_KEY_NAME);
    let peer_url = https_url(addr, ETCD_PEER_PORT);
    let client_urls = format!("{},{}", https_url(addr, ETCD_CLIENT_PORT), LOCAL_CLIENT_URL);

    let pairs = [
        ("name", decision.self_name.clone()),
        ("data-dir", cfg.etcd.data_dir.clone()),
        ("trusted-ca-file", ca.clone()),
        ("cert-file", cert.clone()),
        ("key-file", key.clone()),
        ("client-cert-auth", "true".to_string()),
        ("peer-trusted-ca-file", ca),
        ("peer-cert-file", cert),
        ("peer-key-file", key),
        ("peer-client-cert-auth", "true".to_string()),
        ("initial-advertise-peer-urls", peer_url.clone()),
        ("listen-peer-urls", peer_url),
        ("listen-client-urls", client_urls.clone()),
        ("advertise-client-urls", client_urls),
        ("initial-cluster-token", INITIAL_CLUSTER_TOKEN.to_string()),
        ("initial-cluster", decision.initial_cluster.clone()),
        ("initial-cluster-state", decision.cluster_state.to_string()),
    ];

    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Full etcd command: the binary followed by the merged flags.
pub fn etcd_command(cfg: &BootstrapConfig, decision: &MembershipDecision) -> Vec<String> {
    let defaults = default_etcd_arguments(cfg, decision);
    std::iter::once(ETCD_BINARY.to_string())
        .chain(build_argument_list(&defaults, &cfg.etcd.extra_args))
        .collect()
}

fn path_arg(cfg: &BootstrapConfig, name: &str) -> String {
    cfg.certificate_path(name).to_string_lossy().into_owned()
}
