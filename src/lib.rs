//! etcd-bootstrap library crate
//!
//! Resolves the local etcd member's place in the control plane cluster and
//! builds the static pod that runs it.
//!
//! Flow: configuration → membership resolution (probing an existing cluster
//! when a peer is configured) → etcd command → static pod.

pub mod client;
pub mod config;
pub mod membership;
pub mod resources;

pub use config::{BootstrapConfig, ConfigError};
pub use membership::{MembershipDecision, MembershipError, MembershipResolver, RetryPolicy};
pub use resources::{ImageError, build_etcd_pod};

use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use client::{EtcdConnector, ProbeConnector};
use membership::MemberIdentity;

/// Errors from a bootstrap run.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Membership resolution failed: {0}")]
    Membership(#[from] MembershipError),

    #[error("Image resolution failed: {0}")]
    Image(#[from] ImageError),
}

/// Build the membership resolver for a configuration.
pub fn membership_resolver<C: ProbeConnector>(
    cfg: &BootstrapConfig,
    connector: C,
) -> MembershipResolver<C> {
    MembershipResolver::new(
        MemberIdentity::new(cfg.advertise_address()),
        cfg.peer_endpoints().map(str::to_string),
        cfg.discovery.retry_policy(),
        connector,
    )
}

/// Resolve membership against the real cluster and build the etcd static pod.
pub async fn bootstrap_local_etcd(
    cfg: &BootstrapConfig,
    cancel: &CancellationToken,
) -> Result<Pod, BootstrapError> {
    let connector = EtcdConnector::new(
        cfg.probe_tls(),
        cfg.discovery.connect_timeout(),
        cfg.discovery.request_timeout(),
    );
    bootstrap_local_etcd_with(cfg, connector, cancel).await
}

/// [`bootstrap_local_etcd`] with a caller-supplied cluster connector.
pub async fn bootstrap_local_etcd_with<C: ProbeConnector>(
    cfg: &BootstrapConfig,
    connector: C,
    cancel: &CancellationToken,
) -> Result<Pod, BootstrapError> {
    cfg.validate()?;

    let decision = membership_resolver(cfg, connector).resolve(cancel).await?;
    info!(
        name = %decision.self_name,
        cluster_state = %decision.cluster_state,
        "Membership resolved"
    );

    Ok(build_etcd_pod(cfg, &decision)?)
}
