//! Static pod for the local etcd member.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, Probe, Volume, VolumeMount};

use super::arguments::etcd_command;
use super::images::{ETCD, ImageError, core_image};
use super::static_pod::{
    HOST_PATH_DIRECTORY_OR_CREATE, component_pod, component_probe, new_volume, new_volume_mount,
};
use crate::client::types::ETCD_CLIENT_PORT;
use crate::config::BootstrapConfig;
use crate::membership::MembershipDecision;

/// Volume holding the etcd data directory
pub const ETCD_VOLUME_NAME: &str = "etcd";
/// Volume holding the cluster PKI
pub const ETCD_PKI_VOLUME_NAME: &str = "pki";
/// Mount path of the cluster PKI inside the container
pub const ETCD_PKI_PATH: &str = "/etc/kubernetes/pki";

/// Build the etcd static pod for this node.
///
/// Fails only when the image reference cannot be resolved.
pub fn build_etcd_pod(cfg: &BootstrapConfig, decision: &MembershipDecision) -> Result<Pod, ImageError> {
    let image = core_image(
        ETCD,
        &cfg.image_repository,
        &cfg.kubernetes_version,
        &cfg.etcd.image,
    )?;

    let container = Container {
        name: ETCD.to_string(),
        image: Some(image),
        command: Some(etcd_command(cfg, decision)),
        volume_mounts: Some(etcd_volume_mounts(cfg)),
        liveness_probe: Some(etcd_liveness_probe()),
        ..Default::default()
    };

    Ok(component_pod(container, etcd_volumes(cfg)))
}

fn etcd_volumes(cfg: &BootstrapConfig) -> BTreeMap<String, Volume> {
    let mut volumes = BTreeMap::new();
    volumes.insert(
        ETCD_VOLUME_NAME.to_string(),
        new_volume(ETCD_VOLUME_NAME, &cfg.etcd.data_dir, HOST_PATH_DIRECTORY_OR_CREATE),
    );
    volumes.insert(
        ETCD_PKI_VOLUME_NAME.to_string(),
        new_volume(ETCD_PKI_VOLUME_NAME, ETCD_PKI_PATH, HOST_PATH_DIRECTORY_OR_CREATE),
    );
    volumes
}

fn etcd_volume_mounts(cfg: &BootstrapConfig) -> Vec<VolumeMount> {
    vec![
        // Data dir is read-write so etcd state survives pod restarts
        new_volume_mount(ETCD_VOLUME_NAME, &cfg.etcd.data_dir, false),
        new_volume_mount(ETCD_PKI_VOLUME_NAME, ETCD_PKI_PATH, true),
    ]
}

/// `/health` on the plain-HTTP loopback client listener.
fn etcd_liveness_probe() -> Probe {
    component_probe("127.0.0.1", i32::from(ETCD_CLIENT_PORT), "/health", "HTTP")
}
