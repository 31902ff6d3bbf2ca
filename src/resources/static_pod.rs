//! Static pod building blocks for control plane components.
//!
//! Static pods are read by the kubelet straight from the manifest directory,
//! so everything the component needs (host networking, hostPath volumes,
//! probes) has to be spelled out in the pod itself.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, HTTPGetAction, HostPathVolumeSource, Pod, PodSpec, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Namespace static control plane pods are reported in.
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
/// Annotation marking a pod as critical to the cluster.
pub const CRITICAL_POD_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/critical-pod";
/// Priority class for control plane pods.
pub const SYSTEM_CLUSTER_CRITICAL: &str = "system-cluster-critical";

/// hostPath type creating the directory when missing.
pub const HOST_PATH_DIRECTORY_OR_CREATE: &str = "DirectoryOrCreate";

/// Liveness probe timing for control plane components
const PROBE_INITIAL_DELAY_SECONDS: i32 = 15;
const PROBE_TIMEOUT_SECONDS: i32 = 15;
const PROBE_FAILURE_THRESHOLD: i32 = 8;

/// hostPath volume.
pub fn new_volume(name: &str, path: &str, path_type: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some(path_type.to_string()),
        }),
        ..Default::default()
    }
}

pub fn new_volume_mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

/// HTTP liveness probe against a component's local endpoint.
pub fn component_probe(host: &str, port: i32, path: &str, scheme: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            host: Some(host.to_string()),
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some(scheme.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
        timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
        failure_threshold: Some(PROBE_FAILURE_THRESHOLD),
        ..Default::default()
    }
}

/// Labels on a control plane static pod.
pub fn component_labels(component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("component".to_string(), component.to_string());
    labels.insert("tier".to_string(), "control-plane".to_string());
    labels
}

/// Wrap a container into a static pod named after it.
///
/// Volumes are keyed by name so the pod lists them in a stable order.
pub fn component_pod(container: Container, volumes: BTreeMap<String, Volume>) -> Pod {
    let name = container.name.clone();

    let mut annotations = BTreeMap::new();
    annotations.insert(CRITICAL_POD_ANNOTATION.to_string(), String::new());

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(KUBE_SYSTEM_NAMESPACE.to_string()),
            labels: Some(component_labels(&name)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            host_network: Some(true),
            priority_class_name: Some(SYSTEM_CLUSTER_CRITICAL.to_string()),
            volumes: Some(volumes.into_values().collect()),
            ..Default::default()
        }),
        status: None,
    }
}
