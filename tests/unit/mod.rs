// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for etcd-bootstrap.
//!
//! These tests run without an etcd cluster and test individual
//! components through the public API.

mod config_tests {
    use std::time::Duration;

    use etcd_bootstrap::config::{BootstrapConfig, ConfigError};

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.yaml");
        std::fs::write(
            &path,
            "advertiseAddress: 10.0.0.3\nhighAvailabilityPeer: 10.0.0.1:6443\ndiscovery:\n  retryIntervalSeconds: 1\n",
        )
        .unwrap();

        let cfg = BootstrapConfig::load(&path).unwrap();
        assert_eq!(cfg.advertise_address(), "10.0.0.3");
        assert_eq!(cfg.peer_endpoints(), Some("10.0.0.1:6443"));
        assert_eq!(cfg.discovery.retry_policy().interval, Duration::from_secs(1));
        assert_eq!(cfg.discovery.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_field_type_rejected() {
        let err = BootstrapConfig::from_yaml("discovery:\n  maxAttempts: many\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_retry_interval_rejected() {
        let cfg = BootstrapConfig::from_yaml("discovery:\n  retryIntervalSeconds: 0\n").unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}

mod client_types_tests {
    use etcd_bootstrap::client::types::{endpoint_host, https_url};
    use etcd_bootstrap::client::{ClusterState, EndpointError, discovery_client_url};

    #[test]
    fn test_discovery_url_from_first_peer() {
        assert_eq!(
            discovery_client_url("10.0.0.1:6443,10.0.0.2:6443").unwrap(),
            "https://10.0.0.1:2379"
        );
        assert_eq!(
            discovery_client_url("[fd00::1]:6443").unwrap(),
            "https://[fd00::1]:2379"
        );
        assert_eq!(
            discovery_client_url("master-0.example.com").unwrap(),
            "https://master-0.example.com:2379"
        );
    }

    #[test]
    fn test_discovery_url_errors() {
        assert_eq!(discovery_client_url(" , "), Err(EndpointError::Empty));
        assert!(matches!(
            endpoint_host("10.0.0.1:99999"),
            Err(EndpointError::Invalid { .. })
        ));
    }

    #[test]
    fn test_https_url_brackets_ipv6() {
        assert_eq!(https_url("fd00::2", 2380), "https://[fd00::2]:2380");
        assert_eq!(https_url("10.0.0.2", 2380), "https://10.0.0.2:2380");
    }

    #[test]
    fn test_cluster_state_strings() {
        assert_eq!(ClusterState::New.as_str(), "new");
        assert_eq!(ClusterState::Existing.as_str(), "existing");
    }
}

mod state_machine_tests {
    use etcd_bootstrap::membership::{
        ResolverEvent, ResolverPhase, ResolverStateMachine, TransitionResult,
    };

    #[test]
    fn test_phase_display() {
        assert_eq!(ResolverPhase::Init.to_string(), "Init");
        assert_eq!(ResolverPhase::ReadyNew.to_string(), "Ready(New)");
        assert_eq!(ResolverPhase::ReadyExisting.to_string(), "Ready(Existing)");
        assert_eq!(ResolverPhase::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(ResolverPhase::default(), ResolverPhase::Init);
    }

    #[test]
    fn test_join_sequence() {
        let sm = ResolverStateMachine::new();
        let mut phase = ResolverPhase::Init;

        for event in [
            ResolverEvent::ProbeStarted,
            ResolverEvent::TransientFailure,
            ResolverEvent::RetryElapsed,
            ResolverEvent::MemberAdded,
        ] {
            match sm.transition(&phase, &event) {
                TransitionResult::Success { to, .. } => phase = to,
                TransitionResult::InvalidTransition { current, event } => {
                    panic!("invalid transition from {current} on {event}")
                }
            }
        }

        assert_eq!(phase, ResolverPhase::ReadyExisting);
        assert!(phase.is_terminal());
    }

    #[test]
    fn test_every_failure_leads_to_failed() {
        let sm = ResolverStateMachine::new();
        for (from, event) in [
            (ResolverPhase::Probing, ResolverEvent::FatalFailure),
            (ResolverPhase::Probing, ResolverEvent::Cancelled),
            (ResolverPhase::Retry, ResolverEvent::AttemptsExhausted),
            (ResolverPhase::Retry, ResolverEvent::DeadlineExceeded),
        ] {
            assert!(matches!(
                sm.transition(&from, &event),
                TransitionResult::Success { to: ResolverPhase::Failed, .. }
            ));
        }
    }
}

mod pod_tests {
    use etcd_bootstrap::BootstrapConfig;
    use etcd_bootstrap::build_etcd_pod;
    use etcd_bootstrap::membership::{MemberIdentity, MembershipDecision};

    #[test]
    fn test_existing_member_pod_yaml() {
        let cfg = BootstrapConfig {
            advertise_address: "10.0.0.3".to_string(),
            ..Default::default()
        };
        let identity = MemberIdentity::new("10.0.0.3");
        let peers = vec![("etcd-10.0.0.1".to_string(), "https://10.0.0.1:2380".to_string())];
        let decision = MembershipDecision::existing(&identity, &peers, true);

        let pod = build_etcd_pod(&cfg, &decision).unwrap();
        let yaml = serde_yaml::to_string(&pod).unwrap();

        assert!(yaml.contains("kind: Pod"));
        assert!(yaml.contains("namespace: kube-system"));
        assert!(yaml.contains(
            "--initial-cluster=etcd-10.0.0.1=https://10.0.0.1:2380,etcd-10.0.0.3=https://10.0.0.3:2380"
        ));
        assert!(yaml.contains("--initial-cluster-state=existing"));
        assert!(yaml.contains("path: /health"));
    }

    #[test]
    fn test_pod_is_reproducible() {
        let cfg = BootstrapConfig::default();
        let decision = MembershipDecision::new_cluster(&MemberIdentity::new(cfg.advertise_address()));

        let a = serde_json::to_string(&build_etcd_pod(&cfg, &decision).unwrap()).unwrap();
        let b = serde_json::to_string(&build_etcd_pod(&cfg, &decision).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
