// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for etcd-bootstrap.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;

use etcd_bootstrap::client::{ClusterState, EtcdMember};
use etcd_bootstrap::membership::{MemberIdentity, MembershipDecision, plan_join};
use etcd_bootstrap::resources::build_argument_list;

/// Strategy for etcd flag names.
fn flag_name() -> impl Strategy<Value = String> {
    "[a-z][a-z-]{0,20}"
}

/// Strategy for flag maps.
fn flag_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(flag_name(), "[ -~]{0,30}", 0..12)
}

/// Strategy for IPv4 advertise addresses in 10.0.0.0/24.
fn address() -> impl Strategy<Value = String> {
    (1u8..=254).prop_map(|n| format!("10.0.0.{}", n))
}

/// Strategy for started members, possibly sharing peer URLs.
fn started_members() -> impl Strategy<Value = Vec<EtcdMember>> {
    prop::collection::vec((1u64..1000, "[a-z]{1,8}", address()), 0..8).prop_map(|rows| {
        rows.into_iter()
            .map(|(id, name, addr)| EtcdMember::new(id, name, format!("https://{}:2380", addr)))
            .collect()
    })
}

proptest! {
    #[test]
    fn argument_building_is_deterministic(defaults in flag_map(), overrides in flag_map()) {
        prop_assert_eq!(
            build_argument_list(&defaults, &overrides),
            build_argument_list(&defaults, &overrides)
        );
    }

    #[test]
    fn overrides_win(defaults in flag_map(), overrides in flag_map()) {
        let args = build_argument_list(&defaults, &overrides);

        for (key, value) in &overrides {
            let prefix = format!("--{}=", key);
            let matching: Vec<&String> = args.iter().filter(|a| a.starts_with(&prefix)).collect();
            prop_assert_eq!(matching.len(), 1);
            prop_assert_eq!(matching[0], &format!("--{}={}", key, value));
        }

        let keys: HashSet<&String> = defaults.keys().chain(overrides.keys()).collect();
        prop_assert_eq!(args.len(), keys.len());
    }

    #[test]
    fn new_cluster_has_only_self(addr in address()) {
        let identity = MemberIdentity::new(&addr);
        let decision = MembershipDecision::new_cluster(&identity);

        prop_assert_eq!(decision.cluster_state, ClusterState::New);
        prop_assert_eq!(
            decision.pairs(),
            vec![(identity.name(), identity.peer_url())]
        );
    }

    #[test]
    fn initial_cluster_has_no_duplicate_peers(addr in address(), members in started_members()) {
        let identity = MemberIdentity::new(&addr);
        let plan = plan_join(&identity, &members).unwrap();
        let decision = MembershipDecision::existing(&identity, &plan.peers, !plan.already_registered);

        let pairs = decision.pairs();
        let urls: HashSet<&str> = pairs.iter().map(|(_, url)| *url).collect();
        prop_assert_eq!(urls.len(), pairs.len());

        let self_entries = pairs.iter().filter(|(_, url)| *url == identity.peer_url()).count();
        prop_assert_eq!(self_entries, 1);
        prop_assert_eq!(pairs.last().copied(), Some((identity.name(), identity.peer_url())));
    }

    #[test]
    fn member_order_does_not_change_plan(addr in address(), members in started_members()) {
        let identity = MemberIdentity::new(&addr);
        let mut reversed = members.clone();
        reversed.reverse();

        prop_assert_eq!(
            plan_join(&identity, &members).unwrap(),
            plan_join(&identity, &reversed).unwrap()
        );
    }
}
