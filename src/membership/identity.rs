//! Member identity derived from the node's advertise address.
//!
//! Name and URLs are pure functions of the address so that repeated bootstrap
//! runs on the same node produce the same member.

use crate::client::types::{ETCD_CLIENT_PORT, ETCD_PEER_PORT, https_url};
use crate::config::DEFAULT_ADVERTISE_ADDRESS;

/// Identity of the local etcd member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentity {
    advertise_address: String,
    name: String,
    peer_url: String,
    client_url: String,
}

impl MemberIdentity {
    /// Derive the identity for an advertise address (loopback when empty).
    pub fn new(advertise_address: &str) -> Self {
        let addr = match advertise_address.trim() {
            "" => DEFAULT_ADVERTISE_ADDRESS,
            a => a,
        };

        Self {
            advertise_address: addr.to_string(),
            name: member_name(addr),
            peer_url: https_url(addr, ETCD_PEER_PORT),
            client_url: https_url(addr, ETCD_CLIENT_PORT),
        }
    }

    pub fn advertise_address(&self) -> &str {
        &self.advertise_address
    }

    /// Member name, `etcd-<address>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peer URL, `https://<address>:2380`.
    pub fn peer_url(&self) -> &str {
        &self.peer_url
    }

    /// Client URL, `https://<address>:2379`.
    pub fn client_url(&self) -> &str {
        &self.client_url
    }

    /// This member's `name=peerURL` entry in `--initial-cluster`.
    pub fn initial_cluster_entry(&self) -> String {
        format!("{}={}", self.name, self.peer_url)
    }
}

/// etcd member name for an advertise address.
pub fn member_name(advertise_address: &str) -> String {
    format!("etcd-{}", advertise_address)
}
