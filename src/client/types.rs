//! Types for etcd cluster membership information.
//!
//! These types are the crate-facing view of the etcd `Cluster` and
//! `Maintenance` gRPC responses, plus the endpoint parsing used to locate an
//! existing cluster from the configured high-availability peer.

use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::client::proto;

/// etcd client port.
pub const ETCD_CLIENT_PORT: u16 = 2379;
/// etcd peer (raft) port.
pub const ETCD_PEER_PORT: u16 = 2380;

/// Hostname label syntax accepted for peer endpoints.
static HOSTNAME_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .ok()
});

/// Errors that can occur when parsing an endpoint string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Empty endpoint list")]
    Empty,
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    Invalid { endpoint: String, reason: String },
}

/// One row of an existing cluster's member list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EtcdMember {
    /// Member ID assigned by etcd.
    pub id: u64,
    /// Member name. Empty while the member is registered but not started.
    pub name: String,
    /// Peer URLs (raft traffic).
    pub peer_urls: Vec<String>,
    /// Client URLs.
    pub client_urls: Vec<String>,
}

impl EtcdMember {
    /// Create a member from a name and a single peer URL.
    pub fn new(id: u64, name: impl Into<String>, peer_url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            peer_urls: vec![peer_url.into()],
            client_urls: Vec::new(),
        }
    }

    /// The primary peer URL, if the member has one.
    pub fn peer_url(&self) -> Option<&str> {
        self.peer_urls.first().map(String::as_str)
    }

    /// Whether the member has started and published its name.
    pub fn is_started(&self) -> bool {
        !self.name.is_empty()
    }
}

impl From<proto::Member> for EtcdMember {
    fn from(member: proto::Member) -> Self {
        Self {
            id: member.id,
            name: member.name,
            peer_urls: member.peer_urls,
            client_urls: member.client_urls,
        }
    }
}

/// etcd startup mode: form a new cluster or attach to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    New,
    Existing,
}

impl ClusterState {
    /// Value of the `--initial-cluster-state` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::New => "new",
            ClusterState::Existing => "existing",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single etcd endpoint as reported by `Maintenance/Status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberStatus {
    /// Server version string.
    pub version: String,
    /// Backend database size in bytes.
    pub db_size: i64,
    /// Member ID of the current leader.
    pub leader: u64,
    /// Member ID of the responding member.
    pub member_id: u64,
    /// Current raft term.
    pub raft_term: u64,
}

impl MemberStatus {
    /// Whether the responding member is the leader.
    pub fn is_leader(&self) -> bool {
        self.leader != 0 && self.leader == self.member_id
    }
}

impl From<proto::StatusResponse> for MemberStatus {
    fn from(resp: proto::StatusResponse) -> Self {
        Self {
            version: resp.version,
            db_size: resp.db_size,
            leader: resp.leader,
            member_id: resp.header.map(|h| h.member_id).unwrap_or_default(),
            raft_term: resp.raft_term,
        }
    }
}

/// Format a host for use inside a URL, bracketing IPv6 literals.
pub fn url_host(host: &str) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]", host),
        _ => host.to_string(),
    }
}

/// Build an `https://host:port` URL.
pub fn https_url(host: &str, port: u16) -> String {
    format!("https://{}:{}", url_host(host), port)
}

/// Extract the host part of a single `host[:port]` endpoint.
///
/// Accepts an optional URL scheme, bracketed IPv6 (`[fd00::1]:6443`) and bare
/// IPv6 literals. The host must be an IP address or a valid DNS name.
pub fn endpoint_host(endpoint: &str) -> Result<String, EndpointError> {
    let invalid = |reason: &str| EndpointError::Invalid {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = endpoint.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let without_path = without_scheme.split('/').next().unwrap_or(without_scheme);

    if without_path.is_empty() {
        return Err(invalid("missing host"));
    }

    let (host, port) = if let Some(rest) = without_path.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 bracket"))?;
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| invalid("unexpected characters after IPv6 address"))?,
            ),
        };
        (host, port)
    } else if without_path.matches(':').count() > 1 {
        // Bare IPv6 literal without a port
        (without_path, None)
    } else {
        match without_path.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (without_path, None),
        }
    };

    if let Some(port) = port
        && port.parse::<u16>().is_err()
    {
        return Err(invalid("port is not a number in 0-65535"));
    }

    if host.parse::<IpAddr>().is_ok() {
        return Ok(host.to_string());
    }

    let valid_hostname = HOSTNAME_REGEX
        .as_ref()
        .is_some_and(|re| re.is_match(host));
    if valid_hostname {
        Ok(host.to_string())
    } else {
        Err(invalid("host is neither an IP address nor a DNS name"))
    }
}

/// Resolve the etcd client URL used to discover an existing cluster.
///
/// The configured peer is a comma-separated endpoint list (typically API
/// server addresses); the first element is used and its host is combined
/// with the etcd client port.
pub fn discovery_client_url(peer_endpoints: &str) -> Result<String, EndpointError> {
    let first = peer_endpoints
        .split(',')
        .map(str::trim)
        .find(|e| !e.is_empty())
        .ok_or(EndpointError::Empty)?;

    let host = endpoint_host(first)?;
    Ok(https_url(&host, ETCD_CLIENT_PORT))
}
