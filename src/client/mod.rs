//! etcd client module for cluster membership operations.
//!
//! This module provides a typed wrapper around the etcd v3 gRPC API for the
//! calls needed while bootstrapping a member. It handles TLS configuration,
//! connection and request timeouts, and error classification.
//!
//! ## Architecture
//!
//! - `etcd_client`: Cluster probe (`MemberList`, `MemberAdd`, `Status`) and the
//!   `MemberApi` / `ProbeConnector` seams used by the membership resolver
//! - `proto`: Protobuf messages for the etcd calls
//! - `tls`: rustls configuration from certificate file paths
//! - `types`: Member and status types, endpoint parsing
//!
//! ## Example
//!
//! ```rust,ignore
//! use etcd_bootstrap::client::{EtcdClientConfig, EtcdClusterClient, MemberApi, TlsClientConfig};
//!
//! let config = EtcdClientConfig::new(vec!["https://10.0.0.1:2379".to_string()])
//!     .with_tls(TlsClientConfig::from_paths(ca, cert, key));
//! let client = EtcdClusterClient::connect(config).await?;
//! for member in client.list_members().await? {
//!     println!("{} {:?}", member.name, member.peer_url());
//! }
//! ```

pub mod etcd_client;
pub mod proto;
pub mod tls;
pub mod types;

pub use etcd_client::{
    EtcdClientConfig, EtcdClusterClient, EtcdConnector, MemberApi, ProbeConnector, ProbeError,
};
pub use tls::{TlsClientConfig, TlsError};
pub use types::{
    ClusterState, ETCD_CLIENT_PORT, ETCD_PEER_PORT, EndpointError, EtcdMember, MemberStatus,
    discovery_client_url,
};
