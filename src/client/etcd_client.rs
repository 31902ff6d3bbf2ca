//! etcd client wrapper over the v3 gRPC API.
//!
//! Provides the cluster probe used during bootstrap: member listing, member
//! registration and endpoint status, over TLS with bounded timeouts.

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use http::Uri;
use http::uri::PathAndQuery;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, instrument, warn};

use crate::client::proto::{self, paths};
use crate::client::tls::{TlsClientConfig, TlsError};
use crate::client::types::{ETCD_CLIENT_PORT, EndpointError, EtcdMember, MemberStatus, url_host};

/// Errors that can occur during etcd operations.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Certificate error: {0}")]
    Certificate(#[from] TlsError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),
}

impl ProbeError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProbeError::Connection(_) | ProbeError::Protocol(_) | ProbeError::Timeout { .. } => true,
            ProbeError::Certificate(_) | ProbeError::InvalidEndpoint(_) => false,
        }
    }

    fn from_status(operation: &str, status: Status, timeout: Duration) -> Self {
        match status.code() {
            Code::DeadlineExceeded => ProbeError::Timeout {
                operation: operation.to_string(),
                duration: timeout,
            },
            Code::Unavailable | Code::Cancelled => {
                ProbeError::Connection(format!("{}: {}", operation, status.message()))
            }
            code => ProbeError::Protocol(format!("{}: {:?}: {}", operation, code, status.message())),
        }
    }
}

/// Configuration for connecting to an etcd cluster.
#[derive(Clone, Debug)]
pub struct EtcdClientConfig {
    /// Client URLs (`https://host:2379`), tried in order.
    pub endpoints: Vec<String>,
    /// TLS configuration.
    pub tls: TlsClientConfig,
    /// Bound on establishing the connection, including the TLS handshake.
    pub connect_timeout: Duration,
    /// Bound on each request.
    pub request_timeout: Duration,
}

impl Default for EtcdClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            tls: TlsClientConfig::default(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl EtcdClientConfig {
    /// Create a new configuration with endpoints.
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Set TLS configuration.
    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Membership operations against an etcd cluster.
pub trait MemberApi {
    /// List the current cluster members.
    fn list_members(&self) -> impl Future<Output = Result<Vec<EtcdMember>, ProbeError>> + Send;

    /// Register a new member by peer URL.
    fn add_member(
        &self,
        peer_url: &str,
    ) -> impl Future<Output = Result<EtcdMember, ProbeError>> + Send;
}

/// Opens [`MemberApi`] clients against an endpoint.
pub trait ProbeConnector {
    type Client: MemberApi + Send + Sync;

    /// Connect to the etcd client URL.
    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Client, ProbeError>> + Send;
}

/// Connector producing real gRPC clients.
#[derive(Clone, Debug)]
pub struct EtcdConnector {
    tls: TlsClientConfig,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl EtcdConnector {
    pub fn new(tls: TlsClientConfig, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            tls,
            connect_timeout,
            request_timeout,
        }
    }
}

impl ProbeConnector for EtcdConnector {
    type Client = EtcdClusterClient;

    async fn connect(&self, endpoint: &str) -> Result<EtcdClusterClient, ProbeError> {
        let config = EtcdClientConfig::new(vec![endpoint.to_string()])
            .with_tls(self.tls.clone())
            .with_connect_timeout(self.connect_timeout)
            .with_request_timeout(self.request_timeout);
        EtcdClusterClient::connect(config).await
    }
}

/// etcd client for cluster membership operations.
pub struct EtcdClusterClient {
    channel: Channel,
    endpoint: String,
    config: EtcdClientConfig,
}

impl EtcdClusterClient {
    /// Connect to the first reachable endpoint.
    #[instrument(skip(config), fields(endpoints = ?config.endpoints, insecure = config.tls.is_insecure()))]
    pub async fn connect(config: EtcdClientConfig) -> Result<Self, ProbeError> {
        if config.endpoints.is_empty() {
            return Err(ProbeError::InvalidEndpoint(EndpointError::Empty));
        }

        let tls = TlsConnector::from(config.tls.load()?);

        let mut last_error = None;
        for endpoint in &config.endpoints {
            match connect_endpoint(endpoint, &tls, &config).await {
                Ok(channel) => {
                    debug!(endpoint = %endpoint, "Connected to etcd");
                    return Ok(Self {
                        channel,
                        endpoint: endpoint.clone(),
                        config,
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!(endpoint = %endpoint, error = %e, "Failed to connect to etcd endpoint");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ProbeError::InvalidEndpoint(EndpointError::Empty)))
    }

    /// The endpoint this client is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the client configuration.
    pub fn config(&self) -> &EtcdClientConfig {
        &self.config
    }

    /// Query `Maintenance/Status` on the connected endpoint.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn status(&self) -> Result<MemberStatus, ProbeError> {
        let resp: proto::StatusResponse = self.unary(paths::STATUS, proto::StatusRequest {}).await?;
        Ok(resp.into())
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, ProbeError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let timeout = self.config.request_timeout;
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());

        let call = async {
            grpc.ready().await.map_err(|e| {
                ProbeError::Connection(format!("etcd endpoint not ready: {}", error_chain(&e)))
            })?;
            let codec = tonic::codec::ProstCodec::<Req, Resp>::default();
            grpc.unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map(tonic::Response::into_inner)
            .map_err(|status| ProbeError::from_status(path, status, timeout))
        };

        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ProbeError::Timeout {
                operation: path.to_string(),
                duration: timeout,
            })?
    }
}

impl MemberApi for EtcdClusterClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn list_members(&self) -> Result<Vec<EtcdMember>, ProbeError> {
        let resp: proto::MemberListResponse = self
            .unary(
                paths::MEMBER_LIST,
                proto::MemberListRequest { linearizable: true },
            )
            .await?;

        let members: Vec<EtcdMember> = resp.members.into_iter().map(EtcdMember::from).collect();
        if let Some(bad) = members.iter().find(|m| m.peer_url().is_none()) {
            return Err(ProbeError::Protocol(format!(
                "member {:x} ({:?}) has no peer URL",
                bad.id, bad.name
            )));
        }

        debug!(count = members.len(), "Listed etcd members");
        Ok(members)
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn add_member(&self, peer_url: &str) -> Result<EtcdMember, ProbeError> {
        let resp: proto::MemberAddResponse = self
            .unary(
                paths::MEMBER_ADD,
                proto::MemberAddRequest {
                    peer_urls: vec![peer_url.to_string()],
                    is_learner: false,
                },
            )
            .await?;

        resp.member
            .map(EtcdMember::from)
            .ok_or_else(|| ProbeError::Protocol("MemberAdd response has no member".to_string()))
    }
}

/// Open a gRPC channel to one endpoint through a rustls connector.
///
/// The channel itself speaks plaintext HTTP/2 to the connector; TLS is
/// applied inside the connector so the verifier can be customised.
async fn connect_endpoint(
    endpoint: &str,
    tls: &TlsConnector,
    config: &EtcdClientConfig,
) -> Result<Channel, ProbeError> {
    let uri: Uri = endpoint.parse().map_err(|e: http::uri::InvalidUri| {
        ProbeError::InvalidEndpoint(EndpointError::Invalid {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    })?;
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| {
            ProbeError::InvalidEndpoint(EndpointError::Invalid {
                endpoint: endpoint.to_string(),
                reason: "missing host".to_string(),
            })
        })?;
    let port = uri.port_u16().unwrap_or(ETCD_CLIENT_PORT);

    // Timeouts are enforced by the outer `tokio::time::timeout` calls, which
    // report `ProbeError::Timeout`. Tonic's own timers would surface as transport errors.
    let channel_endpoint = Endpoint::from_shared(format!("http://{}:{}", url_host(&host), port))
        .map_err(|e| ProbeError::Connection(error_chain(&e)))?;

    let tls = tls.clone();
    let connector = tower::service_fn(move |uri: Uri| {
        let tls = tls.clone();
        async move {
            let host = uri
                .host()
                .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing host"))?;
            let port = uri.port_u16().unwrap_or(ETCD_CLIENT_PORT);
            let server_name = ServerName::try_from(host.clone())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            let stream = tls.connect(server_name, tcp).await?;
            Ok::<_, std::io::Error>(TokioIo::new(stream))
        }
    });

    tokio::time::timeout(
        config.connect_timeout,
        channel_endpoint.connect_with_connector(connector),
    )
    .await
    .map_err(|_| ProbeError::Timeout {
        operation: format!("connect {}", endpoint),
        duration: config.connect_timeout,
    })?
    .map_err(|e| ProbeError::Connection(format!("{}: {}", endpoint, error_chain(&e))))
}

/// Render an error together with its source chain.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
