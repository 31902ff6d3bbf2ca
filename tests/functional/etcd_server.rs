//! In-process etcd gRPC server for exercising the real client.
//!
//! Serves `Cluster/MemberList`, `Cluster/MemberAdd` and `Maintenance/Status`
//! over TLS with HTTP/2, using a CA and a server certificate generated with
//! rcgen. Replies are gRPC-framed prost messages with a `grpc-status` trailer.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, Request, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use prost::Message;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::ServerConfig;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use etcd_bootstrap::client::proto::{self, paths};

pub const CLUSTER_ID: u64 = 0xcdf8_1819_4e3a_8c32;
/// Member ID the server reports in response headers.
pub const SERVER_MEMBER_ID: u64 = 0x8e9e_05c5_2164_694d;
pub const SERVER_VERSION: &str = "3.4.13";
pub const RAFT_TERM: u64 = 7;

type GrpcBody = BoxBody<Bytes, Infallible>;

/// How the server answers requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyMode {
    /// Answer every call.
    #[default]
    Normal,
    /// Accept requests and never answer.
    Stall,
    /// Answer with bytes that are not a valid protobuf message.
    Garbage,
    /// Register members but leave `member` out of the `MemberAdd` reply.
    EmptyAdd,
}

struct ServerState {
    members: Vec<proto::Member>,
    mode: ReplyMode,
    leader: u64,
    next_id: u64,
    calls: Vec<String>,
}

impl ServerState {
    fn reply(&mut self, path: &str, payload: &[u8]) -> Bytes {
        let header = Some(proto::ResponseHeader {
            cluster_id: CLUSTER_ID,
            member_id: SERVER_MEMBER_ID,
            revision: 1,
            raft_term: RAFT_TERM,
        });

        let encoded = match path {
            paths::MEMBER_LIST => proto::MemberListResponse {
                header,
                members: self.members.clone(),
            }
            .encode_to_vec(),
            paths::MEMBER_ADD => {
                let request = proto::MemberAddRequest::decode(payload).unwrap_or_default();
                let member = proto::Member {
                    id: self.next_id,
                    name: String::new(),
                    peer_urls: request.peer_urls,
                    client_urls: Vec::new(),
                    is_learner: request.is_learner,
                };
                self.next_id += 1;
                self.members.push(member.clone());

                proto::MemberAddResponse {
                    header,
                    member: (self.mode != ReplyMode::EmptyAdd).then_some(member),
                    members: self.members.clone(),
                }
                .encode_to_vec()
            }
            paths::STATUS => proto::StatusResponse {
                header,
                version: SERVER_VERSION.to_string(),
                db_size: 20480,
                leader: self.leader,
                raft_index: 42,
                raft_term: RAFT_TERM,
            }
            .encode_to_vec(),
            other => panic!("unexpected gRPC path {other}"),
        };
        Bytes::from(encoded)
    }
}

/// A running TLS etcd server on a loopback port.
pub struct EtcdServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    ca_path: PathBuf,
    task: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl EtcdServer {
    /// Start a server that answers normally.
    pub async fn start(members: Vec<proto::Member>) -> Self {
        Self::start_with(members, ReplyMode::Normal).await
    }

    pub async fn start_with(members: Vec<proto::Member>, mode: ReplyMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (tls, ca_path) = server_tls(dir.path());

        let state = Arc::new(Mutex::new(ServerState {
            members,
            mode,
            leader: SERVER_MEMBER_ID,
            next_id: 1000,
            calls: Vec::new(),
        }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = TlsAcceptor::from(tls);
        let task = tokio::spawn(serve(listener, acceptor, state.clone()));

        Self {
            addr,
            state,
            ca_path,
            task,
            _dir: dir,
        }
    }

    /// `https://127.0.0.1:<port>`
    pub fn client_url(&self) -> String {
        format!("https://127.0.0.1:{}", self.addr.port())
    }

    /// CA certificate that signed the server certificate.
    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }

    /// Report another member as the raft leader.
    pub fn set_leader(&self, leader: u64) {
        self.state.lock().unwrap().leader = leader;
    }

    /// gRPC paths received so far.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn members(&self) -> Vec<proto::Member> {
        self.state.lock().unwrap().members.clone()
    }
}

impl Drop for EtcdServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A TCP listener that accepts connections and never speaks.
pub struct SilentListener {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl SilentListener {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut held: Vec<TcpStream> = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { addr, task }
    }

    pub fn client_url(&self) -> String {
        format!("https://127.0.0.1:{}", self.addr.port())
    }
}

impl Drop for SilentListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A protobuf member as etcd reports it.
pub fn member(id: u64, name: &str, peer_url: &str, client_url: &str) -> proto::Member {
    proto::Member {
        id,
        name: name.to_string(),
        peer_urls: vec![peer_url.to_string()],
        client_urls: vec![client_url.to_string()],
        is_learner: false,
    }
}

async fn serve(listener: TcpListener, acceptor: TlsAcceptor, state: Arc<Mutex<ServerState>>) {
    while let Ok((tcp, _)) = listener.accept().await {
        let acceptor = acceptor.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let Ok(stream) = acceptor.accept(tcp).await else {
                return;
            };
            let svc = service_fn(move |req: Request<Incoming>| handle(state.clone(), req));
            let _ = http2::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), svc)
                .await;
        });
    }
}

async fn handle(
    state: Arc<Mutex<ServerState>>,
    req: Request<Incoming>,
) -> Result<Response<GrpcBody>, Infallible> {
    let path = req.uri().path().to_string();
    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    // Skip the 5-byte gRPC frame header
    let payload = body.get(5..).unwrap_or_default();

    let mode = {
        let mut state = state.lock().unwrap();
        state.calls.push(path.clone());
        state.mode
    };

    if mode == ReplyMode::Stall {
        std::future::pending::<()>().await;
    }

    let message = if mode == ReplyMode::Garbage {
        Bytes::from_static(&[0xff; 8])
    } else {
        let mut state = state.lock().unwrap();
        state.reply(&path, payload)
    };

    Ok(grpc_response(message))
}

fn grpc_response(message: Bytes) -> Response<GrpcBody> {
    let mut frame = BytesMut::with_capacity(message.len() + 5);
    frame.put_u8(0);
    frame.put_u32(u32::try_from(message.len()).unwrap());
    frame.put_slice(&message);

    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));

    let body = Full::new(frame.freeze())
        .with_trailers(std::future::ready(Some(Ok(trailers))))
        .boxed();

    Response::builder()
        .header("content-type", "application/grpc")
        .body(body)
        .unwrap()
}

/// Generate a CA and a server certificate for 127.0.0.1, writing the CA to `dir`.
fn server_tls(dir: &Path) -> (Arc<ServerConfig>, PathBuf) {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.distinguished_name.push(DnType::CommonName, "etcd-ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let server_key = KeyPair::generate().unwrap();
    let mut server_params =
        CertificateParams::new(vec!["127.0.0.1".to_string(), "localhost".to_string()]).unwrap();
    server_params.distinguished_name.push(DnType::CommonName, "etcd-server");
    let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key).unwrap();

    let ca_path = dir.join("ca.crt");
    std::fs::write(&ca_path, ca_cert.pem()).unwrap();

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![server_cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server_key.serialize_der())),
        )
        .unwrap();
    config.alpn_protocols = vec![b"h2".to_vec()];

    (Arc::new(config), ca_path)
}
