//! In-process Anywhere hub for E2E tests
//!
//! Implements the `/webhook` API over HTTP/1 with in-memory state so the hub
//! client can be tested against real requests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anywhere_common::WgKey;
use anywhere_protocol::{
    AddPeerRequest, Envelope, PeerActionRequest, PeerRecord, PeerRemoveRequest, RegisterRequest,
    RegisterResult,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;

/// Public key the mock hub reports for its WireGuard server
pub const HUB_PUBLIC_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

/// A recorded request for test assertions
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct HubState {
    password: Option<String>,
    uid: Option<String>,
    token: Option<String>,
    logins: u32,
    running: bool,
    peers: Vec<PeerRecord>,
    next_peer: u8,
    requests: Vec<RecordedRequest>,
}

pub struct MockHubService {
    addr: SocketAddr,
    state: Arc<RwLock<HubState>>,
}

impl MockHubService {
    /// Start the hub on an ephemeral port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock hub");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RwLock::new(HubState::default()));

        let state_clone = state.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let state = state_clone.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(handle(state, req).await) }
                    });

                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, state }
    }

    /// `http://127.0.0.1:<port>`, usable as a hub endpoint
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.read().requests.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.state.read().peers.clone()
    }

    pub fn is_registered(&self) -> bool {
        self.state.read().uid.is_some()
    }
}

async fn handle(state: Arc<RwLock<HubState>>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let authorization = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    tracing::debug!("Mock hub: {} {}", method, path);
    state.write().requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        authorization: authorization.clone(),
    });

    let body = req
        .into_body()
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();

    let Some(route) = path.strip_prefix("/webhook/") else {
        return status(StatusCode::NOT_FOUND);
    };

    if route == "register" && method == Method::POST {
        return match decode::<RegisterRequest>(&body) {
            Some(request) => json(register(&mut state.write(), request)),
            None => status(StatusCode::BAD_REQUEST),
        };
    }

    let expected = state.read().token.as_ref().map(|t| format!("Bearer {}", t));
    if expected.is_none() || authorization != expected {
        return status(StatusCode::UNAUTHORIZED);
    }

    let mut hub = state.write();
    let envelope = match (method, route) {
        (Method::GET, "status") => {
            if hub.running {
                Envelope::success()
            } else {
                Envelope::failed("Server is stopped")
            }
        }
        (Method::GET, "peers") => Envelope::success().with_peers(hub.peers.clone()),
        (Method::GET, "start") => {
            hub.running = true;
            Envelope::success()
        }
        (Method::GET, "stop") => {
            hub.running = false;
            Envelope::success()
        }
        (Method::GET, "factory-reset") => {
            let requests = std::mem::take(&mut hub.requests);
            *hub = HubState {
                requests,
                ..Default::default()
            };
            Envelope::success()
        }
        (Method::POST, "add") => match decode::<AddPeerRequest>(&body) {
            Some(request) => add_peer(&mut hub, request),
            None => return status(StatusCode::BAD_REQUEST),
        },
        (Method::POST, "remove") => match decode::<PeerRemoveRequest>(&body) {
            Some(request) => {
                let before = hub.peers.len();
                hub.peers.retain(|p| p.id != request.id);
                if hub.peers.len() < before {
                    Envelope::success()
                } else {
                    Envelope::failed("Peer not found")
                }
            }
            None => return status(StatusCode::BAD_REQUEST),
        },
        (Method::POST, "block") | (Method::POST, "unblock") => {
            match decode::<PeerActionRequest>(&body) {
                Some(request) => match hub.peers.iter_mut().find(|p| p.id == request.id) {
                    Some(peer) => {
                        peer.connection = request.connection;
                        Envelope::success()
                    }
                    None => Envelope::failed("Peer not found"),
                },
                None => return status(StatusCode::BAD_REQUEST),
            }
        }
        _ => return status(StatusCode::NOT_FOUND),
    };

    json(envelope)
}

fn register(hub: &mut HubState, request: RegisterRequest) -> Envelope {
    hub.logins += 1;
    let token = format!("token-{}", hub.logins);

    if request.is_first_time() {
        if hub.uid.is_some() {
            return Envelope::failed("Hub already registered");
        }
        hub.password = Some(request.password);
        hub.uid = Some("uid-1".to_string());
        hub.token = Some(token.clone());

        return Envelope::success()
            .with_result(&RegisterResult {
                token,
                uid: hub.uid.clone(),
                id: Some("1".to_string()),
                key: Some(HUB_PUBLIC_KEY.to_string()),
            })
            .unwrap_or_else(|e| Envelope::failed(e.to_string()));
    }

    if hub.uid.as_deref() != Some(request.uid.as_str())
        || hub.password.as_deref() != Some(request.password.as_str())
    {
        return Envelope::failed("Invalid Password");
    }

    hub.token = Some(token.clone());
    Envelope::success()
        .with_result(&RegisterResult {
            token,
            uid: None,
            id: None,
            key: None,
        })
        .unwrap_or_else(|e| Envelope::failed(e.to_string()))
}

fn add_peer(hub: &mut HubState, request: AddPeerRequest) -> Envelope {
    if hub.peers.iter().any(|p| p.name == request.name) {
        return Envelope::failed("Peer with this name already exists");
    }

    hub.next_peer += 1;
    let n = hub.next_peer;
    let private_key = WgKey::from_bytes([n; 32]);
    let public_key = WgKey::from_bytes([n.wrapping_add(100); 32]);

    hub.peers.push(PeerRecord {
        id: format!("peer-{}", n),
        ip: (n + 1).to_string(),
        name: request.name,
        public_key: public_key.to_base64(),
        private_key: Some(private_key.to_base64()),
        connection: true,
    });
    Envelope::success()
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Option<T> {
    serde_json::from_slice(body).ok()
}

fn json(envelope: Envelope) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .body(Full::new(Bytes::new()))
        .unwrap()
}
