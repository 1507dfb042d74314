#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use lcu_link::process::{ProcessEntry, ProcessTable};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

pub const SECRET: &str = "test-secret";
/// First frame the fake sends after a subscribe, standing in for the ack.
pub const ACK: &str = r#"[3,"OnJsonApiEvent",null]"#;
pub const GAMEFLOW_UPDATE: &str =
    r#"[8,"Update",{"uri":"/lol-gameflow/v1/session","eventType":"Update","data":{}}]"#;

/// What the fake websocket does after it receives the subscribe frame.
#[derive(Debug, Clone)]
pub enum WsStep {
    Text(String),
    Close(u16),
    Pause(Duration),
}

/// Shared state of a fake client API.
pub struct FakeState {
    /// Non-zero: region-locale answers with this status.
    pub ready_status: AtomicU16,
    /// Calls to region-locale that break the connection mid-body.
    pub ready_drops: AtomicUsize,
    pub ready_calls: AtomicUsize,
    pub login_pending: AtomicUsize,
    pub websocket_enabled: AtomicBool,
    pub ws_connections: AtomicUsize,
    pub ws_script: Mutex<Vec<WsStep>>,
    /// When false the fake records the client's close frame but never
    /// answers it.
    pub echo_close: AtomicBool,
    /// Text frames received from the client, plus `close:<code>` markers.
    pub ws_received: Mutex<Vec<String>>,
    pub authorizations: Mutex<Vec<String>>,
    pub bodies: Mutex<Vec<Value>>,
}

impl FakeState {
    fn new() -> Self {
        Self {
            ready_status: AtomicU16::new(0),
            ready_drops: AtomicUsize::new(0),
            ready_calls: AtomicUsize::new(0),
            login_pending: AtomicUsize::new(0),
            websocket_enabled: AtomicBool::new(true),
            ws_connections: AtomicUsize::new(0),
            ws_script: Mutex::new(vec![WsStep::Text(ACK.to_string())]),
            echo_close: AtomicBool::new(true),
            ws_received: Mutex::new(Vec::new()),
            authorizations: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
        }
    }

    pub fn set_script(&self, steps: Vec<WsStep>) {
        *self.ws_script.lock() = steps;
    }

    pub fn received(&self) -> Vec<String> {
        self.ws_received.lock().clone()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.authorizations.lock().push(value.clone());
        value == expected_authorization()
    }
}

/// A running fake client API.
pub struct FakeClient {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeClient {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A process entry whose command line points at this fake.
    pub fn process(&self) -> ProcessEntry {
        client_process(self.port())
    }

    pub fn credentials(&self) -> lcu_link::Credentials {
        let flags = lcu_link::credentials::parse_flags(&self.process().cmd);
        lcu_link::Credentials::from_flags(&flags).unwrap()
    }
}

/// `Basic base64("riot:test-secret")`
pub fn expected_authorization() -> String {
    "Basic cmlvdDp0ZXN0LXNlY3JldA==".to_string()
}

pub fn client_process(port: u16) -> ProcessEntry {
    ProcessEntry::new(
        4242,
        "LeagueClientUx.exe",
        vec![
            "LeagueClientUx.exe".to_string(),
            format!("--remoting-auth-token={}", SECRET),
            format!("--app-port={}", port),
            "--app-pid=4241".to_string(),
            "--region=EUW".to_string(),
            "--respawn-command=/nonexistent/lcu-link/LeagueClient".to_string(),
        ],
    )
}

pub fn named_process(pid: u32, name: &str) -> ProcessEntry {
    ProcessEntry::new(pid, name, vec![name.to_string()])
}

// ── Fake process table ─────────────────────────────────────────────

/// Process table the test mutates while the code under test polls it.
#[derive(Default)]
pub struct SharedProcessTable {
    entries: Mutex<Vec<ProcessEntry>>,
}

impl SharedProcessTable {
    pub fn new(entries: Vec<ProcessEntry>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(entries),
        })
    }

    pub fn add(&self, entry: ProcessEntry) {
        self.entries.lock().push(entry);
    }

    pub fn remove(&self, name: &str) {
        self.entries.lock().retain(|p| p.name != name);
    }
}

impl ProcessTable for SharedProcessTable {
    fn snapshot(&self) -> std::io::Result<Vec<ProcessEntry>> {
        Ok(self.entries.lock().clone())
    }
}

// ── Fake client API ────────────────────────────────────────────────

/// Start a fake client API over TLS with a fresh self-signed certificate.
pub async fn start_fake_client() -> FakeClient {
    let state = Arc::new(FakeState::new());
    let app = axum::Router::new()
        .route("/", get(websocket_route))
        .route("/riotclient/region-locale", get(region_locale))
        .route("/lol-login/v1/session", get(login_session))
        .route("/echo", get(echo).post(echo_body).put(echo_body))
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such resource") }))
        .with_state(state.clone());

    let addr = start_tls_server(app, test_acceptor()).await;
    FakeClient { addr, state }
}

fn test_acceptor() -> TlsAcceptor {
    lcu_link::tls::install_crypto_provider();

    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string(), "localhost".to_string()])
        .unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

async fn start_tls_server(app: axum::Router, acceptor: TlsAcceptor) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (tcp_stream, _peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => continue,
            };

            let acceptor = acceptor.clone();
            let app = app.clone();

            tokio::spawn(async move {
                let tls_stream = match acceptor.accept(tcp_stream).await {
                    Ok(s) => s,
                    Err(_) => return,
                };

                let io = hyper_util::rt::TokioIo::new(tls_stream);
                let service = hyper_util::service::TowerToHyperService::new(app);
                let builder =
                    hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new());
                let _ = builder.serve_connection_with_upgrades(io, service).await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn region_locale(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.ready_calls.fetch_add(1, Ordering::SeqCst);
    let dropping = state
        .ready_drops
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if dropping {
        // Headers go out, then the body stream fails and the connection is cut.
        let chunks = futures::stream::iter([
            Ok(Bytes::from_static(b"{\"locale\":")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "starting")),
        ]);
        return Body::from_stream(chunks).into_response();
    }
    let status = state.ready_status.load(Ordering::SeqCst);
    if status != 0 {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, "not yet").into_response();
    }
    Json(json!({"locale": "en_GB", "region": "EUW", "webLanguage": "en", "webRegion": "euw"})).into_response()
}

async fn login_session(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let pending = state
        .login_pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    let state_name = if pending { "IN_PROGRESS" } else { "SUCCEEDED" };
    Json(json!({
        "accountId": 1234,
        "connected": true,
        "state": state_name,
        "summonerId": 5678,
        "puuid": "p-u-u-i-d",
    }))
    .into_response()
}

async fn echo(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"echo": true})).into_response()
}

async fn echo_body(State(state): State<Arc<FakeState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.bodies.lock().push(body.clone());
    Json(body).into_response()
}

async fn websocket_route(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.websocket_enabled.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_websocket(socket, state))
}

async fn serve_websocket(mut socket: WebSocket, state: Arc<FakeState>) {
    match socket.recv().await {
        Some(Ok(Message::Text(text))) => state.ws_received.lock().push(text.as_str().to_string()),
        _ => return,
    }

    let steps = state.ws_script.lock().clone();
    for step in steps {
        match step {
            WsStep::Text(text) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            WsStep::Pause(duration) => tokio::time::sleep(duration).await,
            WsStep::Close(code) => {
                let frame = CloseFrame {
                    code,
                    reason: String::new().into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }

    // Record everything else the client sends until the connection ends.
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => state.ws_received.lock().push(text.as_str().to_string()),
            Message::Close(frame) => {
                let code = frame.map(|f| f.code).unwrap_or_default();
                state.ws_received.lock().push(format!("close:{}", code));
                if !state.echo_close.load(Ordering::SeqCst) {
                    // The reply stays queued until the next read; hold the socket instead.
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    return;
                }
            }
            _ => {}
        }
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
