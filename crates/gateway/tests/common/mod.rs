//! Shared harness for the gateway's integration tests: spin up a real
//! gateway on an ephemeral port and exchange envelopes with it over a real
//! WebSocket connection, exactly like an external participant would.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gateway::audit::AuditLog;
use gateway::config::GatewayConfig;
use gateway::space_config::SpaceConfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type TestSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A scratch directory unique to one test run, removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn new(label: &str) -> ScratchDir {
        let path = std::env::temp_dir().join(format!(
            "mew-gateway-test-{label}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&path).expect("create scratch dir");
        ScratchDir(path)
    }

    fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

/// A running gateway bound to an ephemeral localhost port, plus the temp
/// directory its audit logs are written into (kept alive so it isn't
/// cleaned up mid-test).
pub struct TestGateway {
    pub addr: std::net::SocketAddr,
    _audit_dir: ScratchDir,
}

impl TestGateway {
    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={token}", self.addr)
    }
}

/// Boot a gateway from an inline YAML space config, with small-ish
/// defaults so tests don't wait on production-sized timeouts. Pass
/// `configure` to override any `GatewayConfig` field (e.g. to shrink the
/// backpressure bounds for the backpressure scenario).
pub async fn spawn_gateway(space_yaml: &str) -> TestGateway {
    spawn_gateway_with(space_yaml, |_| {}).await
}

pub async fn spawn_gateway_with(
    space_yaml: &str,
    configure: impl FnOnce(&mut GatewayConfig),
) -> TestGateway {
    let space_config: SpaceConfig = serde_yaml::from_str(space_yaml).expect("valid space yaml");
    let audit_dir = ScratchDir::new("audit");

    let mut config = GatewayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        space_config: String::new(),
        max_envelope_bytes: 1024 * 1024,
        heartbeat_interval_secs: 30,
        outbound_queue_capacity: 1000,
        outbound_queue_bytes: 16 * 1024 * 1024,
        proposal_lru_open: 10_000,
        proposal_lru_closed: 100_000,
        audit_log_dir: audit_dir.path().to_string_lossy().to_string(),
        audit_log_rotate_bytes: 100 * 1024 * 1024,
        verbose_rejections: true,
    };
    configure(&mut config);

    let audit = AuditLog::open(audit_dir.path(), config.audit_log_rotate_bytes).expect("audit log");
    let (app, _state) = gateway::build(config, space_config, audit);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    // Give the listener a moment to start accepting before the first
    // connect attempt.
    tokio::time::sleep(Duration::from_millis(20)).await;

    TestGateway { addr, _audit_dir: audit_dir }
}

/// Connect to the gateway as `token` and return the open socket.
pub async fn connect(gateway: &TestGateway, token: &str) -> TestSocket {
    let (socket, _response) = connect_async(gateway.ws_url(token)).await.expect("ws connect");
    socket
}

/// Build a minimal, structurally valid envelope as a JSON value, with
/// `to`/`correlation_id` populated only when given.
pub fn envelope(
    id: &str,
    from: &str,
    kind: &str,
    to: Option<&[&str]>,
    correlation_id: Option<&[&str]>,
    payload: Value,
) -> Value {
    let mut v = json!({
        "protocol": "mew/v0.4",
        "id": id,
        "ts": "2026-07-26T00:00:00Z",
        "from": from,
        "kind": kind,
        "payload": payload,
    });
    if let Some(to) = to {
        v["to"] = json!(to);
    }
    if let Some(corr) = correlation_id {
        v["correlation_id"] = json!(corr);
    }
    v
}

pub async fn send(socket: &mut TestSocket, value: &Value) {
    socket
        .send(WsMessage::Text(value.to_string()))
        .await
        .expect("send frame");
}

/// Read the next text frame and parse it as JSON, with a bounded wait so
/// a hung test fails fast instead of deadlocking the suite.
pub async fn recv_json(socket: &mut TestSocket) -> Value {
    let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket closed before a frame arrived")
        .expect("websocket read error");
    match next {
        WsMessage::Text(text) => serde_json::from_str(&text).expect("frame is valid JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Read frames until one matches `predicate`, skipping any that don't
/// (e.g. a `system/presence` broadcast arriving before the frame under
/// test). Bounded by an overall timeout so a missing frame fails fast.
pub async fn recv_until(socket: &mut TestSocket, predicate: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let value = recv_json(socket).await;
            if predicate(&value) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for a matching frame")
}
