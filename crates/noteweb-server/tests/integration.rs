//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use noteweb_rpc::handlers::register_all;
use noteweb_rpc::{CallError, ChangeVersion, HandlerLimits, MethodRegistry, RpcContext};
use noteweb_server::{NoteServer, ServerConfig};
use noteweb_vault::FsVault;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    _dir: tempfile::TempDir,
    server: Arc<NoteServer>,
    url: String,
}

impl TestServer {
    fn vault_path(&self, rel: &str) -> std::path::PathBuf {
        self._dir.path().join(rel)
    }
}

/// Boot a test server over a temporary vault seeded with `files`.
async fn boot_server_with(
    files: &[(&str, &str)],
    configure: impl FnOnce(ServerConfig) -> ServerConfig,
    build: impl FnOnce(NoteServer) -> NoteServer,
) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    for (rel, contents) in files {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
    let vault = FsVault::open(dir.path()).unwrap();
    let ctx = RpcContext::new(
        Arc::new(vault),
        Arc::new(ChangeVersion::new()),
        HandlerLimits::default(),
    );

    let mut registry = MethodRegistry::new();
    register_all(&mut registry);

    let config = configure(ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    });
    let server = Arc::new(build(NoteServer::new(config, registry, ctx)));
    let addr = server.start().await.unwrap();

    TestServer {
        _dir: dir,
        server,
        url: format!("ws://{addr}/ws"),
    }
}

async fn boot_server(files: &[(&str, &str)]) -> TestServer {
    boot_server_with(files, |c| c, |s| s).await
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Connect and consume the `hello` notification.
async fn connect_ready(url: &str) -> WsStream {
    let mut ws = connect(url).await;
    let hello = read_json(&mut ws).await;
    assert_eq!(hello["method"], "hello");
    ws
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Next text message, or `None` if nothing arrives within `wait`.
async fn try_read_json(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    loop {
        match timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Ok(Some(Ok(_))) => {}
            _ => return None,
        }
    }
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Send a JSON-RPC request and read the response with the same id.
async fn rpc_call(ws: &mut WsStream, id: u64, method: &str, params: Option<Value>) -> Value {
    let mut req = json!({"jsonrpc": "2.0", "id": id, "method": method});
    if let Some(p) = params {
        req["params"] = p;
    }
    send_json(ws, &req).await;

    loop {
        let parsed = read_json(ws).await;
        if parsed.get("id") == Some(&json!(id)) {
            return parsed;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_hello_carries_version() {
    let ts = boot_server(&[]).await;
    let _ = ts.server.ctx().versions.bump();
    let mut ws = connect(&ts.url).await;

    let hello = read_json(&mut ws).await;
    assert_eq!(hello["jsonrpc"], "2.0");
    assert_eq!(hello["method"], "hello");
    assert_eq!(hello["params"]["version"], 1);
    assert!(hello.get("id").is_none());

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_ping_preserves_id_type() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    let resp = rpc_call(&mut ws, 1, "system.ping", None).await;
    assert_eq!(resp["jsonrpc"], "2.0");
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["result"]["pong"], true);

    send_json(
        &mut ws,
        &json!({"jsonrpc": "2.0", "id": "abc", "method": "system.ping"}),
    )
    .await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["id"], "abc");

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_unknown_method() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    let resp = rpc_call(&mut ws, 7, "no.such", None).await;
    assert_eq!(resp["error"]["code"], -32601);
    assert!(resp.get("result").is_none());

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_invalid_frames_get_no_reply() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    for junk in [
        "not json at all",
        "[1,2,3]",
        r#"[{"jsonrpc":"2.0","id":1,"method":"system.ping"}]"#,
        r#"{"id":2,"method":"system.ping"}"#,
        r#"{"jsonrpc":"2.0","id":null,"method":"system.ping"}"#,
        r#"{"jsonrpc":"2.0","id":{"x":1},"method":"system.ping"}"#,
        "",
    ] {
        ws.send(Message::text(junk)).await.unwrap();
    }
    assert!(try_read_json(&mut ws, Duration::from_millis(300)).await.is_none());

    // The session is still usable.
    let resp = rpc_call(&mut ws, 3, "system.ping", None).await;
    assert_eq!(resp["result"]["pong"], true);

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_notification_is_not_answered() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    send_json(&mut ws, &json!({"jsonrpc": "2.0", "method": "system.ping"})).await;
    send_json(&mut ws, &json!({"jsonrpc": "2.0", "method": "no.such"})).await;
    assert!(try_read_json(&mut ws, Duration::from_millis(300)).await.is_none());

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_binary_frame_is_decoded() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    let req = json!({"jsonrpc": "2.0", "id": 9, "method": "system.ping"}).to_string();
    ws.send(Message::binary(req.into_bytes())).await.unwrap();
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["id"], 9);
    assert_eq!(resp["result"]["pong"], true);

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_note_create_round_trip() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    let params = json!({"path": "a/b/c.md", "heading": "H", "body": "text"});
    let resp = rpc_call(&mut ws, 1, "note.create", Some(params.clone())).await;
    assert_eq!(resp["result"]["created"], true);
    assert_eq!(resp["result"]["path"], "a/b/c.md");
    assert_eq!(resp["result"]["title"], "c");

    let written = std::fs::read_to_string(ts.vault_path("a/b/c.md")).unwrap();
    assert!(written.starts_with("# H"));

    let resp = rpc_call(&mut ws, 2, "note.new", Some(params)).await;
    assert_eq!(resp["error"]["code"], -32000);
    assert!(
        resp["error"]["message"]
            .as_str()
            .unwrap()
            .contains("already exists")
    );
    assert!(resp["error"].get("data").is_none());

    let preview = rpc_call(&mut ws, 3, "note.getPreview", Some(json!({"path": "a/b/c.md"}))).await;
    assert_eq!(preview["result"]["excerpt"], "# H\n\ntext");

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_search_limit() {
    let ts = boot_server(&[("one.md", "foo"), ("two.md", "foo"), ("three.md", "foo")]).await;
    let mut ws = connect_ready(&ts.url).await;

    let resp = rpc_call(&mut ws, 1, "search.query", Some(json!({"q": "foo", "limit": 1}))).await;
    assert_eq!(resp["result"]["results"].as_array().unwrap().len(), 1);

    let resp = rpc_call(&mut ws, 2, "search.query", Some(json!({"q": ""}))).await;
    assert_eq!(resp["error"]["code"], -32000);

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_snapshot_short_circuit_and_change_broadcast() {
    let ts = boot_server(&[("a.md", "[[b]]"), ("b.md", "")]).await;
    let mut ws1 = connect_ready(&ts.url).await;
    let mut ws2 = connect_ready(&ts.url).await;

    let full = rpc_call(&mut ws1, 1, "graph.getSnapshot", None).await;
    assert_eq!(full["result"]["version"], 0);
    assert_eq!(full["result"]["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(
        full["result"]["edges"],
        json!([{"source": "a.md", "target": "b.md", "count": 1}])
    );

    let same = rpc_call(&mut ws1, 2, "graph.getSnapshot", Some(json!({"sinceVersion": 0}))).await;
    assert_eq!(same["result"], json!({"version": 0, "changed": false}));

    let _ = ts.server.ctx().versions.bump();
    for ws in [&mut ws1, &mut ws2] {
        let changed = read_json(ws).await;
        assert_eq!(changed["method"], "graph.changed");
        assert_eq!(changed["params"]["version"], 1);
    }

    let stale = rpc_call(&mut ws1, 3, "graph.getSnapshot", Some(json!({"sinceVersion": 0}))).await;
    assert_eq!(stale["result"]["version"], 1);
    assert!(stale["result"]["nodes"].is_array());

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_server_broadcast_reaches_all_clients() {
    let ts = boot_server(&[]).await;
    let mut ws1 = connect_ready(&ts.url).await;
    let mut ws2 = connect_ready(&ts.url).await;

    assert_eq!(ts.server.session_count().await, 2);
    let delivered = ts.server.broadcast("custom.event", Some(json!({"n": 1}))).await;
    assert_eq!(delivered, 2);

    for ws in [&mut ws1, &mut ws2] {
        let msg = read_json(ws).await;
        assert_eq!(msg["method"], "custom.event");
        assert_eq!(msg["params"]["n"], 1);
    }

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_rapid_fire_requests() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    for i in 1..=50u64 {
        let req = json!({"jsonrpc": "2.0", "id": format!("rapid_{i}"), "method": "system.ping"});
        send_json(&mut ws, &req).await;
    }

    let mut ids = std::collections::HashSet::new();
    while ids.len() < 50 {
        let msg = read_json(&mut ws).await;
        assert_eq!(msg["result"]["pong"], true);
        assert!(ids.insert(msg["id"].as_str().unwrap().to_owned()), "duplicate response");
    }

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_burst_beyond_send_queue_is_fully_answered() {
    let ts = boot_server_with(
        &[],
        |c| ServerConfig {
            send_queue: 4,
            ..c
        },
        |s| s,
    )
    .await;
    let mut ws = connect_ready(&ts.url).await;

    for i in 0..200u64 {
        let req = json!({"jsonrpc": "2.0", "id": i, "method": "system.ping"});
        send_json(&mut ws, &req).await;
    }

    let mut ids = std::collections::HashSet::new();
    while ids.len() < 200 {
        let msg = read_json(&mut ws).await;
        assert_eq!(msg["result"]["pong"], true);
        assert!(ids.insert(msg["id"].as_u64().unwrap()), "duplicate response");
    }
    assert!(try_read_json(&mut ws, Duration::from_millis(200)).await.is_none());

    let session = ts.server.sessions().snapshot().await.pop().unwrap();
    assert_eq!(session.connection.drop_count(), 0);

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_hello_precedes_change_notifications() {
    let ts = boot_server(&[]).await;
    let versions = Arc::clone(&ts.server.ctx().versions);
    let bumper = tokio::spawn(async move {
        for _ in 0..50 {
            let _ = versions.bump();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    for _ in 0..5 {
        let mut ws = connect(&ts.url).await;
        let first = read_json(&mut ws).await;
        assert_eq!(first["method"], "hello");
    }
    bumper.await.unwrap();

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_call_remote_round_trip() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    let session = ts.server.sessions().snapshot().await.pop().unwrap();
    let peer = Arc::clone(&session.peer);
    let call = tokio::spawn(async move {
        peer.call_remote("client.echo", Some(json!({"v": 42}))).await
    });

    let req = read_json(&mut ws).await;
    assert_eq!(req["method"], "client.echo");
    assert_eq!(req["params"]["v"], 42);
    send_json(
        &mut ws,
        &json!({"jsonrpc": "2.0", "id": req["id"], "result": {"echo": 42}}),
    )
    .await;

    let result = timeout(TIMEOUT, call).await.unwrap().unwrap().unwrap();
    assert_eq!(result["echo"], 42);
    assert_eq!(session.peer.pending_count(), 0);

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_client_disconnect_rejects_pending_calls() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    let session = ts.server.sessions().snapshot().await.pop().unwrap();
    let mut calls = Vec::new();
    for _ in 0..3 {
        let peer = Arc::clone(&session.peer);
        calls.push(tokio::spawn(async move {
            peer.call_remote("client.wait", None).await
        }));
    }
    for _ in 0..3 {
        let _ = read_json(&mut ws).await;
    }

    ws.close(None).await.unwrap();

    for call in calls {
        let err = timeout(TIMEOUT, call).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(err, CallError::ConnectionClosed { .. }), "got {err:?}");
    }
    assert!(session.peer.is_closed());

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while ts.server.session_count().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_stop_drains_with_server_stopping() {
    let ts = boot_server(&[]).await;
    let mut ws = connect_ready(&ts.url).await;

    let session = ts.server.sessions().snapshot().await.pop().unwrap();
    let peer = Arc::clone(&session.peer);
    let call = tokio::spawn(async move { peer.call_remote("client.wait", None).await });
    let _ = read_json(&mut ws).await;

    ts.server.stop().await;
    assert!(!ts.server.is_listening().await);
    assert_eq!(ts.server.session_count().await, 0);

    let err = timeout(TIMEOUT, call).await.unwrap().unwrap().unwrap_err();
    assert_eq!(
        err,
        CallError::ConnectionClosed {
            code: 1001,
            reason: "server stopping".into(),
        }
    );

    // The client sees a close frame carrying the same reason.
    let mut close = None;
    while let Ok(Some(Ok(msg))) = timeout(TIMEOUT, ws.next()).await {
        if let Message::Close(frame) = msg {
            close = frame;
            break;
        }
    }
    let frame = close.expect("close frame");
    assert_eq!(u16::from(frame.code), 1001);
    assert_eq!(frame.reason.as_str(), "server stopping");

    // A second stop is a no-op.
    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_connection_limit_refuses_with_503() {
    let ts = boot_server_with(
        &[],
        |c| ServerConfig {
            max_connections: 1,
            ..c
        },
        |s| s,
    )
    .await;
    let _ws = connect_ready(&ts.url).await;

    let err = connect_async(&ts.url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => {
            assert_eq!(resp.status().as_u16(), 503);
        }
        other => panic!("expected HTTP 503, got {other:?}"),
    }

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_connect_hook_fires() {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let ts = boot_server_with(
        &[],
        |c| c,
        move |s| {
            s.with_connect_hook(move |client_id| {
                let _ = tx.send(client_id.to_owned());
            })
        },
    )
    .await;
    let _ws = connect_ready(&ts.url).await;

    let client_id = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert!(client_id.starts_with("client_"));

    ts.server.stop().await;
}

#[tokio::test]
async fn e2e_restart_accepts_new_clients() {
    let ts = boot_server(&[]).await;
    ts.server.stop().await;

    let addr = ts.server.start().await.unwrap();
    let mut ws = connect_ready(&format!("ws://{addr}/ws")).await;
    let resp = rpc_call(&mut ws, 1, "system.ping", None).await;
    assert_eq!(resp["result"]["pong"], true);

    ts.server.stop().await;
}
