//! `NoteServer`: axum HTTP + WebSocket supervisor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use noteweb_rpc::{CloseReason, MethodRegistry, RpcContext};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_CONNECTIONS_REJECTED_TOTAL, render};
use crate::websocket::bridge::ChangeBridge;
use crate::websocket::broadcast::{LiveSession, SessionSet};
use crate::websocket::session::{ConnectHook, SessionDeps, run_ws_session};

/// How long `stop()` waits for the listener task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// What each accepted session needs.
    pub deps: SessionDeps,
    /// Upgrade limit.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// When the server was created.
    pub start_time: Instant,
    /// Prometheus handle, if metrics are exported.
    pub metrics: Option<PrometheusHandle>,
}

struct Listening {
    addr: SocketAddr,
    shutdown: CancellationToken,
    serve: JoinHandle<()>,
    bridge: JoinHandle<()>,
}

/// The note-graph server.
///
/// Stopped until [`start`](Self::start); [`stop`](Self::stop) drains every
/// session and returns to stopped. A later `start` listens afresh.
pub struct NoteServer {
    config: ServerConfig,
    registry: Arc<MethodRegistry>,
    ctx: Arc<RpcContext>,
    sessions: Arc<SessionSet>,
    on_connect: Option<ConnectHook>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    listening: Mutex<Option<Listening>>,
}

impl NoteServer {
    /// Create a stopped server.
    pub fn new(config: ServerConfig, registry: MethodRegistry, ctx: RpcContext) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            sessions: Arc::new(SessionSet::new()),
            on_connect: None,
            metrics: None,
            start_time: Instant::now(),
            listening: Mutex::new(None),
        }
    }

    /// Run `hook` on its own task for every accepted connection.
    #[must_use]
    pub fn with_connect_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            deps: SessionDeps {
                registry: Arc::clone(&self.registry),
                ctx: Arc::clone(&self.ctx),
                sessions: Arc::clone(&self.sessions),
                send_queue: self.config.send_queue,
                heartbeat_interval: self.config.heartbeat_interval,
                heartbeat_timeout: self.config.heartbeat_timeout,
                on_connect: self.on_connect.clone(),
            },
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router.layer(TraceLayer::new_for_http()).with_state(state)
    }

    /// Bind and start accepting connections. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut slot = self.listening.lock().await;
        if let Some(listening) = slot.as_ref() {
            return Err(ServerError::AlreadyListening(listening.addr));
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;

        let shutdown = CancellationToken::new();
        let app = self.router();
        let serve_shutdown = shutdown.clone();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(serve_shutdown.cancelled_owned())
                .await;
            if let Err(err) = result {
                error!(error = %err, "server error");
            }
        });
        let bridge = tokio::spawn(
            ChangeBridge::new(Arc::clone(&self.ctx.versions), Arc::clone(&self.sessions))
                .run(shutdown.child_token()),
        );

        info!(%addr, "server listening");
        *slot = Some(Listening {
            addr,
            shutdown,
            serve,
            bridge,
        });
        Ok(addr)
    }

    /// Drain every session, close its socket and stop listening.
    ///
    /// No-op when already stopped.
    pub async fn stop(&self) {
        let mut slot = self.listening.lock().await;
        let Some(listening) = slot.take() else {
            debug!("stop called while stopped");
            return;
        };
        let reason = CloseReason::server_stopping();

        let live = self.sessions.snapshot().await;
        let count = live.len();
        for session in &live {
            close_session(session, &reason);
        }

        listening.shutdown.cancel();
        let mut serve = listening.serve;
        if tokio::time::timeout(STOP_TIMEOUT, &mut serve).await.is_err() {
            warn!("listener did not stop after {STOP_TIMEOUT:?}, aborting");
            serve.abort();
        }
        let _ = listening.bridge.await;

        // Sessions accepted while the listener was winding down.
        for session in self.sessions.take_all().await {
            close_session(&session, &reason);
        }
        info!(addr = %listening.addr, sessions = count, "server stopped");
    }

    /// Send a notification to every live session.
    ///
    /// Returns how many sessions accepted the frame.
    pub async fn broadcast(&self, method: &str, params: Option<Value>) -> usize {
        self.sessions.broadcast(method, params).await
    }

    /// Bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().await.as_ref().map(|l| l.addr)
    }

    /// Whether the server is listening.
    pub async fn is_listening(&self) -> bool {
        self.listening.lock().await.is_some()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// Get the live-session set.
    pub fn sessions(&self) -> &Arc<SessionSet> {
        &self.sessions
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the handler context.
    pub fn ctx(&self) -> &Arc<RpcContext> {
        &self.ctx
    }

    /// Get the method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }
}

fn close_session(session: &LiveSession, reason: &CloseReason) {
    let drained = session.peer.close_and_drain(reason);
    let _ = session.connection.close(reason.clone());
    debug!(client_id = %session.connection.id, drained, "session closed by server");
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.deps.sessions.len().await;
    let version = state.deps.ctx.versions.current();
    Json(health::health_check(state.start_time, connections, version))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let live = state.deps.sessions.len().await;
    if live >= state.max_connections {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(live, max = state.max_connections, "connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let client_id = format!("client_{}", Uuid::now_v7().simple());
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, client_id, state.deps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use noteweb_rpc::{ChangeVersion, HandlerLimits};
    use tower::ServiceExt;

    fn make_server() -> (tempfile::TempDir, NoteServer) {
        make_server_on(0)
    }

    fn make_server_on(port: u16) -> (tempfile::TempDir, NoteServer) {
        let dir = tempfile::tempdir().unwrap();
        let vault = noteweb_vault::FsVault::open(dir.path()).unwrap();
        let ctx = RpcContext::new(
            Arc::new(vault),
            Arc::new(ChangeVersion::new()),
            HandlerLimits::default(),
        );
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port,
            ..ServerConfig::default()
        };
        (dir, NoteServer::new(config, MethodRegistry::new(), ctx))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_endpoint_reports_version() {
        let (_dir, server) = make_server();
        let _ = server.ctx().versions.bump();

        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["version"], 1);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_route_only_with_handle() {
        let (_dir, server) = make_server();
        let (status, _) = get_json(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = server.with_metrics(handle);
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let (_dir, server) = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::OK);
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (_dir, server) = make_server();
        let (status, _) = get_json(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_stop_restart() {
        let (_dir, server) = make_server();
        assert!(!server.is_listening().await);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr().await, Some(addr));

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyListening(a) if a == addr));

        server.stop().await;
        assert!(!server.is_listening().await);
        server.stop().await;

        let again = server.start().await.unwrap();
        assert!(server.is_listening().await);
        assert_ne!(again.port(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (_dir, server) = make_server_on(port);
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(!server.is_listening().await);
    }

    #[tokio::test]
    async fn broadcast_without_sessions() {
        let (_dir, server) = make_server();
        assert_eq!(server.broadcast("graph.changed", None).await, 0);
        assert_eq!(server.session_count().await, 0);
    }
}
