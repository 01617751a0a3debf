//! Listener front and server wiring.
//!
//! [`NimbleServer`] owns everything shared by connections (group, pipeline,
//! handlers, shutdown token) and runs one of two fronts:
//!
//! - **tcp**: raw accept loop, one agent per accepted stream
//! - **websocket**: axum router with the upgrade endpoint plus `/health`
//!   and `/metrics`
//!
//! Every accepted connection gets an [`Agent`], a writer task and a read
//! task. Cancelling the shutdown token stops accepting and ends every
//! writer loop, which closes its connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use nimble_settings::TransportKind;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::{Agent, AgentEnv};
use crate::config::ServerConfig;
use crate::dispatch::HandlerRegistry;
use crate::dispatch::reader::{ReaderEnv, handshake_packet, run_reader};
use crate::errors::ServerError;
use crate::group::Group;
use crate::health::{self, HealthResponse};
use crate::lifecycle::{Component, Components};
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};
use crate::pipeline::Pipeline;
use crate::session::Session;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{self, Connection};
use crate::writer::{WriterEnv, run_writer};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a new connection needs, built once per server.
struct ConnectionEnv {
    agent: AgentEnv,
    writer: WriterEnv,
    reader: Arc<ReaderEnv>,
    transport: &'static str,
    /// Writer and read tasks of live connections.
    tasks: TaskTracker,
}

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    conn: Arc<ConnectionEnv>,
    group: Arc<Group>,
    start_time: Instant,
    allowed_origins: Arc<Vec<String>>,
    metrics: Option<PrometheusHandle>,
}

/// The nimble server.
pub struct NimbleServer {
    config: ServerConfig,
    group: Arc<Group>,
    handlers: Arc<HandlerRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    components: Components,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
    conn: Arc<ConnectionEnv>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<Session>>>>,
}

impl NimbleServer {
    /// Build a server with its own session group.
    pub fn new(config: ServerConfig, handlers: HandlerRegistry, pipeline: Pipeline) -> Result<Self, ServerError> {
        Self::with_group(config, Arc::new(Group::new("sessions")), handlers, pipeline)
    }

    /// Build a server around an existing group, so handlers created
    /// beforehand can broadcast to it.
    ///
    /// Handlers and pipeline stages are frozen from here on.
    pub fn with_group(
        config: ServerConfig,
        group: Arc<Group>,
        handlers: HandlerRegistry,
        pipeline: Pipeline,
    ) -> Result<Self, ServerError> {
        let handlers = Arc::new(handlers);
        let pipeline = Arc::new(pipeline);
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        let conn = Arc::new(ConnectionEnv {
            agent: AgentEnv {
                group: group.clone(),
                backlog: config.send_backlog,
                closed_sessions: closed_tx,
            },
            writer: WriterEnv::new(config.heartbeat_interval, pipeline.clone(), shutdown.token()),
            reader: Arc::new(ReaderEnv {
                handlers: handlers.clone(),
                pipeline,
                handshake: handshake_packet(config.heartbeat_interval)?,
                max_packet_size: config.max_packet_size,
                handler_timeout: config.handler_timeout,
            }),
            transport: config.transport.as_str(),
            tasks: TaskTracker::new(),
        });

        Ok(Self {
            config,
            group,
            handlers,
            shutdown,
            components: Components::new(),
            start_time: Instant::now(),
            metrics: None,
            conn,
            closed_rx: Mutex::new(Some(closed_rx)),
        })
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Register an application component.
    #[must_use]
    pub fn with_component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.register(component);
        self
    }

    /// HTTP router for the websocket front.
    pub fn router(&self) -> Router {
        let state = AppState {
            conn: self.conn.clone(),
            group: self.group.clone(),
            start_time: self.start_time,
            allowed_origins: Arc::new(self.config.allowed_origins.clone()),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured front and start serving.
    ///
    /// Returns the bound address and a handle that completes once the
    /// listener and background tasks have stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let bind = self.config.bind_addr();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| ServerError::Bind { addr: bind.clone(), source })?;
        let addr = listener.local_addr()?;

        let closed_rx = self.closed_rx.lock().take().ok_or(ServerError::AlreadyListening)?;
        self.components.startup();

        let token = self.shutdown.token();
        let mut tasks = vec![self.handlers.clone().spawn_close_listener(closed_rx, token.clone())];
        if let Some(expire) = self.config.session_expire {
            tasks.push(crate::sweeper::spawn_sweeper(self.group.clone(), expire, token.clone()));
        }

        match self.config.transport {
            TransportKind::Tcp => {
                tasks.push(tokio::spawn(accept_loop(listener, self.conn.clone(), token)));
            }
            TransportKind::WebSocket => {
                let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app)
                        .with_graceful_shutdown(token.cancelled_owned())
                        .await
                    {
                        error!(error = %e, "http server failed");
                    }
                }));
            }
        }

        info!(%addr, transport = self.conn.transport, "nimble server listening");
        let handle = tokio::spawn(async move {
            let _ = futures::future::join_all(tasks).await;
        });
        Ok((addr, handle))
    }

    /// Stop accepting, close every connection, wait for `handle` and the
    /// connection tasks, then shut components down in reverse order.
    pub async fn stop(&self, handle: JoinHandle<()>) {
        self.shutdown
            .drain(vec![handle], self.config.shutdown_timeout)
            .await;

        let tasks = &self.conn.tasks;
        let _ = tasks.close();
        if tokio::time::timeout(self.config.shutdown_timeout, tasks.wait())
            .await
            .is_err()
        {
            warn!(remaining = tasks.len(), "connections still draining after shutdown timeout");
        }
        self.components.shutdown();
        info!("nimble server stopped");
    }

    /// Group every accepted session joins.
    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    /// Coordinator whose token stops the listener and every writer.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registered route handlers.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }
}

async fn accept_loop(listener: TcpListener, env: Arc<ConnectionEnv>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => match transport::tcp::split(stream) {
                Ok(conn) => serve_connection(&env, conn),
                Err(e) => warn!(%peer, error = %e, "failed to set up connection"),
            },
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    info!("tcp listener stopped");
}

/// Create the agent and spawn its writer and read tasks.
fn serve_connection(env: &Arc<ConnectionEnv>, conn: Connection) {
    let Connection {
        transport,
        source,
        sink,
    } = conn;
    let (agent, queue) = Agent::new(transport, &env.agent);
    let session_id = agent.session().id();

    counter!(CONNECTIONS_TOTAL, "transport" => env.transport).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    info!(session_id, remote = %agent.remote_addr(), transport = env.transport, "new connection");

    let writer = env
        .tasks
        .spawn(run_writer(agent.clone(), queue, sink, env.writer.clone()));
    let reader_env = env.reader.clone();
    let _ = env.tasks.spawn(async move {
        run_reader(agent.clone(), source, reader_env).await;
        let exit = writer.await.ok();

        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            session_id,
            uid = agent.session().uid(),
            reason = exit.map_or("aborted", |e| e.as_str()),
            "connection closed"
        );
    });
}

fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    origin.is_some_and(|o| allowed.iter().any(|a| a == o))
}

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.allowed_origins, origin) {
        warn!(%peer, origin, "websocket origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    let env = state.conn.clone();
    ws.on_upgrade(move |socket| async move {
        serve_connection(&env, transport::ws::split(socket, peer));
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.conn.transport,
        state.group.count(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> NimbleServer {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        NimbleServer::new(config, HandlerRegistry::new(), Pipeline::new()).unwrap()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[test]
    fn origin_policy() {
        assert!(origin_allowed(&[], None));
        assert!(origin_allowed(&[], Some("https://any")));
        let allowed = vec!["https://good.example".to_string()];
        assert!(origin_allowed(&allowed, Some("https://good.example")));
        assert!(!origin_allowed(&allowed, Some("https://evil.example")));
        assert!(!origin_allowed(&allowed, None));
    }

    #[tokio::test]
    async fn health_endpoint_reports_sessions() {
        let server = make_server();
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["transport"], "tcp");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get_json(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_twice_is_rejected() {
        let server = make_server();
        let (_addr, handle) = server.listen().await.unwrap();
        assert!(matches!(server.listen().await, Err(ServerError::AlreadyListening)));
        server.stop(handle).await;
    }

    #[tokio::test]
    async fn stop_runs_component_shutdown() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Flag(AtomicBool, AtomicBool);
        impl Component for Flag {
            fn name(&self) -> &str {
                "flag"
            }
            fn init(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
            fn shutdown(&self) {
                self.1.store(true, Ordering::SeqCst);
            }
        }

        let flag = Arc::new(Flag(AtomicBool::new(false), AtomicBool::new(false)));
        let server = make_server().with_component(flag.clone());
        let (_addr, handle) = server.listen().await.unwrap();
        assert!(flag.0.load(Ordering::SeqCst));

        server.stop(handle).await;
        assert!(flag.1.load(Ordering::SeqCst));
        assert!(server.shutdown().is_triggered());
    }

    #[tokio::test]
    async fn bind_failure_reports_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port,
            ..ServerConfig::default()
        };
        let server = NimbleServer::new(config, HandlerRegistry::new(), Pipeline::new()).unwrap();
        assert!(matches!(server.listen().await, Err(ServerError::Bind { .. })));
    }
}
