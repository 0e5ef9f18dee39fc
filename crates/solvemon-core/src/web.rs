//! Read-only HTTP surface for the monitor.
//!
//! An axum router on tokio. Every route is a `GET`; other methods get 405.
//!
//! | Route                 | Body                                            |
//! |-----------------------|-------------------------------------------------|
//! | `/api/health`         | JSON monitor status                             |
//! | `/api/snapshot`       | JSON latest snapshot, 404 before the first one  |
//! | `/api/snapshotstream` | SSE: `ready`, then `snapshot` frames and `lag`  |
//! | `/api/heatmap`        | JSON ages, normalized, percentile and stats     |
//! | `/api/trends`         | CSV, `?maxPoints=N` overrides the default       |
//! | `/api/process`        | JSON solver process stats or `null`             |
//! | `/api/solutions`      | solutions file as text, 404 when absent         |

use axum::extract::{Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::SnapshotFrame;
use crate::config::Config;
use crate::monitor::{MonitorState, MonitorStatus};
use crate::{Error, Result, VERSION, process, trends};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3001;

const STREAM_CHANNEL_BUFFER: usize = 256;
const STREAM_KEEPALIVE_SECS: u64 = 15;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    host: String,
    port: u16,
    /// Must be set to `true` to bind on a non-localhost address.
    allow_public_bind: bool,
    stats_path: PathBuf,
    solutions_path: PathBuf,
    max_points: usize,
    process_name: String,
}

impl WebServerConfig {
    /// Create a new config with the default localhost host.
    #[must_use]
    pub fn new(port: u16) -> Self {
        let config = Config::default();
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            allow_public_bind: false,
            stats_path: config.paths.stats_path(),
            solutions_path: config.paths.solutions_path(),
            max_points: config.trends.max_points,
            process_name: config.process.name,
        }
    }

    /// Override the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the bind host.
    ///
    /// Non-localhost addresses require [`Self::with_dangerous_public_bind`].
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Explicitly opt in to binding on a non-localhost address.
    #[must_use]
    pub fn with_dangerous_public_bind(mut self) -> Self {
        self.allow_public_bind = true;
        self
    }

    /// CSV log used for `/api/trends`.
    #[must_use]
    pub fn with_stats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_path = path.into();
        self
    }

    /// Solutions file served at `/api/solutions`.
    #[must_use]
    pub fn with_solutions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.solutions_path = path.into();
        self
    }

    #[must_use]
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.max(1);
        self
    }

    #[must_use]
    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns `true` when the configured host is a loopback address.
    fn is_localhost(&self) -> bool {
        matches!(
            self.host.as_str(),
            "127.0.0.1" | "::1" | "localhost" | "[::1]"
        )
    }
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

impl From<&Config> for WebServerConfig {
    fn from(config: &Config) -> Self {
        let web = Self::new(config.web.port)
            .with_host(config.web.host.clone())
            .with_stats_path(config.paths.stats_path())
            .with_solutions_path(config.paths.solutions_path())
            .with_max_points(config.trends.max_points)
            .with_process_name(config.process.name.clone());
        if config.web.allow_public_bind {
            web.with_dangerous_public_bind()
        } else {
            web
        }
    }
}

// =============================================================================
// Server lifecycle
// =============================================================================

/// Handle to a running web server.
#[derive(Debug)]
pub struct WebServerHandle {
    bound_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl WebServerHandle {
    /// The address the server actually bound to.
    #[must_use]
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Close open streams, drain in-flight requests and wait for the server.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::Runtime(format!("web server error: {err}"))),
            Err(err) => Err(Error::Runtime(format!("web server join error: {err}"))),
        }
    }
}

/// Start the web server and return a handle for shutdown.
///
/// Refuses to bind on non-localhost addresses unless the config was
/// created with [`WebServerConfig::with_dangerous_public_bind`].
pub async fn start_web_server(
    config: WebServerConfig,
    monitor: MonitorState,
) -> Result<WebServerHandle> {
    if !config.is_localhost() && !config.allow_public_bind {
        return Err(Error::Runtime(format!(
            "refusing to bind on public address '{}'; set web.allow_public_bind to override",
            config.host
        )));
    }
    if !config.is_localhost() {
        warn!(
            host = %config.host,
            "Binding web server on non-localhost address; endpoints may be remotely reachable"
        );
    }

    let listener = TcpListener::bind(config.bind_addr()).await?;
    let bound_addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = build_app(AppState {
        config: Arc::new(config),
        monitor,
        shutdown: shutdown_rx.clone(),
    });
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_requested(shutdown_rx))
            .await
    });
    info!(%bound_addr, "Web server listening");

    Ok(WebServerHandle {
        bound_addr,
        shutdown: shutdown_tx,
        join,
    })
}

/// Resolves once `true` is sent or the handle is dropped.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    info!("Web server stopping");
}

// =============================================================================
// Router and shared state
// =============================================================================

/// Shared application state available to all handlers.
#[derive(Debug, Clone)]
struct AppState {
    config: Arc<WebServerConfig>,
    monitor: MonitorState,
    shutdown: watch::Receiver<bool>,
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/snapshot", get(handle_snapshot))
        .route("/api/snapshotstream", get(handle_snapshot_stream))
        .route("/api/heatmap", get(handle_heatmap))
        .route("/api/trends", get(handle_trends))
        .route("/api/process", get(handle_process))
        .route("/api/solutions", get(handle_solutions))
        .fallback(handle_not_found)
        .layer(middleware::from_fn(request_span))
        .with_state(state)
}

/// Logs each request and allows any origin, like the dashboard expects.
async fn request_span(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    debug!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "web request"
    );
    response
}

// =============================================================================
// Response envelope
// =============================================================================

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    version: &'static str,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            error_code: None,
            version: VERSION,
        }
    }
}

impl ApiResponse<()> {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code.to_string()),
            version: VERSION,
        }
    }
}

fn json_ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

fn json_err(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(code, message))).into_response()
}

fn text_response(content_type: &'static str, body: String) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

// =============================================================================
// JSON and text routes
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    monitor: MonitorStatus,
}

async fn handle_health(State(state): State<AppState>) -> Response {
    json_ok(HealthResponse {
        status: "OK",
        timestamp: Utc::now(),
        monitor: state.monitor.status(),
    })
}

async fn handle_snapshot(State(state): State<AppState>) -> Response {
    match state.monitor.latest() {
        Some(snapshot) => json_ok(snapshot),
        None => json_err(
            StatusCode::NOT_FOUND,
            "no_snapshot",
            "no valid snapshot observed yet",
        ),
    }
}

async fn handle_heatmap(State(state): State<AppState>) -> Response {
    json_ok(state.monitor.heatmap_view())
}

#[derive(Debug, Deserialize)]
struct TrendsQuery {
    #[serde(rename = "maxPoints")]
    max_points: Option<String>,
}

async fn handle_trends(State(state): State<AppState>, Query(query): Query<TrendsQuery>) -> Response {
    let max_points = match query.max_points.as_deref() {
        None => state.config.max_points,
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                return json_err(
                    StatusCode::BAD_REQUEST,
                    "bad_request",
                    "maxPoints must be a positive integer",
                );
            }
        },
    };

    let path = state.config.stats_path.clone();
    match tokio::task::spawn_blocking(move || trends::sample_or_empty(&path, max_points)).await {
        Ok(series) => text_response("text/csv; charset=utf-8", series.to_csv()),
        Err(err) => json_err(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string()),
    }
}

async fn handle_process(State(state): State<AppState>) -> Response {
    let name = state.config.process_name.clone();
    match tokio::task::spawn_blocking(move || process::find_solver_process(&name)).await {
        Ok(stats) => json_ok(stats),
        Err(err) => json_err(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string()),
    }
}

async fn handle_solutions(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(&state.config.solutions_path).await {
        Ok(text) => text_response("text/plain; charset=utf-8", text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            json_err(StatusCode::NOT_FOUND, "not_found", "solutions file not found")
        }
        Err(err) => json_err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "resource_unavailable",
            err.to_string(),
        ),
    }
}

async fn handle_not_found(req: Request) -> Response {
    json_err(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("no route for {}", req.uri().path()),
    )
}

// =============================================================================
// /api/snapshotstream
// =============================================================================

#[derive(Serialize)]
struct ReadyEvent {
    version: &'static str,
    last_seq: u64,
}

#[derive(Serialize)]
struct LagEvent {
    skipped: u64,
}

/// SSE body fed by the per-client forwarding task.
struct SseChannel {
    rx: mpsc::Receiver<SseEvent>,
}

impl Stream for SseChannel {
    type Item = std::result::Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|event| event.map(Ok))
    }
}

fn sse_event(event_type: &str, id: Option<u64>, data: &impl Serialize) -> SseEvent {
    let data = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
    let event = SseEvent::default().event(event_type).data(data);
    match id {
        Some(id) => event.id(id.to_string()),
        None => event,
    }
}

fn frame_event(frame: &SnapshotFrame) -> SseEvent {
    sse_event("snapshot", Some(frame.seq), frame)
}

/// Stream frames until the client disconnects or the server shuts down.
///
/// The current snapshot (if any) is sent right after `ready`; a frame
/// published in between may therefore arrive twice.
async fn handle_snapshot_stream(State(state): State<AppState>) -> impl IntoResponse {
    let bus = Arc::clone(state.monitor.bus());
    let mut frames = bus.subscribe();
    let mut shutdown = state.shutdown.clone();

    let ready = ReadyEvent {
        version: VERSION,
        last_seq: bus.last_seq(),
    };
    let current = state.monitor.latest().map(|snapshot| SnapshotFrame {
        seq: ready.last_seq,
        emitted_at: Utc::now(),
        snapshot,
    });

    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_BUFFER);
    tokio::spawn(async move {
        if tx.send(sse_event("ready", None, &ready)).await.is_err() {
            return;
        }
        if let Some(frame) = current {
            if tx.send(frame_event(&frame)).await.is_err() {
                return;
            }
        }
        debug!(listeners = bus.receiver_count(), "Stream client connected");

        loop {
            let event = tokio::select! {
                received = frames.recv() => match received {
                    Ok(frame) => frame_event(&frame),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Stream client lagged");
                        sse_event("lag", None, &LagEvent { skipped })
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
                () = tx.closed() => break,
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("Stream client disconnected");
    });

    Sse::new(SseChannel { rx }).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(STREAM_KEEPALIVE_SECS))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot;
    use std::io::Write;
    use tempfile::TempDir;

    fn snapshot_of(row: &str, steps: u64) -> Arc<crate::snapshot::Snapshot> {
        Arc::new(snapshot::parse(&format!("{row}\n\n{steps}: 1 / 2 / 3\n0.5\n")).unwrap())
    }

    fn test_config(dir: &TempDir) -> WebServerConfig {
        WebServerConfig::new(0)
            .with_stats_path(dir.path().join("stats.csv"))
            .with_solutions_path(dir.path().join("solutions.txt"))
            .with_max_points(10)
            .with_process_name("solvemon-test-no-such-process")
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
        let resp = client()
            .get(format!("http://{addr}{path}"))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    async fn get_json(addr: SocketAddr, path: &str) -> (u16, serde_json::Value) {
        let (status, body) = get(addr, path).await;
        (status, serde_json::from_str(&body).unwrap())
    }

    /// Split a stream body into `(field, value)` lists, one per event.
    fn sse_frames(buffer: &str) -> Vec<Vec<(String, String)>> {
        buffer
            .split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .map(|block| {
                block
                    .lines()
                    .filter(|line| !line.starts_with(':'))
                    .filter_map(|line| line.split_once(':'))
                    .map(|(k, v)| (k.to_string(), v.trim_start().to_string()))
                    .collect::<Vec<_>>()
            })
            .filter(|fields| !fields.is_empty())
            .collect()
    }

    fn field<'a>(frame: &'a [(String, String)], name: &str) -> Option<&'a str> {
        frame
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Read the stream until `count` events have arrived.
    async fn read_events(
        resp: &mut reqwest::Response,
        buffer: &mut String,
        count: usize,
    ) -> Vec<Vec<(String, String)>> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let complete = buffer.rfind("\n\n").map_or("", |end| &buffer[..end]);
                let frames = sse_frames(complete);
                if frames.len() >= count {
                    return frames;
                }
                let chunk = resp.chunk().await.unwrap().expect("stream ended early");
                buffer.push_str(std::str::from_utf8(&chunk).unwrap());
            }
        })
        .await
        .expect("events within deadline")
    }

    #[test]
    fn localhost_detection() {
        assert!(WebServerConfig::new(0).is_localhost());
        assert!(WebServerConfig::new(0).with_host("localhost").is_localhost());
        assert!(WebServerConfig::new(0).with_host("::1").is_localhost());
        assert!(!WebServerConfig::new(0).with_host("0.0.0.0").is_localhost());
    }

    #[test]
    fn sse_event_carries_type_id_and_json() {
        let frame = SnapshotFrame {
            seq: 7,
            emitted_at: Utc::now(),
            snapshot: snapshot_of("AB", 7),
        };
        let rendered = format!("{:?}", frame_event(&frame));
        assert!(rendered.contains("snapshot"));
        assert!(rendered.contains('7'));
    }

    #[tokio::test]
    async fn refuses_public_bind_without_opt_in() {
        let config = WebServerConfig::new(0).with_host("0.0.0.0");
        let err = start_web_server(config, MonitorState::new(4))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refusing to bind"));
    }

    #[tokio::test]
    async fn health_and_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let server = start_web_server(test_config(&dir), MonitorState::new(4))
            .await
            .unwrap();
        let addr = server.bound_addr();

        let resp = client()
            .get(format!("http://{addr}/api/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let health: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(health["ok"], true);
        assert_eq!(health["data"]["status"], "OK");
        assert_eq!(health["data"]["monitor"]["has_snapshot"], false);

        let (status, body) = get_json(addr, "/api/snapshot").await;
        assert_eq!(status, 404);
        assert_eq!(body["error_code"], "no_snapshot");

        let (status, body) = get_json(addr, "/api/nope").await;
        assert_eq!(status, 404);
        assert_eq!(body["error_code"], "not_found");

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_and_heatmap_reflect_state() {
        let dir = TempDir::new().unwrap();
        let state = MonitorState::new(4);
        state.apply(&snapshot_of("AB", 1));
        state.apply(&snapshot_of("AC", 2));
        let server = start_web_server(test_config(&dir), state).await.unwrap();
        let addr = server.bound_addr();

        let (status, body) = get(addr, "/api/snapshot").await;
        assert_eq!(status, 200);
        assert!(body.contains("2: 1 / 2 / 3"));

        let (status, heatmap) = get_json(addr, "/api/heatmap").await;
        assert_eq!(status, 200);
        assert_eq!(heatmap["data"]["ages"], serde_json::json!([[1, 0]]));
        assert_eq!(heatmap["data"]["percentile"][0][0], 1.0);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn trends_query_and_solutions_file() {
        let dir = TempDir::new().unwrap();
        let mut log = std::fs::File::create(dir.path().join("stats.csv")).unwrap();
        for steps in 1..=10u64 {
            writeln!(log, "{steps},0,0,{},1.5,0,0,{steps}.0", steps * 3).unwrap();
        }
        drop(log);
        let server = start_web_server(test_config(&dir), MonitorState::new(4))
            .await
            .unwrap();
        let addr = server.bound_addr();

        let (status, csv) = get(addr, "/api/trends").await;
        assert_eq!(status, 200);
        assert_eq!(csv.lines().count(), 11);
        assert_eq!(csv.lines().next(), Some(trends::TREND_CSV_HEADER));

        let (status, csv) = get(addr, "/api/trends?maxPoints=5").await;
        assert_eq!(status, 200);
        assert_eq!(csv.lines().count(), 6);

        // Percent-encoded "5".
        let (status, csv) = get(addr, "/api/trends?maxPoints=%35").await;
        assert_eq!(status, 200);
        assert_eq!(csv.lines().count(), 6);

        for bad in ["0", "abc", "-3"] {
            let (status, body) = get_json(addr, &format!("/api/trends?maxPoints={bad}")).await;
            assert_eq!(status, 400, "maxPoints={bad}");
            assert_eq!(body["error_code"], "bad_request");
        }

        let (status, _) = get(addr, "/api/solutions").await;
        assert_eq!(status, 404);
        std::fs::write(dir.path().join("solutions.txt"), "AB\nCD\n").unwrap();
        let (status, text) = get(addr, "/api/solutions").await;
        assert_eq!(status, 200);
        assert_eq!(text, "AB\nCD\n");

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missing_process_is_null_and_post_is_rejected() {
        let dir = TempDir::new().unwrap();
        let server = start_web_server(test_config(&dir), MonitorState::new(4))
            .await
            .unwrap();
        let addr = server.bound_addr();

        let (status, body) = get_json(addr, "/api/process").await;
        assert_eq!(status, 200);
        assert_eq!(body["ok"], true);
        assert!(body["data"].is_null());

        let resp = client()
            .post(format!("http://{addr}/api/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 405);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stream_sends_ready_current_then_live_frames() {
        let dir = TempDir::new().unwrap();
        let state = MonitorState::new(4);
        state.apply(&snapshot_of("AB", 1));
        let server = start_web_server(test_config(&dir), state.clone())
            .await
            .unwrap();
        let addr = server.bound_addr();

        let mut resp = client()
            .get(format!("http://{addr}/api/snapshotstream"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let mut buffer = String::new();
        let events = read_events(&mut resp, &mut buffer, 2).await;
        assert_eq!(field(&events[0], "event"), Some("ready"));
        let ready: serde_json::Value =
            serde_json::from_str(field(&events[0], "data").unwrap()).unwrap();
        assert_eq!(ready["last_seq"], 1);
        assert_eq!(field(&events[1], "event"), Some("snapshot"));
        assert_eq!(field(&events[1], "id"), Some("1"));

        state.apply(&snapshot_of("AC", 2));
        let events = read_events(&mut resp, &mut buffer, 3).await;
        assert_eq!(field(&events[2], "event"), Some("snapshot"));
        assert_eq!(field(&events[2], "id"), Some("2"));
        assert!(field(&events[2], "data").unwrap().contains("2: 1 / 2 / 3"));

        drop(resp);
        server.shutdown().await.unwrap();
    }
}
