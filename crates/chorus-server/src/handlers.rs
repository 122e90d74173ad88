//! HTTP and WebSocket handlers for the Chorus server.
//!
//! Routes map one-to-one onto hub operations: `/send` submits and waits for
//! the broadcast, `/receive` is a single pull, `/history` reads the log and
//! the WebSocket path runs a push session.

use crate::config::{Config, StorageBackend, StorageConfig};
use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chorus_core::{
    FileStore, Hub, MemoryStore, Message, MessageId, MessageStore, NewMessage, StoreError,
};
use chorus_protocol::Encoding;
use chorus_transport::{poll, PollOutcome, PushSession, WebSocketConnection};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the running core.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    /// Flips to `true` when the server begins shutting down.
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Create new app state with no shutdown signal attached.
    #[must_use]
    pub fn new(hub: Hub, config: Config) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self {
            hub,
            config,
            shutdown,
        }
    }

    /// Close push sessions once `shutdown` becomes `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct SinceQuery {
    since: Option<MessageId>,
}

#[derive(Debug, Default, Deserialize)]
struct PushQuery {
    since: Option<MessageId>,
    format: Option<String>,
}

/// Open the configured message log.
///
/// # Errors
///
/// Returns an error if the file backend cannot open or repair its log.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn MessageStore>, StoreError> {
    let store: Arc<dyn MessageStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => Arc::new(FileStore::open(&config.path).await?),
    };
    Ok(store)
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route("/send", post(send_handler))
        .route("/receive", get(receive_handler))
        .route("/history", get(history_handler))
        .route("/past_messages", get(history_handler))
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = open_store(&config.storage).await?;
    let (hub, broadcaster) = Hub::start(store, config.hub_config()).await?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let ws_path = config.transport.websocket_path.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = build_router(Arc::new(
        AppState::new(hub, config).with_shutdown(shutdown_rx),
    ));

    let listener = TcpListener::bind(addr).await?;

    info!("Chorus server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Upgraded sockets outlive the HTTP drain, so close them explicitly
        let _ = shutdown_tx.send(true);
    })
    .await?;

    // The broadcaster exits after push sessions drop their hub handles
    if tokio::time::timeout(Duration::from_secs(5), broadcaster)
        .await
        .is_err()
    {
        warn!("Broadcaster did not stop within 5s; pending submissions dropped");
    }

    info!("Chorus server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown signal received");
}

/// Submit one message and wait until it is persisted and broadcast.
async fn send_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Message>, ApiError> {
    let start = Instant::now();

    let submission: NewMessage = serde_json::from_slice(&body).map_err(|e| {
        metrics::record_submission("malformed", start.elapsed().as_secs_f64());
        ApiError::bad_request(format!("Malformed message: {e}"))
    })?;

    match state.hub.ingest().submit_and_wait(submission).await {
        Ok(message) => {
            metrics::record_submission("ok", start.elapsed().as_secs_f64());
            debug!(message_id = message.id, author = %message.author, "Message sent");
            Ok(Json(message))
        }
        Err(e) => {
            metrics::record_submission("rejected", start.elapsed().as_secs_f64());
            Err(e.into())
        }
    }
}

/// Wait for one message, or answer 204 when the wait elapses.
async fn receive_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SinceQuery>,
) -> Result<Response, ApiError> {
    match poll(&state.hub, state.config.pull_wait(), query.since).await? {
        PollOutcome::Message(message) => {
            metrics::record_poll("message");
            Ok(Json(message).into_response())
        }
        PollOutcome::Empty => {
            metrics::record_poll("empty");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

/// Persisted messages in ID order, optionally only those after `since`.
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = match query.since {
        Some(since) => state.hub.history_since(since).await?,
        None => state.hub.history().await?,
    };
    Ok(Json(messages))
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": state.hub.registry().len(),
        "last_id": state.hub.last_id(),
        "storage": state.hub.store_name(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PushQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let encoding = match query.format.as_deref() {
        Some(format) => format
            .parse::<Encoding>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => Encoding::default(),
    };
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let max_frame_size = state.config.limits.max_frame_size;

    Ok(ws
        .max_message_size(max_frame_size)
        .on_upgrade(move |socket| {
            handle_websocket(socket, state, query.since, encoding, remote_addr)
        }))
}

/// Run a push session over an upgraded socket.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    since: Option<MessageId>,
    encoding: Encoding,
    remote_addr: Option<SocketAddr>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let conn = WebSocketConnection::new(
        socket,
        encoding,
        remote_addr,
        state.config.limits.max_frame_size,
    );

    debug!(remote = ?remote_addr, ?encoding, since = ?since, "WebSocket connected");

    let reason = PushSession::new(state.hub.clone(), conn, since)
        .with_shutdown(state.shutdown.clone())
        .run()
        .await;
    metrics::record_close(reason.as_str());

    debug!(remote = ?remote_addr, reason = reason.as_str(), "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use chorus_core::HubConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.pull.wait_ms = 50;
        config
    }

    async fn test_app_with(store: Arc<dyn MessageStore>) -> (Router, Hub) {
        let config = test_config();
        let (hub, _task) = Hub::start(store, config.hub_config()).await.unwrap();
        let app = build_router(Arc::new(AppState::new(hub.clone(), config)));
        (app, hub)
    }

    async fn test_app() -> (Router, Hub) {
        test_app_with(Arc::new(MemoryStore::new())).await
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_send_returns_sequenced_message() {
        let (app, _hub) = test_app().await;

        let response = app
            .oneshot(post_json("/send", r#"{"author":"alice","body":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"id": 1, "author": "alice", "body": "hi"})
        );
    }

    #[tokio::test]
    async fn test_send_accepts_legacy_field_names() {
        let (app, _hub) = test_app().await;

        let response = app
            .oneshot(post_json("/send", r#"{"username":"alice","content":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["author"], "alice");
    }

    #[tokio::test]
    async fn test_concurrent_sends_get_distinct_ids_in_history_order() {
        let (app, _hub) = test_app().await;

        let first = app
            .clone()
            .oneshot(post_json("/send", r#"{"author":"alice","body":"one"}"#))
            .await
            .unwrap();
        assert_eq!(json_body(first).await["id"], 1);

        let (a, b) = tokio::join!(
            app.clone()
                .oneshot(post_json("/send", r#"{"author":"bob","body":"two"}"#)),
            app.clone()
                .oneshot(post_json("/send", r#"{"author":"carol","body":"three"}"#)),
        );
        let mut ids = vec![
            json_body(a.unwrap()).await["id"].as_u64().unwrap(),
            json_body(b.unwrap()).await["id"].as_u64().unwrap(),
        ];
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3]);

        let history = json_body(app.oneshot(get("/history")).await.unwrap()).await;
        let history_ids: Vec<u64> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_u64().unwrap())
            .collect();
        assert_eq!(history_ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_rejects_bad_bodies() {
        let (app, hub) = test_app().await;

        for body in [
            "not json",
            r#"{"author":"alice"}"#,
            r#"{"author":"","body":"hi"}"#,
            r#"{"author":"alice","body":42}"#,
        ] {
            let response = app.clone().oneshot(post_json("/send", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(json_body(response).await["status"], 400);
        }
        assert_eq!(hub.last_id(), 0);
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let (app, _hub) = test_app().await;

        let response = app.clone().oneshot(get("/send")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = app
            .oneshot(post_json("/receive", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_history_empty_and_since() {
        let (app, hub) = test_app().await;

        let response = app.clone().oneshot(get("/past_messages")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!([]));

        for body in ["one", "two", "three"] {
            hub.ingest()
                .submit_and_wait(NewMessage::new("alice", body))
                .await
                .unwrap();
        }

        let since = json_body(app.oneshot(get("/history?since=1")).await.unwrap()).await;
        let bodies: Vec<&str> = since
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_receive_times_out_with_no_content() {
        let (app, hub) = test_app().await;

        let response = app.oneshot(get("/receive")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_receive_since_returns_missed_message() {
        let (app, hub) = test_app().await;
        hub.ingest()
            .submit_and_wait(NewMessage::new("alice", "hi"))
            .await
            .unwrap();

        let response = app.oneshot(get("/receive?since=0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["body"], "hi");
    }

    #[tokio::test]
    async fn test_receive_gets_live_message() {
        let mut config = test_config();
        config.pull.wait_ms = 5_000;
        let (hub, _task) = Hub::start(Arc::new(MemoryStore::new()), config.hub_config())
            .await
            .unwrap();
        let app = build_router(Arc::new(AppState::new(hub.clone(), config)));

        let waiter = tokio::spawn(app.oneshot(get("/receive")));
        while hub.registry().is_empty() {
            tokio::task::yield_now().await;
        }
        hub.ingest()
            .submit_and_wait(NewMessage::new("bob", "live"))
            .await
            .unwrap();

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["body"], "live");
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let (app, hub) = test_app().await;
        hub.ingest()
            .submit_and_wait(NewMessage::new("alice", "hi"))
            .await
            .unwrap();

        let body = json_body(app.oneshot(get("/health")).await.unwrap()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["last_id"], 1);
        assert_eq!(body["subscribers"], 0);
        assert_eq!(body["storage"], "memory");
    }

    struct BrokenStore;

    #[async_trait]
    impl MessageStore for BrokenStore {
        async fn append(&self, _message: &Message) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }

        async fn load_all(&self) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_send_persist_failure_is_500_and_not_broadcast() {
        let (app, hub) = test_app_with(Arc::new(BrokenStore)).await;
        let (_guard, mut rx) = hub.registry().subscribe_push(8, None);

        let response = app
            .oneshot(post_json("/send", r#"{"author":"alice","body":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_broadcaster_stopped_is_503() {
        let config = test_config();
        let (hub, task) = Hub::start(Arc::new(MemoryStore::new()), HubConfig::default())
            .await
            .unwrap();
        task.abort();
        let _ = task.await;

        let app = build_router(Arc::new(AppState::new(hub, config)));
        let response = app
            .oneshot(post_json("/send", r#"{"author":"alice","body":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_open_file_store_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            backend: StorageBackend::File,
            path: dir.path().join("log.jsonl").to_string_lossy().into_owned(),
        };

        {
            let store = open_store(&storage).await.unwrap();
            let (app, _hub) = test_app_with(store).await;
            let response = app
                .oneshot(post_json("/send", r#"{"author":"alice","body":"kept"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let store = open_store(&storage).await.unwrap();
        let (app, _hub) = test_app_with(store).await;
        let response = app
            .oneshot(post_json("/send", r#"{"author":"bob","body":"next"}"#))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["id"], 2);
    }
}
