use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use relay_bot::MessageEvent;
use relay_engine::Pipeline;
use relay_settings::ServerSettings;

/// How long in-flight pipeline runs get to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Events older than this are dropped unprocessed.
    pub stale_after: Duration,
    pub request_timeout: Duration,
    /// Messages from this sender are the bot's own and are dropped.
    pub bot_open_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9091,
            stale_after: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            bot_open_id: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(server: &ServerSettings, bot_open_id: &str) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            stale_after: Duration::from_secs(server.stale_after_secs),
            bot_open_id: bot_open_id.to_string(),
            ..Self::default()
        }
    }
}

/// Why an inbound event was not run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discard {
    Stale,
    OwnMessage,
}

impl Discard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::OwnMessage => "self",
        }
    }
}

/// Decide whether `event` should run through the pipeline at `now_ms`.
pub fn admit(config: &ServerConfig, event: &MessageEvent, now_ms: i64) -> Result<(), Discard> {
    let stale_ms = i64::try_from(config.stale_after.as_millis()).unwrap_or(i64::MAX);
    if event.age_ms(now_ms) > stale_ms {
        return Err(Discard::Stale);
    }
    if !config.bot_open_id.is_empty() && event.sender_id == config.bot_open_id {
        return Err(Discard::OwnMessage);
    }
    Ok(())
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub pipeline: Arc<Pipeline<MessageEvent>>,
    pub tracker: TaskTracker,
    pub cancel: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let timeout = state.config.request_timeout;
    Router::new()
        .route("/events", post(events_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `cancel` fires. Returns once the listener is bound.
pub async fn start(
    config: ServerConfig,
    pipeline: Arc<Pipeline<MessageEvent>>,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let tracker = TaskTracker::new();
    let state = AppState {
        config: Arc::new(config),
        pipeline,
        tracker: tracker.clone(),
        cancel: cancel.clone(),
    };
    let router = build_router(state);

    info!(port = local_addr.port(), "relay server started");

    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            warn!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        tracker,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    tracker: TaskTracker,
}

impl ServerHandle {
    /// Wait for the server to stop, then up to [`DRAIN_TIMEOUT`] for in-flight
    /// pipeline runs. Runs see their cancellation token fire with shutdown.
    pub async fn wait(self) {
        if let Err(e) = self.server.await {
            warn!(error = %e, "server task failed");
        }
        self.tracker.close();
        info!(task_count = self.tracker.len(), "waiting for pipeline runs to complete");
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait()).await.is_err() {
            warn!("shutdown timed out after {DRAIN_TIMEOUT:?}, some runs may still be in flight");
        }
        info!("relay server stopped");
    }
}

async fn events_handler(State(state): State<AppState>, Json(event): Json<MessageEvent>) -> (StatusCode, Json<Value>) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    if let Err(reason) = admit(&state.config, &event, now_ms) {
        debug!(message_id = %event.message_id, reason = reason.as_str(), "event discarded");
        return (
            StatusCode::OK,
            Json(json!({ "status": "discarded", "reason": reason.as_str() })),
        );
    }

    let pipeline = Arc::clone(&state.pipeline);
    let cancel = state.cancel.child_token();
    let message_id = event.message_id.clone();
    let _ = state.tracker.spawn(async move {
        let report = pipeline.run(Arc::new(event), cancel).await;
        let failures = report.failures().count();
        if failures > 0 {
            warn!(message_id = %message_id, trace_id = %report.trace_id, failures, "pipeline run had failures");
        } else {
            debug!(message_id = %message_id, trace_id = %report.trace_id, "pipeline run finished");
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
