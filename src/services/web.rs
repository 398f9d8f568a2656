//! Axum-based HTTP server for the chain session.
//!
//! Provides REST endpoints for:
//! - GET `/api/state` - Session state and chain length
//! - POST `/api/command` - Submit one command and wait for its outcome
//! - POST `/api/reinit` - Re-run discovery
//! - POST `/api/demo/start` - Start a builtin demo
//! - POST `/api/demo/cancel` - Cancel the running demo
//! - GET `/api/log` - Recent events

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::codec::describe_command;
use crate::commands::EngineError;
use crate::config::WebConfig;
use crate::demo::DemoError;
use crate::session::ChainSession;

use super::api::{
    ApiResponse, CancelResponse, CommandRequest, CommandResponse, DemoRequest, DemoResponse,
    LogQuery, LogResponse, ReinitResponse, StateResponse,
};

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> Reply<T> {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn bad_request<T>(message: &str) -> Reply<T> {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::err(message)))
}

fn engine_error<T>(err: &EngineError) -> Reply<T> {
    let status = match err {
        EngineError::Invalid(_) | EngineError::UnknownTarget { .. } => StatusCode::BAD_REQUEST,
        EngineError::Busy | EngineError::NotReady(_) => StatusCode::CONFLICT,
        EngineError::TimedOut | EngineError::DiscoveryTimeout => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Rejected(_) | EngineError::TransportError(_) => StatusCode::BAD_GATEWAY,
        EngineError::Disconnected => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ApiResponse::err(err.to_string()).with_code(err.tag())),
    )
}

fn demo_error<T>(err: &DemoError) -> Reply<T> {
    let (status, code) = match err {
        DemoError::AlreadyRunning => (StatusCode::CONFLICT, "already_running"),
        DemoError::UnknownPattern(_) => (StatusCode::BAD_REQUEST, "unknown_pattern"),
        DemoError::Lost => (StatusCode::INTERNAL_SERVER_ERROR, "lost"),
    };
    (
        status,
        Json(ApiResponse::err(err.to_string()).with_code(code)),
    )
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET /api/state - Returns current session state
async fn get_state(State(session): State<Arc<ChainSession>>) -> Json<ApiResponse<StateResponse>> {
    let status = session.state();
    Json(ApiResponse::ok(StateResponse::new(
        &status,
        session.demo_running(),
    )))
}

/// POST /api/command - Submit a command
///
/// Accepts JSON: `{"kind": "servo", "target": 2, "value": 90}`
async fn submit_command(
    State(session): State<Arc<ChainSession>>,
    body: Bytes,
) -> Reply<CommandResponse> {
    let Ok(request) = serde_json::from_slice::<CommandRequest>(&body) else {
        return bad_request("Invalid command request");
    };
    let Some(command) = request.to_command(session.config()) else {
        return bad_request("Unknown command kind");
    };

    match session.submit(command).await {
        Ok(outcome) => ok(CommandResponse {
            command: describe_command(&command, None),
            outcome,
        }),
        Err(err) => engine_error(&err),
    }
}

/// POST /api/reinit - Re-run discovery
async fn reinit(State(session): State<Arc<ChainSession>>) -> Reply<ReinitResponse> {
    match session.reinit().await {
        Ok(device_count) => ok(ReinitResponse { device_count }),
        Err(err) => engine_error(&err),
    }
}

/// POST /api/demo/start - Start a builtin demo
///
/// Accepts JSON: `{"pattern": 1}`
async fn start_demo(
    State(session): State<Arc<ChainSession>>,
    body: Bytes,
) -> Reply<DemoResponse> {
    let Ok(request) = serde_json::from_slice::<DemoRequest>(&body) else {
        return bad_request("Invalid demo request");
    };
    match session.start_demo(request.pattern) {
        Ok(handle) => ok(DemoResponse {
            run: handle.id(),
            pattern: handle.name().to_string(),
        }),
        Err(err) => demo_error(&err),
    }
}

/// POST /api/demo/cancel - Cancel the running demo
async fn cancel_demo(State(session): State<Arc<ChainSession>>) -> Json<ApiResponse<CancelResponse>> {
    Json(ApiResponse::ok(CancelResponse {
        cancelled: session.cancel_demo(),
    }))
}

/// GET /api/log?limit=N - Recent events
async fn get_log(
    State(session): State<Arc<ChainSession>>,
    Query(query): Query<LogQuery>,
) -> Json<ApiResponse<LogResponse>> {
    let events = session.recent(query.limit.unwrap_or(100));
    Json(ApiResponse::ok(LogResponse { events }))
}

/// Fallback handler for 404
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::err("Not found")),
    )
}

// ============================================================================
// Server Builder
// ============================================================================

/// Configuration for the web server
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Address to bind to
    pub addr: SocketAddr,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self::from_config(&WebConfig::default())
    }
}

impl WebServerConfig {
    /// Create a new config with the given address
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set whether CORS should be permissive
    pub fn cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Create from shared WebConfig
    pub fn from_config(config: &WebConfig) -> Self {
        Self {
            addr: ([0, 0, 0, 0], config.port).into(),
            cors_permissive: config.cors_permissive,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router(session: Arc<ChainSession>, config: &WebServerConfig) -> Router {
    let mut router = Router::new()
        .route("/api/state", get(get_state))
        .route("/api/command", post(submit_command))
        .route("/api/reinit", post(reinit))
        .route("/api/demo/start", post(start_demo))
        .route("/api/demo/cancel", post(cancel_demo))
        .route("/api/log", get(get_log))
        .fallback(not_found)
        .with_state(session);

    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Serve the HTTP shell until the server fails.
pub async fn run_server(
    session: Arc<ChainSession>,
    config: WebServerConfig,
) -> Result<(), std::io::Error> {
    let router = build_router(session, &config);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "web server listening");

    axum::serve(listener, router).await
}
