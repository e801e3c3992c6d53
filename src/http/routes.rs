//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::session::SessionStatus;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sessions/:id", get(session_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS for the comma separated origins in CLIENT_ORIGIN; any origin when unset
fn cors_layer(client_origin: &str) -> CorsLayer {
    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .filter(|v| !v.is_empty())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(allowed_origins)
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
    games_in_progress: usize,
    connected_clients: usize,
    connected_bots: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: state.sessions.active_sessions(),
        games_in_progress: state.sessions.games_in_progress(),
        connected_clients: state.lobby.connected_clients(),
        connected_bots: state.lobby.connected_bots(),
    })
}

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Serialize)]
struct SessionsResponse {
    current: Uuid,
    sessions: Vec<SessionStatus>,
}

async fn sessions_handler(State(state): State<AppState>) -> Json<SessionsResponse> {
    let mut sessions = state.sessions.statuses();
    sessions.sort_by_key(|s| s.id);

    Json(SessionsResponse {
        current: state.lobby.current_session().id,
        sessions,
    })
}

async fn session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatus>, AppError> {
    state
        .sessions
        .get(&id)
        .map(|handle| Json(handle.status()))
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
