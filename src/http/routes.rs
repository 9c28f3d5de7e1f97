//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::game::UserId;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/lobbies/:lobby_id", get(lobby_summary_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
    connections: usize,
    voice_rooms: usize,
    pending_persistence_jobs: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.registry.active_matches(),
        active_players: state.registry.total_players(),
        connections: state.fabric.connection_count(),
        voice_rooms: state.voice.room_count(),
        pending_persistence_jobs: state.persistence.pending(),
    })
}

// ============================================================================
// Match summary
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchSummary {
    lobby_id: String,
    phase: &'static str,
    concluded: bool,
    winner_id: Option<UserId>,
    players: Vec<PlayerSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSummary {
    user_id: UserId,
    username: String,
    kills: u32,
    deaths: u32,
}

async fn lobby_summary_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
) -> Result<Json<MatchSummary>, AppError> {
    let handle = state
        .registry
        .get(&lobby_id)
        .ok_or_else(|| AppError::NotFound(format!("No live match for lobby {}", lobby_id)))?;

    let summary = handle.update(|m| MatchSummary {
        lobby_id: m.lobby_id.clone(),
        phase: m.phase.as_str(),
        concluded: m.is_concluded(),
        winner_id: m.winner_id,
        players: m
            .players
            .values()
            .map(|p| PlayerSummary {
                user_id: p.user_id,
                username: p.username.clone(),
                kills: p.kills,
                deaths: p.deaths,
            })
            .collect(),
    });

    Ok(Json(summary))
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
