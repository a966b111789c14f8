//! Health and status endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::AppState;

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
    pub active_transcriptions: usize,
    /// Seconds since server start
    pub uptime: u64,
    pub timestamp: i64,
}

/// Human-oriented status response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub message: String,
    pub active_sessions: usize,
    pub tts_available: bool,
}

/// One live session as reported by `GET /sessions`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub user_id: String,
    pub is_processing: bool,
    pub has_transcription: bool,
    /// Milliseconds since session creation
    pub duration: i64,
    pub language_code: String,
}

/// Serve the embedded client page
async fn index() -> Html<&'static str> {
    Html(include_str!("../../assets/index.html"))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.registry.active_sessions().await,
        active_transcriptions: state.registry.active_transcriptions().await,
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Parley gateway is running".to_string(),
        active_sessions: state.registry.active_sessions().await,
        tts_available: state.is_tts_available(),
    })
}

async fn sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    let now = chrono::Utc::now().timestamp_millis();
    let sessions = state
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|info| SessionSummary {
            id: info.id.clone(),
            user_id: info.user_id.clone(),
            is_processing: info.is_processing(),
            has_transcription: info.is_transcribing(),
            duration: now - info.created_at,
            language_code: info.language.clone(),
        })
        .collect();
    Json(sessions)
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health-check", get(health))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/sessions", get(sessions))
        .with_state(state)
}
