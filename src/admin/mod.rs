//! The admin HTTP surface: GET/PUT for the three Store artifacts, GET for
//! stats, and a server-rendered shell for the static UI. Grounded on the
//! pack's agent-gateway `api::router`/`IntoResponse` layout, generalized from
//! a single `AppState` sharing a memory backend to one sharing the pipeline's
//! [`Store`] and run lock.

use crate::error::AppError;
use crate::lock;
use crate::rules::LuaRuleSet;
use crate::stats;
use crate::store::Store;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, put};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn Store>,
    pub lock_path: PathBuf,
    pub state_directory: PathBuf,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(shell))
        .route("/ui", get(shell))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/state", get(get_state).put(put_state))
        .route("/api/error-template", get(get_error_template).put(put_error_template))
        .route("/api/stats", get(get_stats))
        .fallback(not_found)
        .with_state(state)
}

async fn shell() -> Html<&'static str> {
    Html("<!doctype html><html><head><title>tgfeed admin</title></head><body><div id=\"app\"></div></body></html>")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" })))
}

fn ensure_unlocked(state: &AdminState) -> Result<(), AppError> {
    if lock::is_locked(&state.lock_path) {
        return Err(AppError::AdminConflict);
    }
    Ok(())
}

async fn get_config(State(state): State<AdminState>) -> Result<String, AppError> {
    Ok(state.store.load_config().await?)
}

async fn put_config(State(state): State<AdminState>, body: String) -> Result<StatusCode, AppError> {
    ensure_unlocked(&state)?;
    LuaRuleSet::load(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    state.store.save_config(&body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_state(State(state): State<AdminState>) -> Result<impl IntoResponse, AppError> {
    let map = state.store.load_state().await?;
    Ok(Json(map))
}

async fn put_state(State(state): State<AdminState>, body: String) -> Result<StatusCode, AppError> {
    ensure_unlocked(&state)?;
    let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if let serde_json::Value::Object(map) = &parsed {
        if map.values().any(|v| v.is_null()) {
            return Err(AppError::BadRequest("state entries may not be null".to_string()));
        }
    }
    state.store.save_state_json(&body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_error_template(State(state): State<AdminState>) -> Result<String, AppError> {
    Ok(state.store.load_error_template().await?)
}

async fn put_error_template(State(state): State<AdminState>, body: String) -> Result<StatusCode, AppError> {
    ensure_unlocked(&state)?;
    state.store.save_error_template(&body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_stats(State(state): State<AdminState>) -> Result<impl IntoResponse, AppError> {
    let recent = stats::load_recent(&state.state_directory).map_err(|e| AppError::Other(e.into()))?;
    Ok(Json(recent))
}
