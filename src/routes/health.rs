// Health routes

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Value> {
    let backend = if state.config.has_remote() { "supabase" } else { "memory" };
    Json(json!({ "status": "ok", "backend": backend }))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
