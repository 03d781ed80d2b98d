// Auth routes
// Endpoints: POST /v1/auth/sign-in, /v1/auth/sign-up, /v1/auth/sign-out; GET /v1/auth/me

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::models::UserProfile;
use crate::stores::AuthSnapshot;
use crate::AppState;

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

/// POST /v1/auth/sign-in
async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> AppResult<Json<Option<UserProfile>>> {
    tracing::info!("Sign in for {}", request.email);
    let profile = state.auth.sign_in(&request.email, &request.password).await?;
    state.quests.clear_run();
    Ok(Json(profile))
}

/// POST /v1/auth/sign-up
async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<SignUpRequest>,
) -> AppResult<Json<Option<UserProfile>>> {
    tracing::info!("Sign up for {} as {}", request.email, request.username);
    let profile = state
        .auth
        .sign_up(&request.email, &request.password, &request.username)
        .await?;
    state.quests.clear_run();
    Ok(Json(profile))
}

/// POST /v1/auth/sign-out
async fn sign_out(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.auth.sign_out().await?;
    state.quests.clear_run();
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /v1/auth/me - current auth state, including the last error
async fn me(State(state): State<AppState>) -> Json<AuthSnapshot> {
    Json(state.auth.snapshot())
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/sign-in", post(sign_in))
        .route("/v1/auth/sign-up", post(sign_up))
        .route("/v1/auth/sign-out", post(sign_out))
        .route("/v1/auth/me", get(me))
}
