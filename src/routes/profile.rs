// Profile routes
// Endpoints: GET/PATCH /v1/profile, PUT/DELETE /v1/profile/avatar,
//            GET /v1/profile/rank, GET /v1/profile/completions

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::HeaderMap,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::upload_from;
use crate::auth::SignedIn;
use crate::error::AppResult;
use crate::models::{QuestCompletion, UploadedObject, UserProfile};
use crate::stores::auth::{avatar_key, MAX_AVATAR_BYTES};
use crate::AppState;

/// Room above the avatar size rule so oversized files reach its validation message
const AVATAR_BODY_LIMIT: usize = 2 * MAX_AVATAR_BYTES;

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub username: String,
    /// Omitted keeps the current avatar
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub file_name: Option<String>,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    /// Localised status tier
    pub status: &'static str,
}

impl From<UserProfile> for ProfileResponse {
    fn from(profile: UserProfile) -> Self {
        let status = profile.status().label();
        Self { profile, status }
    }
}

/// GET /v1/profile
async fn get_profile(SignedIn(profile): SignedIn) -> Json<ProfileResponse> {
    Json(profile.into())
}

/// PATCH /v1/profile
async fn update_profile(
    State(state): State<AppState>,
    SignedIn(profile): SignedIn,
    Json(request): Json<UpdateProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    tracing::info!("Updating profile {} -> {}", profile.id, request.username);
    let avatar_url = request.avatar_url.or(profile.avatar_url);
    let updated = state
        .auth
        .update_user_profile(&request.username, avatar_url.as_deref())
        .await?;
    Ok(Json(updated.into()))
}

/// PUT /v1/profile/avatar - raw image body
async fn upload_avatar(
    State(state): State<AppState>,
    SignedIn(profile): SignedIn,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UploadedObject>> {
    tracing::info!("Uploading avatar for {} ({} bytes)", profile.id, body.len());
    let file = upload_from(&headers, query.file_name, body.to_vec());
    let public_url = state.auth.upload_avatar(file).await?;
    Ok(Json(UploadedObject {
        key: avatar_key(&public_url).unwrap_or_default(),
        public_url,
    }))
}

/// DELETE /v1/profile/avatar
async fn delete_avatar(State(state): State<AppState>, SignedIn(profile): SignedIn) -> AppResult<Json<Value>> {
    tracing::info!("Removing avatar for {}", profile.id);
    state.auth.delete_avatar().await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /v1/profile/rank
async fn get_rank(State(state): State<AppState>, _user: SignedIn) -> AppResult<Json<Value>> {
    let rank = state.auth.fetch_rank().await?;
    Ok(Json(json!({ "rank": rank })))
}

/// GET /v1/profile/completions - newest first
async fn get_completions(State(state): State<AppState>, _user: SignedIn) -> AppResult<Json<Vec<QuestCompletion>>> {
    Ok(Json(state.auth.fetch_completions().await?))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/profile", get(get_profile).patch(update_profile))
        .route(
            "/v1/profile/avatar",
            put(upload_avatar)
                .layer(DefaultBodyLimit::max(AVATAR_BODY_LIMIT))
                .delete(delete_avatar),
        )
        .route("/v1/profile/rank", get(get_rank))
        .route("/v1/profile/completions", get(get_completions))
}
