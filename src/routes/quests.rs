// Quest routes
// Endpoints: GET /v1/quests, GET /v1/quests/{id}, POST /v1/quests/{id}/start,
//            task answers under /v1/quests/{id}/tasks/{task_id}/...,
//            POST /v1/quests/{id}/submit, DELETE /v1/quests/{id}/progress

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::upload_from;
use crate::auth::SignedIn;
use crate::error::AppResult;
use crate::models::{Quest, QuestCompletion, QuestRun, TaskAnswer};
use crate::AppState;

/// Largest task photo the shell buffers; the photo task itself has no size rule
pub const PHOTO_BODY_LIMIT: usize = 50 * 1024 * 1024;

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

#[derive(Deserialize)]
pub struct PhotoQuery {
    pub file_name: Option<String>,
}

#[derive(Serialize)]
pub struct QuestDetailResponse {
    pub quest: Quest,
    pub run: QuestRun,
}

/// Make `quest_id` the loaded quest unless it already is
async fn ensure_loaded(state: &AppState, quest_id: &str) -> AppResult<()> {
    if !state.quests.is_current(quest_id) {
        state.quests.fetch_quest_by_id(quest_id).await?;
    }
    Ok(())
}

/// GET /v1/quests
async fn list_quests(State(state): State<AppState>) -> AppResult<Json<Vec<Quest>>> {
    Ok(Json(state.quests.fetch_quests().await?))
}

/// GET /v1/quests/{id} - quest with tasks and the caller's run
async fn get_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<String>,
) -> AppResult<Json<QuestDetailResponse>> {
    let quest = state.quests.fetch_quest_by_id(&quest_id).await?;
    let run = state.quests.snapshot().run;
    Ok(Json(QuestDetailResponse { quest, run }))
}

/// POST /v1/quests/{id}/start
async fn start_quest(
    State(state): State<AppState>,
    SignedIn(profile): SignedIn,
    Path(quest_id): Path<String>,
) -> AppResult<Json<QuestRun>> {
    tracing::info!("Starting quest {} for {}", quest_id, profile.id);
    ensure_loaded(&state, &quest_id).await?;
    Ok(Json(state.quests.start_quest(&quest_id).await?))
}

async fn complete(state: &AppState, quest_id: &str, task_id: &str, answer: TaskAnswer) -> AppResult<Json<QuestRun>> {
    ensure_loaded(state, quest_id).await?;
    Ok(Json(state.quests.complete_task(task_id, answer).await?))
}

/// POST /v1/quests/{id}/tasks/{task_id}/answer
async fn answer_task(
    State(state): State<AppState>,
    _user: SignedIn,
    Path((quest_id, task_id)): Path<(String, String)>,
    Json(request): Json<AnswerRequest>,
) -> AppResult<Json<QuestRun>> {
    complete(&state, &quest_id, &task_id, TaskAnswer::Text(request.answer)).await
}

/// POST /v1/quests/{id}/tasks/{task_id}/check-in - location and partner tasks
async fn check_in(
    State(state): State<AppState>,
    _user: SignedIn,
    Path((quest_id, task_id)): Path<(String, String)>,
) -> AppResult<Json<QuestRun>> {
    complete(&state, &quest_id, &task_id, TaskAnswer::None).await
}

/// PUT /v1/quests/{id}/tasks/{task_id}/photo - raw image body
async fn submit_photo(
    State(state): State<AppState>,
    _user: SignedIn,
    Path((quest_id, task_id)): Path<(String, String)>,
    Query(query): Query<PhotoQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<QuestRun>> {
    let file = upload_from(&headers, query.file_name, body.to_vec());
    complete(&state, &quest_id, &task_id, TaskAnswer::Photo(file)).await
}

/// POST /v1/quests/{id}/submit
async fn submit_quest(
    State(state): State<AppState>,
    SignedIn(profile): SignedIn,
    Path(quest_id): Path<String>,
) -> AppResult<Json<QuestCompletion>> {
    ensure_loaded(&state, &quest_id).await?;
    let completion = state.quests.submit_quest().await?;

    // new point balance
    if let Err(e) = state.auth.refresh_profile().await {
        tracing::warn!("Failed to refresh profile {} after submit: {}", profile.id, e);
    }
    Ok(Json(completion))
}

/// DELETE /v1/quests/{id}/progress
async fn reset_progress(
    State(state): State<AppState>,
    _user: SignedIn,
    Path(quest_id): Path<String>,
) -> AppResult<Json<QuestRun>> {
    ensure_loaded(&state, &quest_id).await?;
    state.quests.reset_quest_progress().await?;
    Ok(Json(state.quests.snapshot().run))
}

pub fn quests_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/quests", get(list_quests))
        .route("/v1/quests/:id", get(get_quest))
        .route("/v1/quests/:id/start", post(start_quest))
        .route("/v1/quests/:id/tasks/:task_id/answer", post(answer_task))
        .route("/v1/quests/:id/tasks/:task_id/check-in", post(check_in))
        .route(
            "/v1/quests/:id/tasks/:task_id/photo",
            put(submit_photo).layer(DefaultBodyLimit::max(PHOTO_BODY_LIMIT)),
        )
        .route("/v1/quests/:id/submit", post(submit_quest))
        .route("/v1/quests/:id/progress", delete(reset_progress))
}
