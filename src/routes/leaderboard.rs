// Leaderboard routes
// Endpoint: GET /v1/leaderboard?period=&sort_by=

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::models::{LeaderboardPeriod, LeaderboardSort};
use crate::stores::LeaderboardSnapshot;
use crate::AppState;

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    /// all-time, monthly, weekly or daily; omitted keeps the current one
    pub period: Option<LeaderboardPeriod>,
    /// points or quests_completed
    pub sort_by: Option<LeaderboardSort>,
}

/// GET /v1/leaderboard
async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> AppResult<Json<LeaderboardSnapshot>> {
    state.leaderboard.select(query.period, query.sort_by).await?;
    Ok(Json(state.leaderboard.snapshot()))
}

pub fn leaderboard_routes() -> Router<AppState> {
    Router::new().route("/v1/leaderboard", get(get_leaderboard))
}
