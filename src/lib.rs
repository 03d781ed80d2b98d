// City quest backend
// Session stores over a backend-as-a-service, served through a small HTTP shell

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod stores;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::{auth_routes, health_routes, leaderboard_routes, profile_routes, quests_routes};
use services::DataService;
use stores::{AuthStore, LeaderboardStore, QuestStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthStore>,
    pub quests: Arc<QuestStore>,
    pub leaderboard: Arc<LeaderboardStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(data: Arc<dyn DataService>, config: Config) -> Self {
        Self {
            auth: Arc::new(AuthStore::new(data.clone(), &config.avatar_bucket)),
            quests: Arc::new(QuestStore::new(data.clone(), &config.photo_bucket)),
            leaderboard: Arc::new(LeaderboardStore::new(data)),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health_routes())
        .merge(auth_routes())
        .merge(profile_routes())
        .merge(quests_routes())
        .merge(leaderboard_routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
