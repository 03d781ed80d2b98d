// Boundary to the hosted data service: auth, tables, rpc and object storage

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{
    AuthUser, LeaderboardPeriod, LeaderboardRow, LeaderboardSort, NewProfile, ProfilePatch, Quest,
    QuestCompletion, QuestProgress, Session, Task, UploadFile, UserProfile,
};

/// Table names
pub const PROFILES_TABLE: &str = "profiles";
pub const QUESTS_TABLE: &str = "quests";
pub const TASKS_TABLE: &str = "tasks";
pub const QUEST_PROGRESS_TABLE: &str = "quest_progress";
pub const QUEST_COMPLETIONS_TABLE: &str = "quest_completions";

/// Remote procedures
pub const RPC_INCREMENT_USER_POINTS: &str = "increment_user_points";
pub const RPC_GET_USER_RANK: &str = "get_user_rank";
pub const RPC_GET_LEADERBOARD: &str = "get_leaderboard";
pub const RPC_UPDATE_USER_PROFILE: &str = "update_user_profile";

#[async_trait]
pub trait DataService: Send + Sync {
    // --- auth ---------------------------------------------------------------

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session>;

    /// Returns the created account when the service reports one
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> AppResult<Option<AuthUser>>;

    async fn sign_out(&self) -> AppResult<()>;

    /// Ask the auth service who the session belongs to
    async fn current_user(&self) -> AppResult<Option<AuthUser>>;

    /// Locally cached session user; never contacts the service
    fn session_user(&self) -> Option<AuthUser>;

    // --- profiles -----------------------------------------------------------

    async fn get_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>>;

    async fn insert_profile(&self, profile: &NewProfile) -> AppResult<UserProfile>;

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> AppResult<()>;

    async fn rpc_update_user_profile(&self, username: &str, avatar_url: Option<&str>) -> AppResult<()>;

    async fn get_user_rank(&self, user_id: &str) -> AppResult<i64>;

    async fn increment_user_points(&self, user_id: &str, points: i64) -> AppResult<()>;

    // --- quests -------------------------------------------------------------

    /// Quest rows without tasks
    async fn list_quests(&self) -> AppResult<Vec<Quest>>;

    async fn get_quest(&self, quest_id: &str) -> AppResult<Option<Quest>>;

    /// Tasks ordered by `order` ascending
    async fn list_tasks(&self, quest_id: &str) -> AppResult<Vec<Task>>;

    // --- progress -----------------------------------------------------------

    async fn get_progress(&self, user_id: &str, quest_id: &str) -> AppResult<Option<QuestProgress>>;

    async fn upsert_progress(&self, progress: &QuestProgress) -> AppResult<()>;

    /// Replace the stored record only if it is still at `expected_revision`.
    /// Fails with `AppError::StaleProgress` otherwise.
    async fn update_progress(&self, progress: &QuestProgress, expected_revision: i64) -> AppResult<()>;

    async fn delete_progress(&self, user_id: &str, quest_id: &str) -> AppResult<()>;

    // --- completions --------------------------------------------------------

    async fn insert_completion(&self, completion: &QuestCompletion) -> AppResult<QuestCompletion>;

    /// Newest first
    async fn list_completions(&self, user_id: &str) -> AppResult<Vec<QuestCompletion>>;

    // --- leaderboard --------------------------------------------------------

    async fn get_leaderboard(
        &self,
        period: LeaderboardPeriod,
        sort_by: LeaderboardSort,
    ) -> AppResult<Vec<LeaderboardRow>>;

    // --- storage ------------------------------------------------------------

    async fn upload_object(&self, bucket: &str, key: &str, file: &UploadFile, upsert: bool) -> AppResult<()>;

    fn public_url(&self, bucket: &str, key: &str) -> String;

    async fn remove_object(&self, bucket: &str, key: &str) -> AppResult<()>;
}
