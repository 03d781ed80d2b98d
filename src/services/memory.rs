// In-process data service: used when no remote service is configured, and by tests

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

use super::data_service::DataService;
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthUser, Difficulty, GeoPoint, LeaderboardPeriod, LeaderboardRow, LeaderboardSort, NewProfile,
    ProfilePatch, Quest, QuestCompletion, QuestProgress, Session, Task, TaskKind, UploadFile,
    UserMetadata, UserProfile,
};

struct Account {
    password: String,
    user: AuthUser,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    session: Option<AuthUser>,
    provision_profiles: bool,
    profiles: HashMap<String, UserProfile>,
    quests: Vec<Quest>,
    progress: HashMap<(String, String), QuestProgress>,
    completions: Vec<QuestCompletion>,
    objects: HashMap<String, UploadFile>,
    /// Profile reads that report "no row" before the real row shows up
    profile_misses: u32,
    failing: HashSet<String>,
    calls: Vec<String>,
}

pub struct MemoryService {
    state: Arc<RwLock<MemoryState>>,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                provision_profiles: true,
                ..MemoryState::default()
            })),
        }
    }

    /// Service preloaded with a sample quest, for running without a backend
    pub fn with_demo_data() -> Self {
        let service = Self::new();
        service.add_quest(demo_quest());
        service
    }

    fn lock(&self) -> AppResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| AppError::Remote(format!("memory store poisoned: {}", e)))
    }

    /// Record the call and apply any injected failure
    fn enter(&self, op: &str) -> AppResult<RwLockWriteGuard<'_, MemoryState>> {
        let mut state = self.lock()?;
        state.calls.push(op.to_string());
        if state.failing.contains(op) {
            warn!("Injected failure for {}", op);
            return Err(AppError::Remote(format!("{} failed", op)));
        }
        debug!("memory: {}", op);
        Ok(state)
    }

    // --- setup and inspection ----------------------------------------------

    /// Register an account; returns its user id
    pub fn add_account(&self, email: &str, password: &str, username: &str) -> String {
        let Ok(mut state) = self.lock() else {
            return String::new();
        };
        let user = new_auth_user(email, username);
        let id = user.id.clone();
        if state.provision_profiles {
            let profile = provisioned_profile(&user);
            state.profiles.insert(id.clone(), profile);
        }
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user,
            },
        );
        id
    }

    pub fn add_quest(&self, quest: Quest) {
        if let Ok(mut state) = self.lock() {
            state.quests.push(quest);
        }
    }

    pub fn add_profile(&self, profile: UserProfile) {
        if let Ok(mut state) = self.lock() {
            state.profiles.insert(profile.id.clone(), profile);
        }
    }

    /// Whether sign-up creates the profile row, like a backend trigger would
    pub fn set_profile_provisioning(&self, enabled: bool) {
        if let Ok(mut state) = self.lock() {
            state.provision_profiles = enabled;
        }
    }

    pub fn miss_profile_reads(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.profile_misses = count;
        }
    }

    /// Make every call to `op` fail until `recover` is called
    pub fn fail(&self, op: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing.insert(op.to_string());
        }
    }

    pub fn recover(&self, op: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing.remove(op);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == op).count()
    }

    pub fn stored_progress(&self, user_id: &str, quest_id: &str) -> Option<QuestProgress> {
        self.lock()
            .ok()
            .and_then(|s| s.progress.get(&(user_id.to_string(), quest_id.to_string())).cloned())
    }

    /// Overwrite a progress row directly, as another client would
    pub fn put_progress(&self, progress: QuestProgress) {
        if let Ok(mut state) = self.lock() {
            state
                .progress
                .insert((progress.user_id.clone(), progress.quest_id.clone()), progress);
        }
    }

    pub fn stored_completions(&self) -> Vec<QuestCompletion> {
        self.lock().map(|s| s.completions.clone()).unwrap_or_default()
    }

    pub fn stored_profile(&self, user_id: &str) -> Option<UserProfile> {
        self.lock().ok().and_then(|s| s.profiles.get(user_id).cloned())
    }

    pub fn stored_object(&self, bucket: &str, key: &str) -> Option<UploadFile> {
        self.lock()
            .ok()
            .and_then(|s| s.objects.get(&format!("{}/{}", bucket, key)).cloned())
    }

    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

fn new_auth_user(email: &str, username: &str) -> AuthUser {
    AuthUser {
        id: uuid::Uuid::new_v4().to_string(),
        email: Some(email.to_string()),
        user_metadata: UserMetadata {
            username: Some(username.to_string()),
        },
    }
}

fn provisioned_profile(user: &AuthUser) -> UserProfile {
    let fallback = NewProfile::fallback_for(user);
    UserProfile {
        id: fallback.id,
        username: fallback.username,
        email: fallback.email,
        avatar_url: None,
        points: 0,
        rank: 0,
        status_level: "novice".to_string(),
        created_at: Some(Utc::now()),
    }
}

fn leaderboard_rows(state: &MemoryState, period: LeaderboardPeriod, sort_by: LeaderboardSort) -> Vec<LeaderboardRow> {
    let since = match period {
        LeaderboardPeriod::AllTime => None,
        LeaderboardPeriod::Monthly => Some(Utc::now() - Duration::days(30)),
        LeaderboardPeriod::Weekly => Some(Utc::now() - Duration::days(7)),
        LeaderboardPeriod::Daily => Some(Utc::now() - Duration::days(1)),
    };

    let mut rows: Vec<LeaderboardRow> = state
        .profiles
        .values()
        .map(|profile| {
            let completions: Vec<&QuestCompletion> = state
                .completions
                .iter()
                .filter(|c| c.user_id == profile.id)
                .filter(|c| since.map_or(true, |s| c.completed_at >= s))
                .collect();

            let points = match since {
                None => profile.points,
                Some(_) => completions.iter().map(|c| c.points_earned).sum(),
            };

            LeaderboardRow {
                user_id: profile.id.clone(),
                username: profile.username.clone(),
                avatar_url: profile.avatar_url.clone(),
                points,
                quests_completed: completions.len() as i64,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        let key = |r: &LeaderboardRow| match sort_by {
            LeaderboardSort::Points => r.points,
            LeaderboardSort::QuestsCompleted => r.quests_completed,
        };
        key(b).cmp(&key(a)).then_with(|| a.username.cmp(&b.username))
    });
    rows
}

#[async_trait]
impl DataService for MemoryService {
    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session> {
        let mut state = self.enter("sign_in")?;
        let user = match state.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(AppError::Auth("Invalid login credentials".to_string())),
        };
        state.session = Some(user.clone());

        Ok(Session {
            access_token: format!("memory-{}", uuid::Uuid::new_v4()),
            refresh_token: uuid::Uuid::new_v4().to_string(),
            expires_at: Utc::now().timestamp() + 3600,
            user,
        })
    }

    async fn sign_up(&self, email: &str, password: &str, username: &str) -> AppResult<Option<AuthUser>> {
        let mut state = self.enter("sign_up")?;
        if state.accounts.contains_key(email) {
            return Err(AppError::Auth(
                "User already registered (user_already_exists)".to_string(),
            ));
        }

        let user = new_auth_user(email, username);
        if state.provision_profiles {
            let profile = provisioned_profile(&user);
            state.profiles.insert(user.id.clone(), profile);
        }
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        Ok(Some(user))
    }

    async fn sign_out(&self) -> AppResult<()> {
        let mut state = self.enter("sign_out")?;
        state.session = None;
        Ok(())
    }

    async fn current_user(&self) -> AppResult<Option<AuthUser>> {
        let state = self.enter("current_user")?;
        Ok(state.session.clone())
    }

    fn session_user(&self) -> Option<AuthUser> {
        self.lock().ok().and_then(|s| s.session.clone())
    }

    async fn get_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        let mut state = self.enter("get_profile")?;
        if state.profile_misses > 0 {
            state.profile_misses -= 1;
            return Ok(None);
        }
        Ok(state.profiles.get(user_id).cloned())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> AppResult<UserProfile> {
        let mut state = self.enter("insert_profile")?;
        if state.profiles.contains_key(&profile.id) {
            return Err(AppError::Remote(
                "duplicate key value violates unique constraint \"profiles_pkey\"".to_string(),
            ));
        }

        let created = UserProfile {
            id: profile.id.clone(),
            username: profile.username.clone(),
            email: profile.email.clone(),
            avatar_url: None,
            points: profile.points,
            rank: profile.rank,
            status_level: profile.status_level.clone(),
            created_at: Some(Utc::now()),
        };
        state.profiles.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> AppResult<()> {
        let mut state = self.enter("update_profile")?;
        let profile = state
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound("Profile".to_string()))?;
        patch.apply(profile);
        Ok(())
    }

    async fn rpc_update_user_profile(&self, username: &str, avatar_url: Option<&str>) -> AppResult<()> {
        let mut state = self.enter("update_user_profile")?;
        let user_id = state
            .session
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or_else(|| AppError::Auth("Not authenticated".to_string()))?;
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound("Profile".to_string()))?;
        profile.username = username.to_string();
        profile.avatar_url = avatar_url.map(|s| s.to_string());
        Ok(())
    }

    async fn get_user_rank(&self, user_id: &str) -> AppResult<i64> {
        let state = self.enter("get_user_rank")?;
        let mut profiles: Vec<&UserProfile> = state.profiles.values().collect();
        profiles.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.username.cmp(&b.username)));
        profiles
            .iter()
            .position(|p| p.id == user_id)
            .map(|i| i as i64 + 1)
            .ok_or_else(|| AppError::NotFound("Profile".to_string()))
    }

    async fn increment_user_points(&self, user_id: &str, points: i64) -> AppResult<()> {
        let mut state = self.enter("increment_user_points")?;
        let profile = state
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound("Profile".to_string()))?;
        profile.points += points;
        Ok(())
    }

    async fn list_quests(&self) -> AppResult<Vec<Quest>> {
        let state = self.enter("list_quests")?;
        Ok(state
            .quests
            .iter()
            .map(|q| Quest {
                tasks: Vec::new(),
                ..q.clone()
            })
            .collect())
    }

    async fn get_quest(&self, quest_id: &str) -> AppResult<Option<Quest>> {
        let state = self.enter("get_quest")?;
        Ok(state.quests.iter().find(|q| q.id == quest_id).map(|q| Quest {
            tasks: Vec::new(),
            ..q.clone()
        }))
    }

    async fn list_tasks(&self, quest_id: &str) -> AppResult<Vec<Task>> {
        let state = self.enter("list_tasks")?;
        let mut tasks: Vec<Task> = state
            .quests
            .iter()
            .filter(|q| q.id == quest_id)
            .flat_map(|q| q.tasks.iter().cloned())
            .collect();
        tasks.sort_by_key(|t| t.order);
        Ok(tasks)
    }

    async fn get_progress(&self, user_id: &str, quest_id: &str) -> AppResult<Option<QuestProgress>> {
        let state = self.enter("get_progress")?;
        Ok(state
            .progress
            .get(&(user_id.to_string(), quest_id.to_string()))
            .cloned())
    }

    async fn upsert_progress(&self, progress: &QuestProgress) -> AppResult<()> {
        let mut state = self.enter("upsert_progress")?;
        state.progress.insert(
            (progress.user_id.clone(), progress.quest_id.clone()),
            progress.clone(),
        );
        Ok(())
    }

    async fn update_progress(&self, progress: &QuestProgress, expected_revision: i64) -> AppResult<()> {
        let mut state = self.enter("update_progress")?;
        let key = (progress.user_id.clone(), progress.quest_id.clone());
        let stored_revision = state.progress.get(&key).map(|p| p.revision);
        if stored_revision != Some(expected_revision) {
            return Err(AppError::StaleProgress);
        }
        state.progress.insert(key, progress.clone());
        Ok(())
    }

    async fn delete_progress(&self, user_id: &str, quest_id: &str) -> AppResult<()> {
        let mut state = self.enter("delete_progress")?;
        state
            .progress
            .remove(&(user_id.to_string(), quest_id.to_string()));
        Ok(())
    }

    async fn insert_completion(&self, completion: &QuestCompletion) -> AppResult<QuestCompletion> {
        let mut state = self.enter("insert_completion")?;
        let saved = QuestCompletion {
            id: Some(uuid::Uuid::new_v4().to_string()),
            ..completion.clone()
        };
        state.completions.push(saved.clone());
        Ok(saved)
    }

    async fn list_completions(&self, user_id: &str) -> AppResult<Vec<QuestCompletion>> {
        let state = self.enter("list_completions")?;
        let mut completions: Vec<QuestCompletion> = state
            .completions
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        completions.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(completions)
    }

    async fn get_leaderboard(
        &self,
        period: LeaderboardPeriod,
        sort_by: LeaderboardSort,
    ) -> AppResult<Vec<LeaderboardRow>> {
        let state = self.enter("get_leaderboard")?;
        Ok(leaderboard_rows(&state, period, sort_by))
    }

    async fn upload_object(&self, bucket: &str, key: &str, file: &UploadFile, upsert: bool) -> AppResult<()> {
        let mut state = self.enter("upload_object")?;
        let path = format!("{}/{}", bucket, key);
        if !upsert && state.objects.contains_key(&path) {
            return Err(AppError::Remote("The resource already exists".to_string()));
        }
        state.objects.insert(path, file.clone());
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("memory://storage/{}/{}", bucket, key)
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> AppResult<()> {
        let mut state = self.enter("remove_object")?;
        state.objects.remove(&format!("{}/{}", bucket, key));
        Ok(())
    }
}

fn demo_quest() -> Quest {
    let task = |id: &str, title: &str, kind: TaskKind, points: i64, order: i64| Task {
        id: id.to_string(),
        quest_id: "demo-center".to_string(),
        title: title.to_string(),
        description: String::new(),
        kind,
        location: GeoPoint {
            latitude: 56.8380,
            longitude: 60.5975,
            radius: 75.0,
        },
        options: None,
        correct_answer: None,
        partner_id: None,
        points,
        order,
    };

    let mut question = task(
        "demo-center-1",
        "Где стоит памятник Ленину?",
        TaskKind::MultipleChoice,
        20,
        0,
    );
    question.options = Some(vec![
        "Lenin Square".to_string(),
        "Labor Square".to_string(),
        "1905 Square".to_string(),
    ]);
    question.correct_answer = Some("1905 Square".to_string());

    let mut visit = task("demo-center-4", "Кофе у партнёра", TaskKind::PartnerVisit, 15, 3);
    visit.partner_id = Some("demo-partner".to_string());

    Quest {
        id: "demo-center".to_string(),
        title: "Исторический центр".to_string(),
        description: "Прогулка по главным площадям города".to_string(),
        difficulty: Difficulty::Easy,
        estimated_time: 60,
        points_reward: 75,
        tasks: vec![
            question,
            task("demo-center-2", "Фото у плотинки", TaskKind::PhotoSubmission, 25, 1),
            task("demo-center-3", "Отметьтесь у театра", TaskKind::LocationCheckIn, 15, 2),
            visit,
        ],
        created_at: None,
        created_by: None,
    }
}
