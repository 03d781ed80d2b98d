// Auth / profile store
// Holds the signed-in user's profile; handles sign-in/up/out, profile edits and avatars

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;

use super::{Observable, ViewState};
use crate::error::{AppError, AppResult};
use crate::models::{NewProfile, ProfilePatch, QuestCompletion, UploadFile, UserProfile};
use crate::services::DataService;

/// Profile reads attempted before falling back to creating the row
pub const PROFILE_FETCH_ATTEMPTS: u32 = 5;
/// Pause between profile reads
pub const PROFILE_RETRY_DELAY: Duration = Duration::from_millis(800);
/// Wait after sign-up for the backend to provision the profile
pub const SIGN_UP_SETTLE_DELAY: Duration = Duration::from_millis(1500);
pub const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

const PROFILE_LOAD_FAILED: &str = "Failed to load or create user profile. Please try again.";

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthSnapshot {
    pub user: Option<UserProfile>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ViewState for AuthSnapshot {
    fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }
}

fn username_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Zа-яА-Я0-9_-]+$").expect("username pattern is valid")
    })
}

pub fn validate_username(username: &str) -> AppResult<()> {
    let len = username.chars().count();
    if !(2..=30).contains(&len) {
        return Err(AppError::Validation(
            "Имя пользователя должно содержать от 2 до 30 символов".to_string(),
        ));
    }
    if !username_pattern().is_match(username) {
        return Err(AppError::Validation(
            "Имя пользователя может содержать только буквы, цифры, дефис и подчеркивание".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_avatar(file: &UploadFile) -> AppResult<()> {
    if file.size() > MAX_AVATAR_BYTES {
        return Err(AppError::Validation(
            "Размер файла не должен превышать 2MB".to_string(),
        ));
    }
    if !file.content_type.starts_with("image/") {
        return Err(AppError::Validation(
            "Пожалуйста, загрузите изображение".to_string(),
        ));
    }
    Ok(())
}

/// Storage key of an avatar: the last two segments of its public URL
pub fn avatar_key(url: &str) -> Option<String> {
    let mut segments = url.rsplit('/');
    let file = segments.next().filter(|s| !s.is_empty())?;
    let owner = segments.next().filter(|s| !s.is_empty())?;
    Some(format!("{}/{}", owner, file))
}

pub struct AuthStore {
    data: Arc<dyn DataService>,
    avatar_bucket: String,
    view: Observable<AuthSnapshot>,
}

impl AuthStore {
    pub fn new(data: Arc<dyn DataService>, avatar_bucket: &str) -> Self {
        Self {
            data,
            avatar_bucket: avatar_bucket.to_string(),
            view: Observable::new(AuthSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.view.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.view.subscribe()
    }

    pub fn clear_error(&self) {
        self.view.update(|s| s.error = None);
    }

    fn signed_in(&self) -> AppResult<UserProfile> {
        self.view.snapshot().user.ok_or(AppError::NotAuthenticated)
    }

    fn merge(&self, patch: &ProfilePatch) {
        self.view.update(|s| {
            if let Some(user) = s.user.as_mut() {
                patch.apply(user);
            }
        });
    }

    // =========================================================================
    // SESSION
    // =========================================================================

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<Option<UserProfile>> {
        self.view.begin();
        if let Err(e) = self.data.sign_in(email, password).await {
            tracing::error!("Sign in error: {}", e);
            return self.view.finish(Err(e));
        }
        self.fetch_user_profile().await
    }

    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> AppResult<Option<UserProfile>> {
        self.view.begin();

        let result: AppResult<()> = async {
            validate_username(username)?;
            let created = self.data.sign_up(email, password, username).await?;

            tokio::time::sleep(SIGN_UP_SETTLE_DELAY).await;

            if created.is_some() {
                self.data.sign_in(email, password).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Sign up error: {}", e);
            return self.view.finish(Err(e));
        }
        self.fetch_user_profile().await
    }

    pub async fn sign_out(&self) -> AppResult<()> {
        self.view.begin();
        let result = self.data.sign_out().await;
        if result.is_ok() {
            self.view.update(|s| s.user = None);
        }
        self.view.finish(result)
    }

    // =========================================================================
    // PROFILE
    // =========================================================================

    /// Load the signed-in user's profile, waiting out backend provisioning
    pub async fn fetch_user_profile(&self) -> AppResult<Option<UserProfile>> {
        self.view.begin();
        let result = self.load_profile().await;
        let user = result.as_ref().ok().cloned().flatten();
        self.view.update(|s| s.user = user);
        self.view.finish(result)
    }

    async fn load_profile(&self) -> AppResult<Option<UserProfile>> {
        let Some(user) = self.data.current_user().await? else {
            return Ok(None);
        };

        let mut last_error: Option<AppError> = None;
        for attempt in 1..=PROFILE_FETCH_ATTEMPTS {
            match self.data.get_profile(&user.id).await {
                Ok(Some(profile)) => {
                    tracing::info!("Loaded profile {} on attempt {}", profile.username, attempt);
                    return Ok(Some(profile));
                }
                Ok(None) => tracing::debug!("Profile for {} not there yet (attempt {})", user.id, attempt),
                Err(e) => {
                    tracing::warn!("Profile fetch attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }

            if attempt < PROFILE_FETCH_ATTEMPTS {
                tokio::time::sleep(PROFILE_RETRY_DELAY).await;
            }
        }

        tracing::error!(
            "Failed to fetch profile for {} after {} attempts: {:?}",
            user.id,
            PROFILE_FETCH_ATTEMPTS,
            last_error
        );

        match self.data.insert_profile(&NewProfile::fallback_for(&user)).await {
            Ok(profile) => {
                tracing::info!("Created fallback profile {} for {}", profile.username, user.id);
                Ok(Some(profile))
            }
            Err(e) => {
                tracing::error!("Failed to create profile manually: {}", e);
                Err(AppError::Remote(PROFILE_LOAD_FAILED.to_string()))
            }
        }
    }

    /// Re-read the signed-in profile once. A failed read keeps the profile
    /// already held, so the session survives it.
    pub async fn refresh_profile(&self) -> AppResult<UserProfile> {
        self.view.begin();
        let result = async {
            let user = self.signed_in()?;
            let profile = self
                .data
                .get_profile(&user.id)
                .await?
                .ok_or_else(|| AppError::NotFound("Profile".to_string()))?;
            let fresh = profile.clone();
            self.view.update(|s| s.user = Some(fresh));
            Ok(profile)
        }
        .await;
        self.view.finish(result)
    }

    /// Rename and/or change the avatar through the profile rpc
    pub async fn update_user_profile(&self, username: &str, avatar_url: Option<&str>) -> AppResult<UserProfile> {
        self.view.begin();
        let result = self.apply_profile_update(username, avatar_url).await;
        self.view.finish(result)
    }

    async fn apply_profile_update(&self, username: &str, avatar_url: Option<&str>) -> AppResult<UserProfile> {
        let mut user = self.signed_in()?;
        validate_username(username)?;

        self.data.rpc_update_user_profile(username, avatar_url).await?;

        let patch = ProfilePatch {
            username: Some(username.to_string()),
            avatar_url: Some(avatar_url.map(|s| s.to_string())),
        };
        patch.apply(&mut user);
        self.merge(&patch);

        tracing::info!("Updated profile {}", user.id);
        Ok(user)
    }

    pub async fn upload_avatar(&self, file: UploadFile) -> AppResult<String> {
        self.view.begin();
        let result = self.store_avatar(&file).await;
        self.view.finish(result)
    }

    async fn store_avatar(&self, file: &UploadFile) -> AppResult<String> {
        let user = self.signed_in()?;
        validate_avatar(file)?;

        let key = format!(
            "{}/{}.{}",
            user.id,
            Utc::now().timestamp_millis(),
            file.extension()
        );
        self.data
            .upload_object(&self.avatar_bucket, &key, file, true)
            .await?;
        let url = self.data.public_url(&self.avatar_bucket, &key);

        let patch = ProfilePatch {
            username: None,
            avatar_url: Some(Some(url.clone())),
        };
        self.data.update_profile(&user.id, &patch).await?;
        self.merge(&patch);

        // the old object is only garbage now; losing it is not an error
        if let Some(old_key) = user.avatar_url.as_deref().and_then(avatar_key) {
            if old_key != key {
                if let Err(e) = self.data.remove_object(&self.avatar_bucket, &old_key).await {
                    tracing::warn!("Failed to remove old avatar {}: {}", old_key, e);
                }
            }
        }

        tracing::info!("Uploaded avatar for {}", user.id);
        Ok(url)
    }

    pub async fn delete_avatar(&self) -> AppResult<()> {
        self.view.begin();
        let result = self.remove_avatar().await;
        self.view.finish(result)
    }

    async fn remove_avatar(&self) -> AppResult<()> {
        let user = self.signed_in()?;
        let Some(url) = user.avatar_url.as_deref() else {
            return Ok(());
        };

        let key = avatar_key(url)
            .ok_or_else(|| AppError::Validation(format!("Unrecognised avatar URL: {}", url)))?;
        self.data.remove_object(&self.avatar_bucket, &key).await?;

        let patch = ProfilePatch {
            username: None,
            avatar_url: Some(None),
        };
        self.data.update_profile(&user.id, &patch).await?;
        self.merge(&patch);
        Ok(())
    }

    pub async fn fetch_rank(&self) -> AppResult<i64> {
        self.view.begin();
        let result = async {
            let user = self.signed_in()?;
            let rank = self.data.get_user_rank(&user.id).await?;
            self.view.update(|s| {
                if let Some(u) = s.user.as_mut() {
                    u.rank = rank;
                }
            });
            Ok(rank)
        }
        .await;
        self.view.finish(result)
    }

    /// Finished quests of the signed-in user, newest first
    pub async fn fetch_completions(&self) -> AppResult<Vec<QuestCompletion>> {
        self.view.begin();
        let result = async {
            let user = self.signed_in()?;
            self.data.list_completions(&user.id).await
        }
        .await;
        self.view.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryService;
    use tokio::time::Instant;

    fn store(memory: &Arc<MemoryService>) -> AuthStore {
        AuthStore::new(memory.clone(), "avatars")
    }

    fn png(len: usize) -> UploadFile {
        UploadFile::new("me.png", "image/png", vec![7; len])
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("walker_01").is_ok());
        assert!(validate_username("Путник-2").is_ok());
        assert!(validate_username("a").is_err());
        assert!(validate_username(&"x".repeat(31)).is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("semi;colon").is_err());
    }

    #[test]
    fn test_avatar_rules() {
        assert!(validate_avatar(&png(MAX_AVATAR_BYTES)).is_ok());
        assert!(validate_avatar(&png(MAX_AVATAR_BYTES + 1)).is_err());
        assert!(validate_avatar(&UploadFile::new("a.pdf", "application/pdf", vec![1])).is_err());
    }

    #[test]
    fn test_avatar_key() {
        assert_eq!(
            avatar_key("https://x.supabase.co/storage/v1/object/public/avatars/u1/17.png").as_deref(),
            Some("u1/17.png")
        );
        assert_eq!(avatar_key("17.png"), None);
        assert_eq!(avatar_key("https://x/u1/"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_found_on_fifth_attempt_skips_fallback() {
        let memory = Arc::new(MemoryService::new());
        memory.add_account("a@b.c", "secret", "walker");
        memory.miss_profile_reads(4);
        let auth = store(&memory);

        let started = Instant::now();
        let profile = auth.sign_in("a@b.c", "secret").await.unwrap().unwrap();

        assert_eq!(profile.username, "walker");
        assert_eq!(memory.call_count("get_profile"), 5);
        assert_eq!(memory.call_count("insert_profile"), 0);
        let waited = started.elapsed();
        assert!(waited >= PROFILE_RETRY_DELAY * 4, "waited {:?}", waited);
        assert!(waited < PROFILE_RETRY_DELAY * 5, "waited {:?}", waited);

        let snap = auth.snapshot();
        assert_eq!(snap.user, Some(profile));
        assert!(!snap.is_loading);
        assert!(snap.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_profile_falls_back_to_insert() {
        let memory = Arc::new(MemoryService::new());
        memory.set_profile_provisioning(false);
        let id = memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);

        let profile = auth.sign_in("a@b.c", "secret").await.unwrap().unwrap();

        assert_eq!(memory.call_count("get_profile"), PROFILE_FETCH_ATTEMPTS as usize);
        assert_eq!(memory.call_count("insert_profile"), 1);
        assert_eq!(profile.id, id);
        assert_eq!(profile.username, "walker");
        assert_eq!(profile.points, 0);
        assert_eq!(profile.status_level, "Beginner");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fallback_reports_load_failure() {
        let memory = Arc::new(MemoryService::new());
        memory.set_profile_provisioning(false);
        memory.add_account("a@b.c", "secret", "walker");
        memory.fail("insert_profile");
        let auth = store(&memory);

        let err = auth.sign_in("a@b.c", "secret").await.unwrap_err();
        assert_eq!(err, AppError::Remote(PROFILE_LOAD_FAILED.to_string()));

        let snap = auth.snapshot();
        assert!(snap.user.is_none());
        assert_eq!(snap.error.as_deref(), Some(PROFILE_LOAD_FAILED));
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_translated_error() {
        let memory = Arc::new(MemoryService::new());
        memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);

        assert!(auth.sign_in("a@b.c", "nope").await.is_err());
        let snap = auth.snapshot();
        assert!(snap.user.is_none());
        assert_eq!(
            snap.error.as_deref(),
            Some("Неверный email или пароль. Пожалуйста, проверьте введенные данные.")
        );
        assert_eq!(memory.call_count("get_profile"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_up_signs_in_and_loads_profile() {
        let memory = Arc::new(MemoryService::new());
        let auth = store(&memory);

        let profile = auth.sign_up("new@b.c", "secret", "newbie").await.unwrap().unwrap();
        assert_eq!(profile.username, "newbie");
        assert_eq!(memory.call_count("sign_in"), 1);

        // duplicate registration is translated
        let auth2 = store(&memory);
        assert!(auth2.sign_up("new@b.c", "secret", "newbie").await.is_err());
        assert!(auth2
            .snapshot()
            .error
            .unwrap()
            .starts_with("Пользователь с таким email"));
    }

    #[tokio::test]
    async fn test_sign_up_rejects_bad_username_before_remote_call() {
        let memory = Arc::new(MemoryService::new());
        let auth = store(&memory);

        let err = auth.sign_up("x@b.c", "secret", "no spaces").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(memory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_clears_user() {
        let memory = Arc::new(MemoryService::new());
        memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);
        auth.sign_in("a@b.c", "secret").await.unwrap();

        auth.sign_out().await.unwrap();
        assert!(auth.snapshot().user.is_none());
        assert!(memory.session_user().is_none());
    }

    #[tokio::test]
    async fn test_avatar_upload_and_delete() {
        let memory = Arc::new(MemoryService::new());
        let id = memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);
        auth.sign_in("a@b.c", "secret").await.unwrap();

        let url = auth.upload_avatar(png(128)).await.unwrap();
        let key = avatar_key(&url).unwrap();
        assert!(key.starts_with(&format!("{}/", id)));
        assert!(key.ends_with(".png"));
        assert!(memory.stored_object("avatars", &key).is_some());
        assert_eq!(auth.snapshot().user.unwrap().avatar_url, Some(url.clone()));
        assert_eq!(memory.stored_profile(&id).unwrap().avatar_url, Some(url));

        auth.delete_avatar().await.unwrap();
        assert!(memory.stored_object("avatars", &key).is_none());
        assert!(auth.snapshot().user.unwrap().avatar_url.is_none());
        assert!(memory.stored_profile(&id).unwrap().avatar_url.is_none());
    }

    #[tokio::test]
    async fn test_invalid_avatar_never_reaches_storage() {
        let memory = Arc::new(MemoryService::new());
        memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);
        auth.sign_in("a@b.c", "secret").await.unwrap();

        let err = auth.upload_avatar(png(MAX_AVATAR_BYTES + 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(memory.call_count("upload_object"), 0);
        assert_eq!(
            auth.snapshot().error.as_deref(),
            Some("Размер файла не должен превышать 2MB")
        );
    }

    #[tokio::test]
    async fn test_profile_update_goes_through_rpc() {
        let memory = Arc::new(MemoryService::new());
        let id = memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);

        assert_eq!(
            auth.update_user_profile("walker2", None).await.unwrap_err(),
            AppError::NotAuthenticated
        );

        auth.sign_in("a@b.c", "secret").await.unwrap();
        let updated = auth.update_user_profile("walker2", Some("memory://a/b.png")).await.unwrap();
        assert_eq!(updated.username, "walker2");
        assert_eq!(memory.stored_profile(&id).unwrap().username, "walker2");
        assert_eq!(auth.snapshot().user.unwrap().avatar_url.as_deref(), Some("memory://a/b.png"));

        // a failing rpc leaves the local profile alone
        memory.fail("update_user_profile");
        assert!(auth.update_user_profile("walker3", None).await.is_err());
        assert_eq!(auth.snapshot().user.unwrap().username, "walker2");
    }

    #[tokio::test]
    async fn test_rank_is_written_into_profile() {
        let memory = Arc::new(MemoryService::new());
        let top = memory.add_account("top@b.c", "p", "top");
        memory.increment_user_points(&top, 900).await.unwrap();
        memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);
        auth.sign_in("a@b.c", "secret").await.unwrap();

        assert_eq!(auth.fetch_rank().await.unwrap(), 2);
        assert_eq!(auth.snapshot().user.unwrap().rank, 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_profile() {
        let memory = Arc::new(MemoryService::new());
        let id = memory.add_account("a@b.c", "secret", "walker");
        let auth = store(&memory);
        auth.sign_in("a@b.c", "secret").await.unwrap();

        memory.increment_user_points(&id, 40).await.unwrap();
        assert_eq!(auth.refresh_profile().await.unwrap().points, 40);
        assert_eq!(memory.call_count("insert_profile"), 0);

        memory.fail("get_profile");
        assert!(matches!(auth.refresh_profile().await, Err(AppError::Remote(_))));
        let snapshot = auth.snapshot();
        assert_eq!(snapshot.user.map(|u| u.points), Some(40));
        assert_eq!(snapshot.error.as_deref(), Some("get_profile failed"));
    }
}
