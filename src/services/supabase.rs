// Hosted data service over its REST surface
// auth: /auth/v1, tables + rpc: /rest/v1, objects: /storage/v1

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

use super::data_service::{
    DataService, PROFILES_TABLE, QUESTS_TABLE, QUEST_COMPLETIONS_TABLE, QUEST_PROGRESS_TABLE,
    RPC_GET_LEADERBOARD, RPC_GET_USER_RANK, RPC_INCREMENT_USER_POINTS, RPC_UPDATE_USER_PROFILE,
    TASKS_TABLE,
};
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthUser, LeaderboardPeriod, LeaderboardRow, LeaderboardSort, NewProfile, ProfilePatch, Quest,
    QuestCompletion, QuestProgress, Session, Task, UploadFile, UserProfile,
};

/// Token endpoint response (password and refresh_token grants)
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Read `exp` from an access token without checking its signature
fn token_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.exp)
}

/// `column=eq.value` filter
fn eq(column: &str, value: &str) -> String {
    format!("{}=eq.{}", column, urlencoding::encode(value))
}

/// Pull a readable message out of an error body. Auth errors carry an
/// `error_code` that is kept so callers can match on it.
fn parse_error_body(status: StatusCode, body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            body.to_string()
        };
    };

    let message = ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|m| m.as_str()))
        .unwrap_or(body)
        .to_string();

    match value.get("error_code").and_then(|c| c.as_str()) {
        Some(code) => format!("{} ({})", message, code),
        None => message,
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    parse_error_body(status, &body)
}

async fn expect_success(response: Response, what: &str) -> AppResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let message = error_message(response).await;
    tracing::error!("{} failed: {}", what, message);
    Err(AppError::Remote(message))
}

async fn expect_auth_success(response: Response, what: &str) -> AppResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let message = error_message(response).await;
    tracing::warn!("{} rejected: {}", what, message);
    Err(AppError::Auth(message))
}

/// REST client for the hosted data service
pub struct SupabaseService {
    client: Client,
    base_url: String,
    anon_key: String,
    session: Arc<RwLock<Option<Session>>>,
}

impl SupabaseService {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    fn cached_session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn store_session(&self, session: Option<Session>) {
        if let Ok(mut cached) = self.session.write() {
            *cached = session;
        }
    }

    fn session_from(&self, token: TokenResponse) -> Session {
        let now = Utc::now().timestamp();
        let expires_at = token_expiry(&token.access_token)
            .or_else(|| token.expires_in.map(|secs| now + secs))
            .unwrap_or(now + 3600);

        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }

    /// Access token for the current session, refreshed when it has less than
    /// a minute left. `None` when nobody is signed in.
    async fn access_token(&self) -> AppResult<Option<String>> {
        let Some(session) = self.cached_session() else {
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        if session.expires_at > now + 60 {
            return Ok(Some(session.access_token));
        }

        tracing::info!("Refreshing session for user {}", session.user.id);
        let refreshed = self.refresh_session(&session.refresh_token).await?;
        let token = refreshed.access_token.clone();
        self.store_session(Some(refreshed));
        Ok(Some(token))
    }

    async fn refresh_session(&self, refresh_token: &str) -> AppResult<Session> {
        let url = format!("{}?grant_type=refresh_token", self.auth_url("token"));
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let response = match expect_auth_success(response, "Session refresh").await {
            Ok(r) => r,
            Err(e) => {
                self.store_session(None);
                return Err(e);
            }
        };

        let token: TokenResponse = response.json().await?;
        Ok(self.session_from(token))
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn storage_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/object/{}", self.base_url, bucket)
    }

    /// Build request with apikey and bearer (session token, else the anon key)
    async fn build_request(&self, method: Method, url: &str) -> AppResult<RequestBuilder> {
        let token = self
            .access_token()
            .await?
            .unwrap_or_else(|| self.anon_key.clone());

        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token))
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, filters: &[String]) -> AppResult<Vec<T>> {
        let mut url = format!("{}?select=*", self.rest_url(table));
        for filter in filters {
            url.push('&');
            url.push_str(filter);
        }

        let response = self.build_request(Method::GET, &url).await?.send().await?;
        let response = expect_success(response, &format!("Select from {}", table)).await?;
        Ok(response.json().await?)
    }

    async fn rpc(&self, function: &str, args: Value) -> AppResult<Response> {
        let url = self.rest_url(&format!("rpc/{}", function));
        let response = self
            .build_request(Method::POST, &url)
            .await?
            .json(&args)
            .send()
            .await?;
        expect_success(response, &format!("rpc {}", function)).await
    }
}

#[async_trait]
impl DataService for SupabaseService {
    // =========================================================================
    // AUTH
    // =========================================================================

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session> {
        let url = format!("{}?grant_type=password", self.auth_url("token"));
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let response = expect_auth_success(response, "Sign in").await?;
        let token: TokenResponse = response.json().await?;
        let session = self.session_from(token);

        tracing::info!("Signed in user {}", session.user.id);
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, username: &str) -> AppResult<Option<AuthUser>> {
        let response = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "username": username }
            }))
            .send()
            .await?;

        let response = expect_auth_success(response, "Sign up").await?;
        let body: Value = response.json().await?;

        // With email confirmation on, the service answers with the bare user;
        // otherwise with a session that wraps it.
        let user = match body.get("user") {
            Some(user) if user.is_object() => serde_json::from_value::<AuthUser>(user.clone()).ok(),
            _ if body.get("id").is_some() => serde_json::from_value::<AuthUser>(body.clone()).ok(),
            _ => None,
        };

        match &user {
            Some(u) => tracing::info!("Registered user {}", u.id),
            None => tracing::warn!("Sign up succeeded without returning a user"),
        }
        Ok(user)
    }

    async fn sign_out(&self) -> AppResult<()> {
        if self.cached_session().is_none() {
            return Ok(());
        }

        let response = self
            .build_request(Method::POST, &self.auth_url("logout"))
            .await?
            .send()
            .await?;
        expect_auth_success(response, "Sign out").await?;

        self.store_session(None);
        tracing::info!("Signed out");
        Ok(())
    }

    async fn current_user(&self) -> AppResult<Option<AuthUser>> {
        if self.cached_session().is_none() {
            return Ok(None);
        }

        let response = self
            .build_request(Method::GET, &self.auth_url("user"))
            .await?
            .send()
            .await?;

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            tracing::warn!("Session no longer valid, clearing it");
            self.store_session(None);
            return Ok(None);
        }

        let response = expect_success(response, "Get user").await?;
        Ok(Some(response.json().await?))
    }

    fn session_user(&self) -> Option<AuthUser> {
        self.cached_session().map(|s| s.user)
    }

    // =========================================================================
    // PROFILES
    // =========================================================================

    async fn get_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        let rows: Vec<UserProfile> = self.select(PROFILES_TABLE, &[eq("id", user_id)]).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> AppResult<UserProfile> {
        let response = self
            .build_request(Method::POST, &self.rest_url(PROFILES_TABLE))
            .await?
            .header("Prefer", "return=representation")
            .json(profile)
            .send()
            .await?;

        let response = expect_success(response, "Insert profile").await?;
        let rows: Vec<UserProfile> = response.json().await?;
        let created = rows
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Remote("Profile insert returned no row".to_string()))?;

        tracing::info!("Created profile {} ({})", created.id, created.username);
        Ok(created)
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> AppResult<()> {
        let url = format!("{}?{}", self.rest_url(PROFILES_TABLE), eq("id", user_id));
        let response = self
            .build_request(Method::PATCH, &url)
            .await?
            .json(patch)
            .send()
            .await?;

        expect_success(response, "Update profile").await?;
        tracing::info!("Updated profile {}", user_id);
        Ok(())
    }

    async fn rpc_update_user_profile(&self, username: &str, avatar_url: Option<&str>) -> AppResult<()> {
        self.rpc(
            RPC_UPDATE_USER_PROFILE,
            json!({ "profile_username": username, "profile_avatar_url": avatar_url }),
        )
        .await?;
        Ok(())
    }

    async fn get_user_rank(&self, user_id: &str) -> AppResult<i64> {
        let response = self.rpc(RPC_GET_USER_RANK, json!({ "user_id": user_id })).await?;
        let value: Value = response.json().await?;
        value
            .as_i64()
            .ok_or_else(|| AppError::Remote(format!("Unexpected rank value: {}", value)))
    }

    async fn increment_user_points(&self, user_id: &str, points: i64) -> AppResult<()> {
        self.rpc(
            RPC_INCREMENT_USER_POINTS,
            json!({ "user_id": user_id, "points_to_add": points }),
        )
        .await?;
        tracing::info!("Added {} points to user {}", points, user_id);
        Ok(())
    }

    // =========================================================================
    // QUESTS
    // =========================================================================

    async fn list_quests(&self) -> AppResult<Vec<Quest>> {
        let quests: Vec<Quest> = self.select(QUESTS_TABLE, &[]).await?;
        tracing::info!("Retrieved {} quests", quests.len());
        Ok(quests)
    }

    async fn get_quest(&self, quest_id: &str) -> AppResult<Option<Quest>> {
        let rows: Vec<Quest> = self.select(QUESTS_TABLE, &[eq("id", quest_id)]).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_tasks(&self, quest_id: &str) -> AppResult<Vec<Task>> {
        self.select(
            TASKS_TABLE,
            &[eq("quest_id", quest_id), "order=order.asc".to_string()],
        )
        .await
    }

    // =========================================================================
    // PROGRESS
    // =========================================================================

    async fn get_progress(&self, user_id: &str, quest_id: &str) -> AppResult<Option<QuestProgress>> {
        // plain select instead of a single-row request so "no row" is not an error
        let rows: Vec<QuestProgress> = self
            .select(
                QUEST_PROGRESS_TABLE,
                &[eq("quest_id", quest_id), eq("user_id", user_id)],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_progress(&self, progress: &QuestProgress) -> AppResult<()> {
        let url = format!("{}?on_conflict=user_id,quest_id", self.rest_url(QUEST_PROGRESS_TABLE));
        let response = self
            .build_request(Method::POST, &url)
            .await?
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(progress)
            .send()
            .await?;

        expect_success(response, "Upsert quest progress").await?;
        tracing::info!(
            "Started quest {} for user {}",
            progress.quest_id,
            progress.user_id
        );
        Ok(())
    }

    async fn update_progress(&self, progress: &QuestProgress, expected_revision: i64) -> AppResult<()> {
        let url = format!(
            "{}?{}&{}&revision=eq.{}",
            self.rest_url(QUEST_PROGRESS_TABLE),
            eq("user_id", &progress.user_id),
            eq("quest_id", &progress.quest_id),
            expected_revision
        );

        let response = self
            .build_request(Method::PATCH, &url)
            .await?
            .header("Prefer", "return=representation")
            .json(progress)
            .send()
            .await?;

        let response = expect_success(response, "Update quest progress").await?;
        let updated: Vec<Value> = response.json().await?;
        if updated.is_empty() {
            tracing::warn!(
                "Quest progress {} for user {} is no longer at revision {}",
                progress.quest_id,
                progress.user_id,
                expected_revision
            );
            return Err(AppError::StaleProgress);
        }

        Ok(())
    }

    async fn delete_progress(&self, user_id: &str, quest_id: &str) -> AppResult<()> {
        let url = format!(
            "{}?{}&{}",
            self.rest_url(QUEST_PROGRESS_TABLE),
            eq("user_id", user_id),
            eq("quest_id", quest_id)
        );

        let response = self.build_request(Method::DELETE, &url).await?.send().await?;
        expect_success(response, "Delete quest progress").await?;
        tracing::info!("Deleted progress on quest {} for user {}", quest_id, user_id);
        Ok(())
    }

    // =========================================================================
    // COMPLETIONS
    // =========================================================================

    async fn insert_completion(&self, completion: &QuestCompletion) -> AppResult<QuestCompletion> {
        let response = self
            .build_request(Method::POST, &self.rest_url(QUEST_COMPLETIONS_TABLE))
            .await?
            .header("Prefer", "return=representation")
            .json(completion)
            .send()
            .await?;

        let response = expect_success(response, "Insert quest completion").await?;
        let rows: Vec<QuestCompletion> = response.json().await?;
        let saved = rows.into_iter().next().unwrap_or_else(|| completion.clone());

        tracing::info!(
            "Recorded completion of quest {} for user {}: {} points in {} min",
            saved.quest_id,
            saved.user_id,
            saved.points_earned,
            saved.time_taken
        );
        Ok(saved)
    }

    async fn list_completions(&self, user_id: &str) -> AppResult<Vec<QuestCompletion>> {
        self.select(
            QUEST_COMPLETIONS_TABLE,
            &[eq("user_id", user_id), "order=completed_at.desc".to_string()],
        )
        .await
    }

    // =========================================================================
    // LEADERBOARD
    // =========================================================================

    async fn get_leaderboard(
        &self,
        period: LeaderboardPeriod,
        sort_by: LeaderboardSort,
    ) -> AppResult<Vec<LeaderboardRow>> {
        let response = self
            .rpc(
                RPC_GET_LEADERBOARD,
                json!({ "period": period.as_str(), "sort_by": sort_by.as_str() }),
            )
            .await?;
        Ok(response.json().await?)
    }

    // =========================================================================
    // STORAGE
    // =========================================================================

    async fn upload_object(&self, bucket: &str, key: &str, file: &UploadFile, upsert: bool) -> AppResult<()> {
        let url = format!("{}/{}", self.storage_url(bucket), key);
        let response = self
            .build_request(Method::POST, &url)
            .await?
            .header("Content-Type", &file.content_type)
            .header("Cache-Control", "3600")
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(file.bytes.clone())
            .send()
            .await?;

        expect_success(response, "Upload object").await?;
        tracing::info!("Uploaded {} bytes to {}/{}", file.size(), bucket, key);
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, key)
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> AppResult<()> {
        let response = self
            .build_request(Method::DELETE, &self.storage_url(bucket))
            .await?
            .json(&json!({ "prefixes": [key] }))
            .send()
            .await?;

        expect_success(response, "Remove object").await?;
        tracing::info!("Removed {}/{}", bucket, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        aud: String,
        exp: i64,
    }

    #[test]
    fn test_token_expiry_reads_exp_without_key() {
        let claims = Claims {
            sub: "u1".to_string(),
            aud: "authenticated".to_string(),
            exp: 1_700_000_000,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"server-side")).unwrap();
        assert_eq!(token_expiry(&token), Some(1_700_000_000));
        assert_eq!(token_expiry("not-a-jwt"), None);
    }

    #[test]
    fn test_eq_filter_encodes_value() {
        assert_eq!(eq("id", "abc"), "id=eq.abc");
        assert_eq!(eq("username", "a b&c"), "username=eq.a%20b%26c");
    }

    #[test]
    fn test_parse_error_body() {
        let body = r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#;
        assert_eq!(
            parse_error_body(StatusCode::UNPROCESSABLE_ENTITY, body),
            "User already registered (user_already_exists)"
        );

        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(parse_error_body(StatusCode::BAD_REQUEST, body), "Invalid login credentials");

        let body = r#"{"message":"permission denied for table quests","code":"42501"}"#;
        assert_eq!(
            parse_error_body(StatusCode::FORBIDDEN, body),
            "permission denied for table quests"
        );

        assert_eq!(parse_error_body(StatusCode::BAD_GATEWAY, ""), "HTTP 502 Bad Gateway");
        assert_eq!(parse_error_body(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
    }

    #[test]
    fn test_public_url() {
        let service = SupabaseService::new("https://demo.supabase.co/", "anon");
        assert_eq!(
            service.public_url("avatars", "u1/1700.png"),
            "https://demo.supabase.co/storage/v1/object/public/avatars/u1/1700.png"
        );
        assert!(service.session_user().is_none());
    }
}
