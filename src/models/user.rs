// User models - auth session and profile rows
// Table: profiles (one row per auth user, normally provisioned by the backend)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached at sign-up
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserMetadata {
    #[serde(default)]
    pub username: Option<String>,
}

/// Authenticated account as reported by the auth service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

/// Signed-in session
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub expires_at: i64,
    pub user: AuthUser,
}

/// Profile row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub rank: i64,
    #[serde(default)]
    pub status_level: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn status(&self) -> UserStatus {
        UserStatus::from_points(self.points)
    }
}

/// Profile inserted when the backend never provisioned one
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewProfile {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub points: i64,
    pub rank: i64,
    pub status_level: String,
}

impl NewProfile {
    pub fn fallback_for(user: &AuthUser) -> Self {
        let username = user
            .user_metadata
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| {
                let prefix: String = user.id.chars().take(8).collect();
                format!("user_{}", prefix)
            });

        Self {
            id: user.id.clone(),
            username,
            email: user.email.clone(),
            points: 0,
            rank: 0,
            status_level: "Beginner".to_string(),
        }
    }
}

/// Partial profile update; `Some(None)` clears a column
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
}

impl ProfilePatch {
    pub fn apply(&self, profile: &mut UserProfile) {
        if let Some(username) = &self.username {
            profile.username = username.clone();
        }
        if let Some(avatar_url) = &self.avatar_url {
            profile.avatar_url = avatar_url.clone();
        }
    }
}

/// Status tier derived from total points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Novice,
    Explorer,
    Master,
    Legend,
}

impl UserStatus {
    pub fn from_points(points: i64) -> Self {
        if points >= UserStatus::Legend.min_points() {
            UserStatus::Legend
        } else if points >= UserStatus::Master.min_points() {
            UserStatus::Master
        } else if points >= UserStatus::Explorer.min_points() {
            UserStatus::Explorer
        } else {
            UserStatus::Novice
        }
    }

    pub fn min_points(self) -> i64 {
        match self {
            UserStatus::Novice => 0,
            UserStatus::Explorer => 100,
            UserStatus::Master => 500,
            UserStatus::Legend => 1000,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UserStatus::Novice => "Новичок",
            UserStatus::Explorer => "Исследователь",
            UserStatus::Master => "Мастер",
            UserStatus::Legend => "Легенда",
        }
    }
}
