// Configuration - Environment variables

use std::env;

/// Application configuration loaded from environment
#[derive(Clone, Debug)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Base URL of the hosted data service (auth, tables, rpc, storage)
    pub supabase_url: Option<String>,
    /// Public anon key sent as `apikey` on every request
    pub supabase_anon_key: Option<String>,
    /// Storage bucket for profile avatars
    pub avatar_bucket: String,
    /// Storage bucket for photo-submission tasks
    pub photo_bucket: String,
    /// Log file path
    pub log_file: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            supabase_url: env::var("SUPABASE_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string()),
            supabase_anon_key: env::var("SUPABASE_ANON_KEY").ok(),
            avatar_bucket: env::var("AVATAR_BUCKET").unwrap_or_else(|_| "avatars".to_string()),
            photo_bucket: env::var("PHOTO_BUCKET").unwrap_or_else(|_| "task-photos".to_string()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "/tmp/city-quest.log".to_string()),
        }
    }

    /// Whether enough is configured to reach the hosted service
    pub fn has_remote(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_anon_key.is_some()
    }

    /// Validate that required configuration is present
    pub fn validate(&self) -> Result<(), String> {
        if self.supabase_url.is_none() {
            tracing::warn!("SUPABASE_URL not set - falling back to in-memory data service");
        }
        if self.supabase_anon_key.is_none() {
            tracing::warn!("SUPABASE_ANON_KEY not set - remote requests will be rejected");
        }
        if self.avatar_bucket.is_empty() || self.photo_bucket.is_empty() {
            return Err("Storage bucket names must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            supabase_url: None,
            supabase_anon_key: None,
            avatar_bucket: "avatars".to_string(),
            photo_bucket: "task-photos".to_string(),
            log_file: "/tmp/city-quest.log".to_string(),
        }
    }
}
