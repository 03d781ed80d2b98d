// Routes module

pub mod auth;
pub mod health;
pub mod leaderboard;
pub mod profile;
pub mod quests;

pub use auth::auth_routes;
pub use health::health_routes;
pub use leaderboard::leaderboard_routes;
pub use profile::profile_routes;
pub use quests::quests_routes;

use axum::http::{header, HeaderMap};

use crate::models::UploadFile;

/// Build an upload from a raw request body. The file name comes from the
/// `file_name` query parameter, the content type from the request header.
pub(crate) fn upload_from(headers: &HeaderMap, file_name: Option<String>, body: Vec<u8>) -> UploadFile {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let file_name = file_name.unwrap_or_else(|| "upload".to_string());
    UploadFile::new(&file_name, content_type, body)
}
