// Session gate for the HTTP shell
// The server fronts a single session; a request is signed in when the auth
// store currently holds a profile.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::models::UserProfile;
use crate::AppState;

/// Extractor for handlers that need a signed-in user
#[derive(Debug, Clone)]
pub struct SignedIn(pub UserProfile);

#[axum::async_trait]
impl FromRequestParts<AppState> for SignedIn {
    type Rejection = AppError;

    async fn from_request_parts(_parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .auth
            .snapshot()
            .user
            .map(SignedIn)
            .ok_or(AppError::NotAuthenticated)
    }
}
