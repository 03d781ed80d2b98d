// Error taxonomy shared by the data service, the stores and the HTTP shell

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// Bad credentials, duplicate registration, expired session
    #[error("{0}")]
    Auth(String),

    /// Client-side input checks (username, avatar file)
    #[error("{0}")]
    Validation(String),

    /// Network or service error from any table/rpc/storage call
    #[error("{0}")]
    Remote(String),

    #[error("User not authenticated")]
    NotAuthenticated,

    /// Missing quest/progress context, or an action not valid in the current state
    #[error("{0}")]
    Precondition(String),

    #[error("Task validation failed")]
    TaskValidationFailed,

    #[error("Task {got} is not the current task (expected {expected})")]
    TaskMismatch { expected: String, got: String },

    #[error("Quest progress was changed elsewhere; reload and try again")]
    StaleProgress,

    #[error("{0} not found")]
    NotFound(String),
}

impl AppError {
    /// Message shown next to the form that triggered the error.
    /// Known auth failures are translated; everything else passes through.
    pub fn user_message(&self) -> String {
        let raw = self.to_string();

        if raw.contains("user_already_exists") || raw.contains("User already registered") {
            return "Пользователь с таким email уже зарегистрирован. Пожалуйста, войдите в систему."
                .to_string();
        }

        if raw.contains("Invalid login credentials") {
            return "Неверный email или пароль. Пожалуйста, проверьте введенные данные.".to_string();
        }

        raw
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::TaskValidationFailed
            | AppError::TaskMismatch { .. } => StatusCode::BAD_REQUEST,
            AppError::Auth(_) | AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StaleProgress | AppError::Precondition(_) => StatusCode::CONFLICT,
            AppError::Remote(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Remote(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
