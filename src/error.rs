use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::auth::repo_types::RepoError;

/// Failures surfaced by the credential and session authority.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Email already registered")]
    DuplicateEmail,

    /// Unknown email, wrong password and inactive account all collapse here.
    #[error("Invalid email or password")]
    AuthenticationFailed,

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Access denied")]
    Forbidden,

    #[error("User not found")]
    NotFound,

    #[error("Current password is incorrect")]
    IncorrectCurrentPassword,

    #[error("{0}")]
    SelfTarget(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::DuplicateEmail
            | Self::IncorrectCurrentPassword
            | Self::SelfTarget(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed | Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateEmail => "DUPLICATE_EMAIL",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::IncorrectCurrentPassword => "INCORRECT_CURRENT_PASSWORD",
            Self::SelfTarget(_) => "SELF_TARGET",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<RepoError> for AuthError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::UniqueViolation => Self::DuplicateEmail,
            RepoError::Other(e) => Self::Internal(e),
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(detail = %rejection.body_text(), "request body rejected");
        let message = match rejection {
            JsonRejection::JsonDataError(_) => {
                "Request body is missing a field or has a field of the wrong type"
            }
            JsonRejection::JsonSyntaxError(_) => "Request body is not valid JSON",
            JsonRejection::MissingJsonContentType(_) => "Expected a JSON request body",
            _ => "Invalid request body",
        };
        Self::validation(message)
    }
}

/// JSON body returned for every error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!(error = ?e, "request failed with internal error");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
