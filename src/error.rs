use std::fmt;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::users::StoreError;

pub type AuthResult<T> = Result<T, AuthError>;

/// Why a request could not be authenticated. All of these surface as 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unauthenticated {
    NotLoggedIn,
    InvalidToken,
    UserGone,
    PasswordChanged,
    BadCredentials,
    WrongPassword,
}

impl fmt::Display for Unauthenticated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Unauthenticated::NotLoggedIn => "You are not logged in! Please log in to get access.",
            Unauthenticated::InvalidToken => "Invalid or expired token. Please log in again.",
            Unauthenticated::UserGone => "The user belonging to this token no longer exists.",
            Unauthenticated::PasswordChanged => {
                "User recently changed password! Please log in again."
            }
            Unauthenticated::BadCredentials => "Incorrect email or password",
            Unauthenticated::WrongPassword => "Your current password is wrong.",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthenticated(Unauthenticated),
    #[error("You do not have permission to perform this action")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("Token is invalid or has expired")]
    InvalidOrExpiredToken,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("There was an error sending the email. Try again later!")]
    DeliveryFailed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::InvalidOrExpiredToken | AuthError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::DeliveryFailed | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<Unauthenticated> for AuthError {
    fn from(reason: Unauthenticated) -> Self {
        AuthError::Unauthenticated(reason)
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(msg) => AuthError::BadRequest(msg),
            StoreError::DuplicateEmail => {
                AuthError::Conflict("Email already registered".into())
            }
            StoreError::Other(e) => AuthError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AuthError {
    fn from(rejection: PathRejection) -> Self {
        AuthError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status.is_server_error() {
            error!(error = ?self, %status, "request failed");
            let message = match self {
                AuthError::DeliveryFailed => self.to_string(),
                _ => "Something went wrong".to_string(),
            };
            ErrorBody {
                status: "error",
                message,
            }
        } else {
            ErrorBody {
                status: "fail",
                message: self.to_string(),
            }
        };
        (status, Json(body)).into_response()
    }
}
