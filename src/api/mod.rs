//! HTTP API
//!
//! JSON endpoints over the login flow and the one-shot account actions,
//! plus read-only views of the listener pool:
//! - `POST /send_code`, `/verify_code`, `/verify_password`
//! - `POST /get_chats`, `/send_message`, `/get_chat_history`, `/get_user_info`
//! - `GET /listeners`, `/health`
//!
//! Every JSON answer carries `status` (`success`, `error` or `2fa_required`)
//! and a human-readable `message`.

pub mod routes;

use crate::messenger::{ActionError, ActionService, AuthError, AuthService, ListenerPool, ProtocolError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Services shared by every handler
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub actions: Arc<ActionService>,
    /// Present when the server also runs the listeners
    pub pool: Option<Arc<ListenerPool>>,
}

pub type SharedState = Arc<AppState>;

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/listeners", get(routes::listeners))
        .route("/send_code", post(routes::send_code))
        .route("/verify_code", post(routes::verify_code))
        .route("/verify_password", post(routes::verify_password))
        .route("/get_chats", post(routes::get_chats))
        .route("/send_message", post(routes::send_message))
        .route("/get_chat_history", post(routes::get_chat_history))
        .route("/get_user_info", post(routes::get_user_info))
        .with_state(state)
}

/// Error answer: `{"status": "error", "kind", "message", "retry_after"?}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub retry_after: Option<u64>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    kind: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_input",
            message: message.into(),
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            kind: self.kind,
            message: &self.message,
            retry_after: self.retry_after,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let status = match &e {
            AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::InvalidCode | AuthError::ExpiredCode | AuthError::InvalidPassword => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::NoPendingFlow => StatusCode::NOT_FOUND,
            AuthError::ChallengeMismatch
            | AuthError::SecondFactorPending
            | AuthError::SecondFactorNotRequested => StatusCode::CONFLICT,
            AuthError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::StepFailed(_) => StatusCode::BAD_GATEWAY,
        };
        let retry_after = match &e {
            AuthError::RateLimited { retry_after } => Some(retry_after.as_secs()),
            _ => None,
        };
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
            retry_after,
        }
    }
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        let (status, retry_after) = match &e {
            ActionError::InvalidInput(_) => (StatusCode::BAD_REQUEST, None),
            ActionError::UnknownAccount(_) => (StatusCode::NOT_FOUND, None),
            ActionError::Protocol(ProtocolError::RateLimited { retry_after }) => {
                (StatusCode::TOO_MANY_REQUESTS, Some(retry_after.as_secs()))
            }
            ActionError::Protocol(_) => (StatusCode::BAD_GATEWAY, None),
            ActionError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
            retry_after,
        }
    }
}
