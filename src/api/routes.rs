//! API handlers

use super::{ApiError, SharedState};
use crate::messenger::auth::VerifyOutcome;
use crate::messenger::listener::ListenerEntry;
use crate::messenger::traits::{ChatSummary, HistoryMessage, Profile};
use crate::store::Account;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Unwrap a JSON body, answering malformed ones in the API's own error format.
fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    "OK"
}

#[derive(Serialize)]
pub struct ListenersResponse {
    pub status: &'static str,
    /// False when this server does not run the listener pool
    pub enabled: bool,
    pub listeners: Vec<ListenerEntry>,
}

/// GET /listeners
pub async fn listeners(State(state): State<SharedState>) -> Json<ListenersResponse> {
    let (enabled, listeners) = match &state.pool {
        Some(pool) => (true, pool.snapshot()),
        None => (false, Vec::new()),
    };
    Json(ListenersResponse {
        status: "success",
        enabled,
        listeners,
    })
}

// === Login ===

#[derive(Deserialize)]
pub struct SendCodeRequest {
    #[serde(default)]
    pub phone: String,
}

#[derive(Serialize)]
pub struct SendCodeResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub challenge_token: String,
    /// Seconds the code stays valid
    pub timeout: u64,
}

/// POST /send_code
pub async fn send_code(
    State(state): State<SharedState>,
    payload: Result<Json<SendCodeRequest>, JsonRejection>,
) -> ApiResult<SendCodeResponse> {
    let request = body(payload)?;
    let requested = state.auth.request_code(&request.phone).await?;

    Ok(Json(SendCodeResponse {
        status: "success",
        message: "Verification code sent",
        challenge_token: requested.challenge_token,
        timeout: requested.code_valid_seconds,
    }))
}

#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub challenge_token: String,
}

#[derive(Deserialize)]
pub struct VerifyPasswordRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub challenge_token: String,
}

#[derive(Serialize)]
pub struct AccountInfo {
    pub identifier: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub status: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// POST /verify_code
pub async fn verify_code(
    State(state): State<SharedState>,
    payload: Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> ApiResult<VerifyResponse> {
    let request = body(payload)?;
    let outcome = state
        .auth
        .verify_code(&request.phone, &request.code, &request.challenge_token)
        .await?;
    Ok(Json(finish_login(&state, outcome).await))
}

/// POST /verify_password
pub async fn verify_password(
    State(state): State<SharedState>,
    payload: Result<Json<VerifyPasswordRequest>, JsonRejection>,
) -> ApiResult<VerifyResponse> {
    let request = body(payload)?;
    let outcome = state
        .auth
        .submit_password(&request.phone, &request.password, &request.challenge_token)
        .await?;
    Ok(Json(finish_login(&state, outcome).await))
}

/// Answer a login step and point the account's listener at the new credential.
async fn finish_login(state: &SharedState, outcome: VerifyOutcome) -> VerifyResponse {
    let account = match outcome {
        VerifyOutcome::SecondFactorRequired => {
            return VerifyResponse {
                status: "2fa_required",
                message: "Second-factor password required",
                account: None,
                credential: None,
            };
        }
        VerifyOutcome::Authenticated(account) => account,
    };

    if let Some(pool) = &state.pool {
        if let Err(e) = pool.refresh(account.clone()).await {
            warn!(account = %account.identifier, error = %e, "failed to start listener after login");
        }
    }

    let Account {
        identifier,
        credential,
        registered_at,
    } = account;

    VerifyResponse {
        status: "success",
        message: "Login successful",
        credential: Some(credential.expose().to_string()),
        account: Some(AccountInfo {
            identifier,
            registered_at,
        }),
    }
}

// === Account actions ===

#[derive(Deserialize)]
pub struct AccountRequest {
    #[serde(default)]
    pub account: String,
}

#[derive(Serialize)]
pub struct ChatsResponse {
    pub status: &'static str,
    pub chats: Vec<ChatSummary>,
}

/// POST /get_chats
pub async fn get_chats(
    State(state): State<SharedState>,
    payload: Result<Json<AccountRequest>, JsonRejection>,
) -> ApiResult<ChatsResponse> {
    let request = body(payload)?;
    let chats = state.actions.list_chats(&request.account).await?;
    Ok(Json(ChatsResponse {
        status: "success",
        chats,
    }))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub account: String,
    /// Handle, numeric id or phone number
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize)]
pub struct MessageSentResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// POST /send_message
pub async fn send_message(
    State(state): State<SharedState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<MessageSentResponse> {
    let request = body(payload)?;
    state
        .actions
        .send_message(&request.account, &request.target, &request.message)
        .await?;
    Ok(Json(MessageSentResponse {
        status: "success",
        message: "Message sent",
    }))
}

#[derive(Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub target: String,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub status: &'static str,
    pub messages: Vec<HistoryMessage>,
}

/// POST /get_chat_history
pub async fn get_chat_history(
    State(state): State<SharedState>,
    payload: Result<Json<HistoryRequest>, JsonRejection>,
) -> ApiResult<HistoryResponse> {
    let request = body(payload)?;
    let messages = state
        .actions
        .fetch_history(&request.account, &request.target, request.limit)
        .await?;
    Ok(Json(HistoryResponse {
        status: "success",
        messages,
    }))
}

#[derive(Serialize)]
pub struct UserInfoResponse {
    pub status: &'static str,
    pub user: Profile,
}

/// POST /get_user_info
pub async fn get_user_info(
    State(state): State<SharedState>,
    payload: Result<Json<AccountRequest>, JsonRejection>,
) -> ApiResult<UserInfoResponse> {
    let request = body(payload)?;
    let user = state.actions.fetch_profile(&request.account).await?;
    Ok(Json(UserInfoResponse {
        status: "success",
        user,
    }))
}
