//! Messaging Network Client Trait Abstractions
//!
//! The wire protocol lives outside this crate. Everything here talks to it
//! through [`Connector`] and [`Connection`], which lets the whole session
//! lifecycle run against [`MockNetwork`](super::mock::MockNetwork) in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Durable session credential for one account.
///
/// Opaque to this crate. Zeroized on drop and redacted from `Debug`, so it
/// can only reach a log line through [`Credential::fingerprint`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw token, for handing to the protocol client or the repository.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix that identifies a credential without revealing it.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Network answer to a code request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeIssued {
    /// Correlation value that must accompany the code on sign-in
    pub challenge_token: String,
    /// How long the code stays valid, when the network says so
    pub valid_for: Option<Duration>,
}

/// A party on the network (sender of an inbound message)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Peer {
    pub id: i64,
    pub handle: Option<String>,
    pub first_name: Option<String>,
}

impl Peer {
    /// Name stored with a received message: handle, then given name, then id.
    pub fn display_name(&self) -> String {
        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        non_empty(&self.handle)
            .or_else(|| non_empty(&self.first_name))
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// One new inbound message observed on an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender: Peer,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Conversation kind, as reported by the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    User,
    Group,
    Channel,
}

/// Conversation summary returned by `list_chats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: i64,
    pub title: Option<String>,
    pub handle: Option<String>,
    pub phone: Option<String>,
    pub kind: ChatKind,
}

/// A message from a conversation's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub text: String,
    pub sender_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
    pub reply_to: Option<i64>,
}

/// The authenticated account's own profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub handle: Option<String>,
    pub phone: Option<String>,
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors reported by the protocol client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code expired")]
    ExpiredCode,

    #[error("Second-factor password required")]
    PasswordRequired,

    #[error("Invalid second-factor password")]
    InvalidPassword,

    /// The credential was rejected (revoked, logged out elsewhere).
    #[error("Credential rejected by the network")]
    Unauthorized,

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ProtocolError {
    /// Errors that reconnecting with the same credential cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProtocolError::Unauthorized)
    }
}

/// Opens connections to the messaging network.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection. `None` starts an unauthenticated session used for
    /// the login flow; `Some` resumes an existing account.
    async fn connect(&self, credential: Option<&Credential>) -> ProtocolResult<Arc<dyn Connection>>;
}

/// One open connection to the messaging network.
///
/// Every method takes `&self` so a connection can be shared by `Arc` between
/// the component that owns it and the task currently using it.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Ask the network to send a one-time code to `phone`.
    async fn request_code(&self, phone: &str) -> ProtocolResult<CodeIssued>;

    /// Submit the one-time code. Fails with `PasswordRequired` when the
    /// account has a second factor enabled.
    async fn sign_in(&self, phone: &str, code: &str, challenge_token: &str) -> ProtocolResult<()>;

    /// Submit the second-factor password after `PasswordRequired`.
    async fn check_password(&self, password: &str) -> ProtocolResult<()>;

    /// Durable credential for the session, valid after a successful sign-in.
    async fn export_credential(&self) -> ProtocolResult<Credential>;

    async fn list_chats(&self) -> ProtocolResult<Vec<ChatSummary>>;

    /// `target` is a handle, numeric id or phone number.
    async fn send_message(&self, target: &str, body: &str) -> ProtocolResult<()>;

    /// Up to `limit` messages of a conversation, newest first.
    async fn history(&self, target: &str, limit: u32) -> ProtocolResult<Vec<HistoryMessage>>;

    async fn me(&self) -> ProtocolResult<Profile>;

    /// Wait for the next inbound message.
    ///
    /// `Ok(None)` means the peer closed the connection; `Err` means it dropped.
    async fn next_event(&self) -> ProtocolResult<Option<InboundEvent>>;

    /// Release the connection. Idempotent.
    async fn close(&self);
}
