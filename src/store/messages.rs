//! Received-message sink

use super::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Immutable record of one inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub account_identifier: String,
    pub sender_display: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Append-only destination for inbound messages.
///
/// No deduplication. Appends for one account arrive from a single listener
/// task, so they are stored in the order that listener observed them.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn append(&self, message: &ChatMessage) -> StoreResult<()>;
}
