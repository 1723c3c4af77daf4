//! One-shot operations on an authenticated account.
//!
//! Every call opens its own connection with the stored credential, performs
//! a single operation and closes the connection again, whatever the outcome.
//! Nothing here touches pending logins or the listener pool.

use super::traits::{ChatSummary, Connection, Connector, HistoryMessage, Profile, ProtocolError, ProtocolResult};
use crate::store::{AccountRepository, StoreError};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// History size when the caller does not ask for one
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Largest history page served in one call
pub const MAX_HISTORY_LIMIT: u32 = 1000;

/// Requested history size, defaulted and clamped to `1..=MAX_HISTORY_LIMIT`
pub fn history_limit(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

pub type ActionResult<T> = Result<T, ActionError>;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ActionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::InvalidInput(_) => "invalid_input",
            ActionError::UnknownAccount(_) => "unknown_account",
            ActionError::Protocol(ProtocolError::RateLimited { .. }) => "rate_limited",
            ActionError::Protocol(_) => "protocol",
            ActionError::Store(_) => "persistence",
        }
    }
}

/// Stateless facade over stored accounts
pub struct ActionService {
    connector: Arc<dyn Connector>,
    accounts: Arc<dyn AccountRepository>,
}

impl ActionService {
    pub fn new(connector: Arc<dyn Connector>, accounts: Arc<dyn AccountRepository>) -> Self {
        Self {
            connector,
            accounts,
        }
    }

    pub async fn list_chats(&self, account: &str) -> ActionResult<Vec<ChatSummary>> {
        self.with_connection(account, "list_chats", |conn| async move {
            conn.list_chats().await
        })
        .await
    }

    /// Send `body` to `target` (handle, numeric id or phone number).
    pub async fn send_message(&self, account: &str, target: &str, body: &str) -> ActionResult<()> {
        let target = required("target", target)?;
        if body.trim().is_empty() {
            return Err(ActionError::InvalidInput("body must not be empty".to_string()));
        }

        self.with_connection(account, "send_message", |conn| async move {
            conn.send_message(target, body).await
        })
        .await
    }

    /// Newest-first history of a conversation; see [`history_limit`].
    pub async fn fetch_history(
        &self,
        account: &str,
        target: &str,
        limit: Option<u32>,
    ) -> ActionResult<Vec<HistoryMessage>> {
        let target = required("target", target)?;
        let limit = history_limit(limit);

        self.with_connection(account, "fetch_history", |conn| async move {
            let mut messages = conn.history(target, limit).await?;
            messages.truncate(limit as usize);
            Ok::<_, ProtocolError>(messages)
        })
        .await
    }

    pub async fn fetch_profile(&self, account: &str) -> ActionResult<Profile> {
        self.with_connection(account, "fetch_profile", |conn| async move {
            conn.me().await
        })
        .await
    }

    /// Open a connection for `account`, run `op`, close the connection.
    async fn with_connection<F, Fut, T>(
        &self,
        account: &str,
        operation: &'static str,
        op: F,
    ) -> ActionResult<T>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = ProtocolResult<T>>,
    {
        let identifier = required("account", account)?;
        let stored = self
            .accounts
            .get(identifier)
            .await?
            .ok_or_else(|| ActionError::UnknownAccount(identifier.to_string()))?;

        let connection = self
            .connector
            .connect(Some(&stored.credential))
            .await
            .map_err(|e| failed(identifier, operation, e))?;

        let guard = ConnectionGuard::new(Arc::clone(&connection));
        let result = op(connection).await;
        guard.close().await;

        match result {
            Ok(value) => {
                debug!(account = %identifier, operation = operation, "action completed");
                Ok(value)
            }
            Err(e) => Err(failed(identifier, operation, e)),
        }
    }
}

/// Closes the connection when dropped before [`ConnectionGuard::close`] ran,
/// e.g. when the caller stops polling the action mid-flight.
struct ConnectionGuard {
    connection: Option<Arc<dyn Connection>>,
}

impl ConnectionGuard {
    fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    async fn close(mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("action abandoned, closing its connection");
                handle.spawn(async move { connection.close().await });
            }
            Err(_) => warn!("action abandoned outside a runtime, connection left open"),
        }
    }
}

fn required<'a>(field: &str, value: &'a str) -> ActionResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ActionError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(value)
}

fn failed(account: &str, operation: &str, e: ProtocolError) -> ActionError {
    warn!(account = %account, operation = operation, error = %e, "action failed");
    ActionError::Protocol(e)
}
