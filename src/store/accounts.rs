//! Account repository

use super::StoreResult;
use crate::messenger::traits::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One registered messaging account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Phone number; unique
    pub identifier: String,
    /// Durable session credential; never logged
    pub credential: Credential,
    /// Set when the identifier was first stored, never updated
    pub registered_at: DateTime<Utc>,
}

/// Durable store of [`Account`] records.
///
/// Implementations serialize concurrent upserts of the same identifier
/// themselves; callers never lock around them.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert the account, or replace the credential of an existing one.
    /// `registered_at` of an existing account is preserved.
    async fn upsert(&self, identifier: &str, credential: &Credential) -> StoreResult<Account>;

    async fn get(&self, identifier: &str) -> StoreResult<Option<Account>>;

    /// All accounts, ordered by registration time
    async fn list(&self) -> StoreResult<Vec<Account>>;

    /// Delete an account and its stored messages. Returns whether it existed.
    async fn remove(&self, identifier: &str) -> StoreResult<bool>;
}
