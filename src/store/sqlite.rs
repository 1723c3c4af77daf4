//! SQLite-backed account repository and message sink
//!
//! Credentials are stored as given. Protecting the database file at rest is
//! left to the deployment (filesystem permissions, encrypted volume).

use super::{Account, AccountRepository, ChatMessage, MessageSink, StoreResult};
use crate::messenger::traits::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        identifier TEXT PRIMARY KEY NOT NULL,
        credential TEXT NOT NULL,
        registered_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_identifier TEXT NOT NULL REFERENCES accounts(identifier) ON DELETE CASCADE,
        sender_display TEXT NOT NULL,
        body TEXT NOT NULL,
        received_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS chat_messages_by_account
        ON chat_messages(account_identifier, id)",
];

/// Accounts and received messages in one SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database (tests, dry runs).
    ///
    /// Pinned to a single connection that never expires, since every new
    /// connection to `:memory:` would see an empty database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// The last `limit` messages received for an account, oldest first.
    pub async fn recent_messages(
        &self,
        account_identifier: &str,
        limit: u32,
    ) -> StoreResult<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT account_identifier, sender_display, body, received_at FROM (
                SELECT id, account_identifier, sender_display, body, received_at
                FROM chat_messages
                WHERE account_identifier = ?1
                ORDER BY id DESC
                LIMIT ?2
            ) ORDER BY id ASC",
        )
        .bind(account_identifier)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// Number of stored messages for an account
    pub async fn message_count(&self, account_identifier: &str) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE account_identifier = ?1")
                .bind(account_identifier)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn account_from_row(row: &SqliteRow) -> StoreResult<Account> {
    let credential: String = row.try_get("credential")?;
    Ok(Account {
        identifier: row.try_get("identifier")?,
        credential: Credential::new(credential),
        registered_at: row.try_get::<DateTime<Utc>, _>("registered_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> StoreResult<ChatMessage> {
    Ok(ChatMessage {
        account_identifier: row.try_get("account_identifier")?,
        sender_display: row.try_get("sender_display")?,
        body: row.try_get("body")?,
        received_at: row.try_get::<DateTime<Utc>, _>("received_at")?,
    })
}

#[async_trait]
impl AccountRepository for SqliteStore {
    async fn upsert(&self, identifier: &str, credential: &Credential) -> StoreResult<Account> {
        // Credentials may legitimately be shared; uniqueness is on identifier only.
        let holders: Vec<String> = sqlx::query_scalar(
            "SELECT identifier FROM accounts WHERE credential = ?1 AND identifier != ?2",
        )
        .bind(credential.expose())
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;
        if !holders.is_empty() {
            warn!(
                account = %identifier,
                shared_with = ?holders,
                credential = %credential.fingerprint(),
                "credential already stored for another account"
            );
        }

        let row = sqlx::query(
            "INSERT INTO accounts (identifier, credential, registered_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identifier) DO UPDATE SET credential = excluded.credential
             RETURNING identifier, credential, registered_at",
        )
        .bind(identifier)
        .bind(credential.expose())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        account_from_row(&row)
    }

    async fn get(&self, identifier: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT identifier, credential, registered_at FROM accounts WHERE identifier = ?1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT identifier, credential, registered_at FROM accounts
             ORDER BY registered_at ASC, identifier ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(account_from_row).collect()
    }

    async fn remove(&self, identifier: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE identifier = ?1")
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MessageSink for SqliteStore {
    async fn append(&self, message: &ChatMessage) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO chat_messages (account_identifier, sender_display, body, received_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&message.account_identifier)
        .bind(&message.sender_display)
        .bind(&message.body)
        .bind(message.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message(account: &str, sender: &str, body: &str) -> ChatMessage {
        ChatMessage {
            account_identifier: account.to_string(),
            sender_display: sender.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_account() {
        let store = SqliteStore::open_in_memory().await.unwrap();

        let account = store
            .upsert("+10000000000", &Credential::new("cred-1"))
            .await
            .unwrap();

        assert_eq!(account.identifier, "+10000000000");
        assert_eq!(account.credential.expose(), "cred-1");

        let loaded = store.get("+10000000000").await.unwrap().unwrap();
        assert_eq!(loaded, account);
    }

    #[tokio::test]
    async fn test_upsert_replaces_credential_and_keeps_registration_time() {
        let store = SqliteStore::open_in_memory().await.unwrap();

        let first = store
            .upsert("+10000000000", &Credential::new("cred-1"))
            .await
            .unwrap();
        let second = store
            .upsert("+10000000000", &Credential::new("cred-2"))
            .await
            .unwrap();

        assert_eq!(second.credential.expose(), "cred-2");
        assert_eq!(second.registered_at, first.registered_at);

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].credential.expose(), "cred-2");
    }

    #[tokio::test]
    async fn test_shared_credential_is_allowed() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let shared = Credential::new("migrated-session");

        store.upsert("+10000000001", &shared).await.unwrap();
        store.upsert("+10000000002", &shared).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_unknown_account() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.get("+19999999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_cascades_to_messages() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert("+10000000000", &Credential::new("cred"))
            .await
            .unwrap();
        store
            .append(&message("+10000000000", "alice", "hi"))
            .await
            .unwrap();

        assert!(store.remove("+10000000000").await.unwrap());
        assert!(!store.remove("+10000000000").await.unwrap());
        assert_eq!(store.message_count("+10000000000").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert("+10000000000", &Credential::new("cred"))
            .await
            .unwrap();

        for body in ["E1", "E2", "E3"] {
            store
                .append(&message("+10000000000", "alice", body))
                .await
                .unwrap();
        }

        let stored = store.recent_messages("+10000000000", 10).await.unwrap();
        let bodies: Vec<&str> = stored.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["E1", "E2", "E3"]);

        // The last two, still oldest first
        let stored = store.recent_messages("+10000000000", 2).await.unwrap();
        let bodies: Vec<&str> = stored.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["E2", "E3"]);
    }

    #[tokio::test]
    async fn test_append_for_unknown_account_fails() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let result = store.append(&message("+19999999999", "bob", "hi")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_file_database_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("courier.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .upsert("+10000000000", &Credential::new("cred"))
                .await
                .unwrap();
            store.close().await;
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let account = store.get("+10000000000").await.unwrap().unwrap();
        assert_eq!(account.credential.expose(), "cred");
    }
}
