//! Durable Storage
//!
//! Two concerns share one SQLite database:
//! - the account repository (phone identifier -> durable credential)
//! - the append-only log of messages received by listeners
//!
//! Both are traits so the session lifecycle can be tested against other
//! backends; [`SqliteStore`] implements both.

pub mod accounts;
pub mod messages;
pub mod sqlite;

pub use accounts::{Account, AccountRepository};
pub use messages::{ChatMessage, MessageSink};
pub use sqlite::SqliteStore;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
