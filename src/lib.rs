//! Courier - Messaging Account Session Manager
//!
//! Logs phone-number accounts into a messaging network, stores their
//! session credentials, keeps one reconnecting listener per account that
//! records every inbound message, and runs one-shot actions (chats, send,
//! history, profile) on behalf of stored accounts.
//!
//! - `messenger`: login flows, listener pool, actions, network boundary
//! - `store`: SQLite account repository and message log
//! - `api`: HTTP surface over the above

pub mod api;
pub mod logging;
pub mod messenger;
pub mod store;
