//! Messaging Network Session Lifecycle
//!
//! Turns phone numbers into stored accounts and keeps every stored account
//! connected:
//! - `auth`: code request → code → optional second factor → credential
//! - `pending`: in-flight logins, one per phone number, with expiry
//! - `listener`: one reconnecting listener per account, storing every inbound message
//! - `actions`: one-shot calls (chats, send, history, profile) on a stored account
//!
//! The network itself sits behind the `traits` boundary: `gateway` talks to
//! a protocol gateway over HTTP, `mock` is an in-memory network for tests.

pub mod actions;
pub mod auth;
pub mod gateway;
pub mod listener;
pub mod mock;
pub mod pending;
pub mod retry;
pub mod traits;

pub use actions::{ActionError, ActionService};
pub use auth::{AuthError, AuthService, AuthSettings, CodeRequested, VerifyOutcome};
pub use gateway::{GatewayConfig, GatewayConnector};
pub use listener::{ListenerEntry, ListenerPool, ListenerStatus, PoolError, StartReport};
pub use mock::MockNetwork;
pub use pending::{AuthFlowStore, PendingStage};
pub use retry::BackoffPolicy;
pub use traits::{Connection, Connector, Credential, ProtocolError, ProtocolResult};
