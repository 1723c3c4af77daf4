//! In-flight login flows.
//!
//! At most one pending flow per identifier. A flow owns the unauthenticated
//! connection that requested the code; whoever removes a flow from the store
//! (consume, overwrite, expiry) is responsible for closing that connection.
//!
//! Access to one identifier's flow is serialized through [`FlowSlot`], so
//! two concurrent logins for the same number cannot both consume the same
//! code. Different identifiers never block each other.

use super::traits::Connection;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Where a login flow currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStage {
    /// Code requested; waiting for the user to type it
    AwaitingCode,
    /// Code accepted; the account has a second-factor password
    AwaitingPassword,
}

/// A login flow between code request and completion
pub struct PendingAuth {
    pub identifier: String,
    pub challenge_token: String,
    pub stage: PendingStage,
    created_at: Instant,
    ttl: Duration,
    connection: Arc<dyn Connection>,
}

impl PendingAuth {
    pub fn new(
        identifier: impl Into<String>,
        challenge_token: impl Into<String>,
        ttl: Duration,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            challenge_token: challenge_token.into(),
            stage: PendingStage::AwaitingCode,
            created_at: Instant::now(),
            ttl,
            connection,
        }
    }

    /// The connection that requested the code
    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection)
    }

    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    pub fn challenge_matches(&self, challenge_token: &str) -> bool {
        self.challenge_token == challenge_token
    }

    /// Move to the second-factor stage with a fresh time window.
    pub fn await_password(&mut self, ttl: Duration) {
        self.stage = PendingStage::AwaitingPassword;
        self.created_at = Instant::now();
        self.ttl = ttl;
    }

    /// Drop the flow and release its connection.
    pub async fn close(self) {
        self.connection.close().await;
    }
}

impl fmt::Debug for PendingAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuth")
            .field("identifier", &self.identifier)
            .field("challenge_token", &self.challenge_token)
            .field("stage", &self.stage)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// What can be reported about a pending flow without handing out its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingView {
    pub identifier: String,
    pub stage: PendingStage,
    pub expires_in: Duration,
}

type Slot = Arc<AsyncMutex<Option<PendingAuth>>>;

/// Pending login flows keyed by identifier
#[derive(Default)]
pub struct AuthFlowStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl AuthFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to one identifier's flow, held until the guard drops.
    pub async fn slot(&self, identifier: &str) -> FlowSlot {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(slots.entry(identifier.to_string()).or_default())
        };

        FlowSlot {
            identifier: identifier.to_string(),
            guard: slot.lock_owned().await,
        }
    }

    /// Store a flow, returning the one it displaced (the caller closes it).
    pub async fn put(&self, pending: PendingAuth) -> Option<PendingAuth> {
        let identifier = pending.identifier.clone();
        self.slot(&identifier).await.put(pending)
    }

    /// Live flow for `identifier`. An expired flow is evicted and closed.
    pub async fn get(&self, identifier: &str) -> Option<PendingView> {
        let mut slot = self.slot(identifier).await;
        let now = Instant::now();
        slot.get().await.map(|pending| PendingView {
            identifier: pending.identifier.clone(),
            stage: pending.stage,
            expires_in: pending.remaining(now),
        })
    }

    /// Remove and close the flow for `identifier`. Returns whether one existed.
    pub async fn delete(&self, identifier: &str) -> bool {
        let mut slot = self.slot(identifier).await;
        slot.delete().await
    }

    /// Evict and close every expired flow. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let slots: Vec<(String, Slot)> = {
            let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots
                .iter()
                .map(|(identifier, slot)| (identifier.clone(), Arc::clone(slot)))
                .collect()
        };

        let now = Instant::now();
        let mut evicted = 0;
        for (identifier, slot) in slots {
            let expired = {
                let mut guard = slot.lock().await;
                if guard.as_ref().is_some_and(|pending| pending.is_expired(now)) {
                    guard.take()
                } else {
                    None
                }
            };
            if let Some(pending) = expired {
                debug!(account = %identifier, stage = ?pending.stage, "pending login expired");
                pending.close().await;
                evicted += 1;
            }
        }

        self.prune();
        evicted
    }

    /// Number of identifiers with a flow stored (expired ones included until swept)
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget empty slots nobody is waiting on.
    fn prune(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || match slot.try_lock() {
                    Ok(guard) => guard.is_some(),
                    Err(_) => true,
                }
        });
    }
}

/// Locked view of one identifier's flow
pub struct FlowSlot {
    identifier: String,
    guard: OwnedMutexGuard<Option<PendingAuth>>,
}

impl FlowSlot {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The live flow, if any. An expired flow is evicted and closed first.
    pub async fn get(&mut self) -> Option<&mut PendingAuth> {
        let expired = self
            .guard
            .as_ref()
            .is_some_and(|pending| pending.is_expired(Instant::now()));
        if expired {
            if let Some(pending) = self.guard.take() {
                debug!(account = %self.identifier, stage = ?pending.stage, "pending login expired");
                pending.close().await;
            }
        }
        self.guard.as_mut()
    }

    /// Store a flow, returning the one it displaced without closing it.
    pub fn put(&mut self, pending: PendingAuth) -> Option<PendingAuth> {
        self.guard.replace(pending)
    }

    /// Remove the flow without closing it (ownership moves to the caller).
    pub fn take(&mut self) -> Option<PendingAuth> {
        self.guard.take()
    }

    /// Remove and close the flow. Returns whether one existed.
    pub async fn delete(&mut self) -> bool {
        match self.guard.take() {
            Some(pending) => {
                pending.close().await;
                true
            }
            None => false,
        }
    }
}
