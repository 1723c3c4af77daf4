//! Listener Pool
//!
//! One long-running task per stored account. Each task:
//! - opens a connection with the account's credential
//! - stores every inbound message through the [`MessageSink`] before reading the next
//! - reconnects with exponential backoff when the connection drops
//! - stops for good when the network rejects the credential
//!
//! Every task runs under a child of the pool's cancellation token.
//! [`ListenerPool::stop`] cancels the parent and waits for every task, so
//! nothing is stored after it returns. Cancellation is only observed while
//! waiting (for a connection, an event or a backoff timer); an append that
//! has started always completes.

use super::retry::{Backoff, BackoffPolicy};
use super::traits::{Connection, Connector, InboundEvent};
use crate::store::{Account, AccountRepository, ChatMessage, MessageSink, StoreError};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one account's listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerStatus {
    Starting,
    Running,
    Reconnecting,
    Stopped,
}

/// Snapshot of one account's listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerEntry {
    pub account_identifier: String,
    pub status: ListenerStatus,
    pub last_error: Option<String>,
    /// Times the listener has entered `Reconnecting`
    pub reconnects: u32,
    /// Messages stored since the listener was spawned
    pub messages_stored: u64,
}

impl ListenerEntry {
    fn starting(account_identifier: &str) -> Self {
        Self {
            account_identifier: account_identifier.to_string(),
            status: ListenerStatus::Starting,
            last_error: None,
            reconnects: 0,
            messages_stored: 0,
        }
    }
}

/// Outcome of [`ListenerPool::start`]: every entry after its first attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub entries: Vec<ListenerEntry>,
}

impl StartReport {
    pub fn count(&self, status: ListenerStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Entries that did not reach `Running` on their first attempt
    pub fn failures(&self) -> impl Iterator<Item = &ListenerEntry> {
        self.entries
            .iter()
            .filter(|e| e.status != ListenerStatus::Running)
    }
}

/// Errors from pool management calls
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Listener already running for {0}")]
    AlreadyRunning(String),

    #[error("Listener pool has been stopped")]
    ShutDown,

    #[error("Failed to load accounts: {0}")]
    Store(#[from] StoreError),
}

impl PoolError {
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::AlreadyRunning(_) => "already_running",
            PoolError::ShutDown => "shut_down",
            PoolError::Store(_) => "persistence",
        }
    }
}

type Entries = Arc<Mutex<HashMap<String, ListenerEntry>>>;

struct ListenerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor for every account's listener
pub struct ListenerPool {
    connector: Arc<dyn Connector>,
    accounts: Arc<dyn AccountRepository>,
    sink: Arc<dyn MessageSink>,
    backoff: BackoffPolicy,
    shutdown: CancellationToken,
    entries: Entries,
    tasks: AsyncMutex<HashMap<String, ListenerTask>>,
}

impl ListenerPool {
    pub fn new(
        connector: Arc<dyn Connector>,
        accounts: Arc<dyn AccountRepository>,
        sink: Arc<dyn MessageSink>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            connector,
            accounts,
            sink,
            backoff,
            shutdown: CancellationToken::new(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            tasks: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Spawn a listener for every stored account.
    ///
    /// Returns once each listener is `Running` or has recorded its first
    /// failure. Accounts that already have an active listener are skipped.
    pub async fn start(&self) -> Result<StartReport, PoolError> {
        let accounts = self.accounts.list().await?;
        info!(accounts = accounts.len(), "starting listener pool");

        let mut ready = Vec::with_capacity(accounts.len());
        {
            let mut tasks = self.tasks.lock().await;
            for account in accounts {
                let identifier = account.identifier.clone();
                match self.launch(&mut tasks, account) {
                    Ok(rx) => ready.push(rx),
                    Err(PoolError::AlreadyRunning(_)) => {
                        debug!(account = %identifier, "listener already running, skipping");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        join_all(ready).await;

        let report = StartReport {
            entries: self.snapshot(),
        };
        info!(
            running = report.count(ListenerStatus::Running),
            reconnecting = report.count(ListenerStatus::Reconnecting),
            stopped = report.count(ListenerStatus::Stopped),
            "listener pool started"
        );
        Ok(report)
    }

    /// Spawn a listener for one account and wait for its first attempt.
    ///
    /// Rejected if the account already has a listener that is not `Stopped`.
    pub async fn spawn(&self, account: Account) -> Result<ListenerEntry, PoolError> {
        let identifier = account.identifier.clone();
        let ready = {
            let mut tasks = self.tasks.lock().await;
            self.launch(&mut tasks, account)?
        };
        let _ = ready.await;
        self.entry(&identifier).ok_or(PoolError::ShutDown)
    }

    /// Replace the account's listener, e.g. after a new login changed its credential.
    pub async fn refresh(&self, account: Account) -> Result<ListenerEntry, PoolError> {
        let identifier = account.identifier.clone();
        let ready = {
            let mut tasks = self.tasks.lock().await;
            if let Some(previous) = tasks.remove(&identifier) {
                debug!(account = %identifier, "stopping listener for refresh");
                previous.cancel.cancel();
                if let Err(e) = previous.handle.await {
                    error!(account = %identifier, error = %e, "listener task failed");
                }
            }
            self.launch(&mut tasks, account)?
        };
        let _ = ready.await;
        self.entry(&identifier).ok_or(PoolError::ShutDown)
    }

    /// Cancel every listener and wait until each has closed its connection.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let tasks: Vec<(String, ListenerTask)> = self.tasks.lock().await.drain().collect();
        info!(listeners = tasks.len(), "stopping listener pool");

        for (identifier, task) in tasks {
            if let Err(e) = task.handle.await {
                error!(account = %identifier, error = %e, "listener task failed");
                update(&self.entries, &identifier, |entry| {
                    entry.status = ListenerStatus::Stopped;
                    entry.last_error = Some(e.to_string());
                });
            }
        }

        info!("listener pool stopped");
    }

    /// All entries, ordered by account identifier
    pub fn snapshot(&self) -> Vec<ListenerEntry> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let mut snapshot: Vec<ListenerEntry> = entries.values().cloned().collect();
        snapshot.sort_by(|a, b| a.account_identifier.cmp(&b.account_identifier));
        snapshot
    }

    pub fn entry(&self, identifier: &str) -> Option<ListenerEntry> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(identifier).cloned()
    }

    /// Start a listener task; the receiver fires after its first attempt.
    fn launch(
        &self,
        tasks: &mut HashMap<String, ListenerTask>,
        account: Account,
    ) -> Result<oneshot::Receiver<()>, PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }

        let identifier = account.identifier.clone();
        {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            let active = entries
                .get(&identifier)
                .is_some_and(|entry| entry.status != ListenerStatus::Stopped);
            if active {
                return Err(PoolError::AlreadyRunning(identifier));
            }
            entries.insert(identifier.clone(), ListenerEntry::starting(&identifier));
        }

        let cancel = self.shutdown.child_token();
        let (ready_tx, ready_rx) = oneshot::channel();
        let listener = Listener {
            account,
            connector: Arc::clone(&self.connector),
            sink: Arc::clone(&self.sink),
            backoff: self.backoff.schedule(),
            cancel: cancel.clone(),
            entries: Arc::clone(&self.entries),
            ready: Some(ready_tx),
        };

        let handle = tokio::spawn(listener.run());
        tasks.insert(identifier, ListenerTask { cancel, handle });
        Ok(ready_rx)
    }
}

fn update(entries: &Entries, identifier: &str, f: impl FnOnce(&mut ListenerEntry)) {
    let mut entries = entries.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(entry) = entries.get_mut(identifier) {
        f(entry);
    }
}

/// Why a connection stopped delivering events
enum Ended {
    Cancelled,
    Dropped(String),
}

/// State owned by one listener task
struct Listener {
    account: Account,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn MessageSink>,
    backoff: Backoff,
    cancel: CancellationToken,
    entries: Entries,
    ready: Option<oneshot::Sender<()>>,
}

impl Listener {
    async fn run(mut self) {
        let identifier = self.account.identifier.clone();

        loop {
            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(Some(&self.account.credential)) => result,
            };

            match connected {
                Ok(connection) => {
                    self.backoff.reset();
                    self.update(|entry| entry.status = ListenerStatus::Running);
                    self.signal_ready();
                    info!(account = %identifier, "listener connected");

                    let ended = self.pump(connection.as_ref()).await;
                    connection.close().await;

                    match ended {
                        Ended::Cancelled => break,
                        Ended::Dropped(reason) => {
                            warn!(account = %identifier, reason = %reason, "connection lost");
                            self.enter_reconnecting(reason);
                        }
                    }
                }
                Err(e) if e.is_permanent() => {
                    error!(
                        account = %identifier,
                        credential = %self.account.credential.fingerprint(),
                        error = %e,
                        "credential rejected, listener stopped"
                    );
                    self.update(|entry| {
                        entry.status = ListenerStatus::Stopped;
                        entry.last_error = Some(e.to_string());
                    });
                    self.signal_ready();
                    return;
                }
                Err(e) => {
                    warn!(
                        account = %identifier,
                        attempt = self.backoff.attempts() + 1,
                        error = %e,
                        "failed to connect"
                    );
                    self.enter_reconnecting(e.to_string());
                }
            }
            self.signal_ready();

            let delay = self.backoff.next_delay();
            debug!(account = %identifier, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.update(|entry| entry.status = ListenerStatus::Stopped);
        self.signal_ready();
        info!(account = %identifier, "listener stopped");
    }

    /// Read and store events until the connection ends or the task is cancelled.
    async fn pump(&mut self, connection: &dyn Connection) -> Ended {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ended::Cancelled,
                next = connection.next_event() => next,
            };

            match next {
                Ok(Some(event)) => self.store(event).await,
                Ok(None) => return Ended::Dropped("connection closed by peer".to_string()),
                Err(e) => return Ended::Dropped(e.to_string()),
            }
        }
    }

    /// Persist one event. Failures are logged and the event is dropped.
    async fn store(&mut self, event: InboundEvent) {
        let message = ChatMessage {
            account_identifier: self.account.identifier.clone(),
            sender_display: event.sender.display_name(),
            body: event.body,
            received_at: event.received_at,
        };

        match self.sink.append(&message).await {
            Ok(()) => {
                debug!(
                    account = %message.account_identifier,
                    sender = %message.sender_display,
                    "message stored"
                );
                self.update(|entry| entry.messages_stored += 1);
            }
            Err(e) => {
                error!(
                    account = %message.account_identifier,
                    sender = %message.sender_display,
                    error = %e,
                    "failed to store message, dropping it"
                );
            }
        }
    }

    fn enter_reconnecting(&mut self, reason: String) {
        self.update(|entry| {
            entry.status = ListenerStatus::Reconnecting;
            entry.last_error = Some(reason);
            entry.reconnects = entry.reconnects.saturating_add(1);
        });
    }

    fn update(&self, f: impl FnOnce(&mut ListenerEntry)) {
        update(&self.entries, &self.account.identifier, f);
    }

    fn signal_ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }
    }
}
