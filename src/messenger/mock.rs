//! Mock Messaging Network for Testing
//!
//! In-memory network that behaves like the real one at the [`Connector`] /
//! [`Connection`] boundary: code requests, sign-in with optional second
//! factor, credentials, inbound events, dropped connections, rate limits.
//! It also counts connections and network calls so tests can assert that
//! nothing leaks.

use super::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Code validity reported by default on code requests
pub const DEFAULT_CODE_VALIDITY: Duration = Duration::from_secs(120);

/// Mock network shared by every connection it opens
#[derive(Clone)]
pub struct MockNetwork {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    accounts: HashMap<String, MockAccount>,
    /// credential -> phone
    credentials: HashMap<String, String>,
    revoked: HashSet<String>,
    rate_limits: HashMap<String, Duration>,
    /// credential -> remaining simulated connect failures
    connect_failures: HashMap<String, u32>,
    code_validity: Option<Duration>,
    /// Phones whose history requests never answer
    stalled: HashSet<String>,
    /// phone -> (connection id, inbox) of the connection reading events
    live: HashMap<String, (u64, mpsc::UnboundedSender<MockSignal>)>,
    /// Events pushed while nobody was reading, per phone
    backlog: HashMap<String, Vec<InboundEvent>>,
    sent: Vec<SentMessage>,
    open: HashSet<u64>,
    next_connection: u64,
    issued_codes: u64,
    next_credential: u64,
    network_calls: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            credentials: HashMap::new(),
            revoked: HashSet::new(),
            rate_limits: HashMap::new(),
            connect_failures: HashMap::new(),
            code_validity: Some(DEFAULT_CODE_VALIDITY),
            stalled: HashSet::new(),
            live: HashMap::new(),
            backlog: HashMap::new(),
            sent: Vec::new(),
            open: HashSet::new(),
            next_connection: 0,
            issued_codes: 0,
            next_credential: 0,
            network_calls: 0,
        }
    }
}

struct MockAccount {
    code: String,
    code_expired: bool,
    password: Option<String>,
    chats: Vec<ChatSummary>,
    /// target -> messages, oldest first
    history: HashMap<String, Vec<HistoryMessage>>,
    profile: Profile,
}

enum MockSignal {
    Event(InboundEvent),
    Drop(String),
}

/// Message sent through the mock network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub from: String,
    pub target: String,
    pub body: String,
}

impl MockNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Register a phone number whose one-time code will be `code`
    pub fn add_account(&self, phone: &str, code: &str) {
        let mut state = self.state.lock().unwrap();
        let id = 1000 + state.accounts.len() as i64;
        state.accounts.insert(
            phone.to_string(),
            MockAccount {
                code: code.to_string(),
                code_expired: false,
                password: None,
                chats: Vec::new(),
                history: HashMap::new(),
                profile: Profile {
                    id,
                    first_name: None,
                    last_name: None,
                    handle: None,
                    phone: Some(phone.trim_start_matches('+').to_string()),
                },
            },
        );
    }

    /// Require a second-factor password for `phone`
    pub fn set_password(&self, phone: &str, password: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(phone) {
            account.password = Some(password.to_string());
        }
    }

    /// Make the next sign-in for `phone` fail with an expired code
    pub fn expire_code(&self, phone: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(phone) {
            account.code_expired = true;
        }
    }

    /// Answer code requests for `phone` with a flood wait
    pub fn rate_limit(&self, phone: &str, retry_after: Duration) {
        let mut state = self.state.lock().unwrap();
        state.rate_limits.insert(phone.to_string(), retry_after);
    }

    /// Code validity reported on code requests (`None` = not reported)
    pub fn set_code_validity(&self, validity: Option<Duration>) {
        self.state.lock().unwrap().code_validity = validity;
    }

    /// Mint a valid credential for `phone` without going through sign-in
    pub fn issue_credential(&self, phone: &str) -> Credential {
        let mut state = self.state.lock().unwrap();
        if !state.accounts.contains_key(phone) {
            drop(state);
            self.add_account(phone, "00000");
            state = self.state.lock().unwrap();
        }
        mint_credential(&mut state, phone)
    }

    /// Reject `credential` from now on
    pub fn revoke(&self, credential: &Credential) {
        let mut state = self.state.lock().unwrap();
        state.revoked.insert(credential.expose().to_string());
    }

    /// Fail the next `count` connection attempts made with `credential`
    pub fn fail_next_connects(&self, credential: &Credential, count: u32) {
        let mut state = self.state.lock().unwrap();
        state
            .connect_failures
            .insert(credential.expose().to_string(), count);
    }

    /// Make every history request of `phone` hang forever
    pub fn stall_history(&self, phone: &str) {
        self.state.lock().unwrap().stalled.insert(phone.to_string());
    }

    /// Deliver an inbound message to `phone`'s listening connection
    pub fn push_event(&self, phone: &str, event: InboundEvent) {
        let mut state = self.state.lock().unwrap();
        let event = match state.live.get(phone) {
            Some((_, inbox)) => match inbox.send(MockSignal::Event(event)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(MockSignal::Event(event))) => event,
                Err(_) => return,
            },
            None => event,
        };
        state.backlog.entry(phone.to_string()).or_default().push(event);
    }

    /// Convenience wrapper around [`MockNetwork::push_event`]
    pub fn push_text(&self, phone: &str, sender: Peer, body: &str) {
        self.push_event(
            phone,
            InboundEvent {
                sender,
                body: body.to_string(),
                received_at: Utc::now(),
            },
        );
    }

    /// Drop the listening connection of `phone`. Returns false if nobody listens.
    pub fn drop_connection(&self, phone: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.live.remove(phone) {
            Some((_, inbox)) => inbox
                .send(MockSignal::Drop("connection reset by peer".to_string()))
                .is_ok(),
            None => false,
        }
    }

    /// Whether a connection of `phone` is currently reading events
    pub fn is_listening(&self, phone: &str) -> bool {
        self.state.lock().unwrap().live.contains_key(phone)
    }

    pub fn add_chat(&self, phone: &str, chat: ChatSummary) {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(phone) {
            account.chats.push(chat);
        }
    }

    /// Append a message to a conversation's history (oldest first)
    pub fn add_history(&self, phone: &str, target: &str, message: HistoryMessage) {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(phone) {
            account
                .history
                .entry(target.to_string())
                .or_default()
                .push(message);
        }
    }

    pub fn set_profile(&self, phone: &str, profile: Profile) {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(phone) {
            account.profile = profile;
        }
    }

    /// Messages sent through any connection
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    /// Connections opened since the network was created
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().unwrap().next_connection
    }

    /// Codes successfully issued since the network was created
    pub fn codes_issued(&self) -> u64 {
        self.state.lock().unwrap().issued_codes
    }

    /// Protocol calls made on any connection (connect/close excluded)
    pub fn network_calls(&self) -> u64 {
        self.state.lock().unwrap().network_calls
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn mint_credential(state: &mut MockState, phone: &str) -> Credential {
    state.next_credential += 1;
    let token = format!("session-{}-{}", phone, state.next_credential);
    state.credentials.insert(token.clone(), phone.to_string());
    Credential::new(token)
}

#[async_trait]
impl Connector for MockNetwork {
    async fn connect(&self, credential: Option<&Credential>) -> ProtocolResult<Arc<dyn Connection>> {
        let mut state = self.state.lock().unwrap();

        let phone = match credential {
            None => None,
            Some(credential) => {
                let token = credential.expose();
                if state.revoked.contains(token) {
                    return Err(ProtocolError::Unauthorized);
                }
                if let Some(remaining) = state.connect_failures.get_mut(token) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(ProtocolError::Network(
                            "simulated connect failure".to_string(),
                        ));
                    }
                }
                match state.credentials.get(token) {
                    Some(phone) => Some(phone.clone()),
                    None => return Err(ProtocolError::Unauthorized),
                }
            }
        };

        state.next_connection += 1;
        let id = state.next_connection;
        state.open.insert(id);

        Ok(Arc::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
            session: Mutex::new(Session {
                phone,
                ..Default::default()
            }),
            inbox: tokio::sync::Mutex::new(None),
        }))
    }
}

#[derive(Default)]
struct Session {
    /// Signed-in account
    phone: Option<String>,
    /// Phone and challenge of the last code request
    pending: Option<(String, String)>,
    awaiting_password: bool,
    closed: bool,
}

struct MockConnection {
    id: u64,
    state: Arc<Mutex<MockState>>,
    session: Mutex<Session>,
    inbox: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<MockSignal>>>,
}

impl MockConnection {
    /// Count a network call; fails on a closed connection.
    fn call(&self) -> ProtocolResult<()> {
        if self.session.lock().unwrap().closed {
            return Err(ProtocolError::Disconnected("connection closed".to_string()));
        }
        self.state.lock().unwrap().network_calls += 1;
        Ok(())
    }

    fn signed_in_phone(&self) -> ProtocolResult<String> {
        self.session
            .lock()
            .unwrap()
            .phone
            .clone()
            .ok_or(ProtocolError::Unauthorized)
    }

    fn authorize(&self, phone: String) {
        let mut session = self.session.lock().unwrap();
        session.phone = Some(phone);
        session.pending = None;
        session.awaiting_password = false;
    }

    /// Register as the listening connection and take over queued events.
    fn subscribe(&self) -> ProtocolResult<mpsc::UnboundedReceiver<MockSignal>> {
        let phone = self.signed_in_phone()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock().unwrap();
        for event in state.backlog.remove(&phone).unwrap_or_default() {
            let _ = tx.send(MockSignal::Event(event));
        }
        state.live.insert(phone, (self.id, tx));
        Ok(rx)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn request_code(&self, phone: &str) -> ProtocolResult<CodeIssued> {
        self.call()?;

        let mut state = self.state.lock().unwrap();
        if let Some(retry_after) = state.rate_limits.get(phone) {
            return Err(ProtocolError::RateLimited {
                retry_after: *retry_after,
            });
        }
        if !state.accounts.contains_key(phone) {
            return Err(ProtocolError::Protocol("PHONE_NUMBER_INVALID".to_string()));
        }

        state.issued_codes += 1;
        let challenge_token = uuid::Uuid::new_v4().simple().to_string();
        let valid_for = state.code_validity;
        drop(state);

        self.session.lock().unwrap().pending = Some((phone.to_string(), challenge_token.clone()));

        Ok(CodeIssued {
            challenge_token,
            valid_for,
        })
    }

    async fn sign_in(&self, phone: &str, code: &str, challenge_token: &str) -> ProtocolResult<()> {
        self.call()?;

        let issued = self.session.lock().unwrap().pending.clone();
        match issued {
            Some((issued_phone, issued_token))
                if issued_phone == phone && issued_token == challenge_token => {}
            _ => return Err(ProtocolError::Protocol("PHONE_CODE_HASH_INVALID".to_string())),
        }

        let needs_password = {
            let state = self.state.lock().unwrap();
            let account = state
                .accounts
                .get(phone)
                .ok_or_else(|| ProtocolError::Protocol("PHONE_NUMBER_INVALID".to_string()))?;
            if account.code_expired {
                return Err(ProtocolError::ExpiredCode);
            }
            if account.code != code {
                return Err(ProtocolError::InvalidCode);
            }
            account.password.is_some()
        };

        if needs_password {
            self.session.lock().unwrap().awaiting_password = true;
            return Err(ProtocolError::PasswordRequired);
        }

        self.authorize(phone.to_string());
        Ok(())
    }

    async fn check_password(&self, password: &str) -> ProtocolResult<()> {
        self.call()?;

        let phone = {
            let session = self.session.lock().unwrap();
            match (&session.pending, session.awaiting_password) {
                (Some((phone, _)), true) => phone.clone(),
                _ => return Err(ProtocolError::Protocol("PASSWORD_NOT_REQUESTED".to_string())),
            }
        };

        let matches = {
            let state = self.state.lock().unwrap();
            state
                .accounts
                .get(&phone)
                .and_then(|account| account.password.as_deref())
                == Some(password)
        };
        if !matches {
            return Err(ProtocolError::InvalidPassword);
        }

        self.authorize(phone);
        Ok(())
    }

    async fn export_credential(&self) -> ProtocolResult<Credential> {
        self.call()?;
        let phone = self.signed_in_phone()?;
        let mut state = self.state.lock().unwrap();
        Ok(mint_credential(&mut state, &phone))
    }

    async fn list_chats(&self) -> ProtocolResult<Vec<ChatSummary>> {
        self.call()?;
        let phone = self.signed_in_phone()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .accounts
            .get(&phone)
            .map(|account| account.chats.clone())
            .unwrap_or_default())
    }

    async fn send_message(&self, target: &str, body: &str) -> ProtocolResult<()> {
        self.call()?;
        let phone = self.signed_in_phone()?;
        let mut state = self.state.lock().unwrap();
        state.sent.push(SentMessage {
            from: phone,
            target: target.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn history(&self, target: &str, limit: u32) -> ProtocolResult<Vec<HistoryMessage>> {
        self.call()?;
        let phone = self.signed_in_phone()?;
        let stalled = self.state.lock().unwrap().stalled.contains(&phone);
        if stalled {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        let messages = state
            .accounts
            .get(&phone)
            .and_then(|account| account.history.get(target))
            .ok_or_else(|| ProtocolError::Protocol("PEER_ID_INVALID".to_string()))?;

        Ok(messages
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn me(&self) -> ProtocolResult<Profile> {
        self.call()?;
        let phone = self.signed_in_phone()?;
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(&phone)
            .map(|account| account.profile.clone())
            .ok_or(ProtocolError::Unauthorized)
    }

    async fn next_event(&self) -> ProtocolResult<Option<InboundEvent>> {
        if self.session.lock().unwrap().closed {
            return Err(ProtocolError::Disconnected("connection closed".to_string()));
        }

        let mut inbox = self.inbox.lock().await;
        if inbox.is_none() {
            *inbox = Some(self.subscribe()?);
        }
        let Some(rx) = inbox.as_mut() else {
            return Ok(None);
        };

        match rx.recv().await {
            Some(MockSignal::Event(event)) => Ok(Some(event)),
            Some(MockSignal::Drop(reason)) => Err(ProtocolError::Disconnected(reason)),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        {
            let mut session = self.session.lock().unwrap();
            if session.closed {
                return;
            }
            session.closed = true;
        }

        let mut state = self.state.lock().unwrap();
        state.open.remove(&self.id);
        let ours = state
            .live
            .iter()
            .find(|(_, (id, _))| *id == self.id)
            .map(|(phone, _)| phone.clone());
        if let Some(phone) = ours {
            state.live.remove(&phone);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "+10000000000";

    async fn signed_in(network: &MockNetwork) -> Arc<dyn Connection> {
        let credential = network.issue_credential(PHONE);
        network.connect(Some(&credential)).await.unwrap()
    }

    #[tokio::test]
    async fn test_code_sign_in_flow() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");

        let conn = network.connect(None).await.unwrap();
        let issued = conn.request_code(PHONE).await.unwrap();
        assert_eq!(issued.valid_for, Some(DEFAULT_CODE_VALIDITY));

        conn.sign_in(PHONE, "12345", &issued.challenge_token)
            .await
            .unwrap();
        let credential = conn.export_credential().await.unwrap();
        conn.close().await;

        // The exported credential opens a signed-in connection
        let resumed = network.connect(Some(&credential)).await.unwrap();
        assert!(resumed.me().await.is_ok());
        resumed.close().await;
        assert_eq!(network.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_wrong_code_and_password_flow() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        network.set_password(PHONE, "hunter2");

        let conn = network.connect(None).await.unwrap();
        let issued = conn.request_code(PHONE).await.unwrap();

        assert_eq!(
            conn.sign_in(PHONE, "99999", &issued.challenge_token).await,
            Err(ProtocolError::InvalidCode)
        );
        assert_eq!(
            conn.sign_in(PHONE, "12345", &issued.challenge_token).await,
            Err(ProtocolError::PasswordRequired)
        );
        assert_eq!(
            conn.check_password("nope").await,
            Err(ProtocolError::InvalidPassword)
        );
        conn.check_password("hunter2").await.unwrap();
        assert!(conn.export_credential().await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        network.rate_limit(PHONE, Duration::from_secs(42));

        let conn = network.connect(None).await.unwrap();
        assert_eq!(
            conn.request_code(PHONE).await,
            Err(ProtocolError::RateLimited {
                retry_after: Duration::from_secs(42)
            })
        );
    }

    #[tokio::test]
    async fn test_revoked_and_flaky_credentials() {
        let network = MockNetwork::new();
        let credential = network.issue_credential(PHONE);

        network.fail_next_connects(&credential, 1);
        assert!(matches!(
            network.connect(Some(&credential)).await,
            Err(ProtocolError::Network(_))
        ));
        assert!(network.connect(Some(&credential)).await.is_ok());

        network.revoke(&credential);
        assert!(matches!(
            network.connect(Some(&credential)).await,
            Err(ProtocolError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_events_are_queued_until_someone_listens() {
        let network = MockNetwork::new();
        let conn = signed_in(&network).await;

        network.push_text(PHONE, Peer::default(), "early");
        assert!(!network.is_listening(PHONE));

        let event = conn.next_event().await.unwrap().unwrap();
        assert_eq!(event.body, "early");
        assert!(network.is_listening(PHONE));

        network.push_text(PHONE, Peer::default(), "live");
        let event = conn.next_event().await.unwrap().unwrap();
        assert_eq!(event.body, "live");
    }

    #[tokio::test]
    async fn test_drop_connection() {
        let network = MockNetwork::new();
        let conn = signed_in(&network).await;

        network.push_text(PHONE, Peer::default(), "first");
        conn.next_event().await.unwrap();

        assert!(network.drop_connection(PHONE));
        assert!(matches!(
            conn.next_event().await,
            Err(ProtocolError::Disconnected(_))
        ));
        assert!(!network.drop_connection(PHONE));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let network = MockNetwork::new();
        let conn = signed_in(&network).await;

        for id in 1..=5 {
            network.add_history(
                PHONE,
                "alice",
                HistoryMessage {
                    id,
                    text: format!("m{}", id),
                    sender_id: Some(7),
                    sent_at: Utc::now(),
                    reply_to: None,
                },
            );
        }

        let messages = conn.history("alice", 2).await.unwrap();
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let network = MockNetwork::new();
        let conn = network.connect(None).await.unwrap();
        assert_eq!(network.open_connections(), 1);

        conn.close().await;
        conn.close().await;
        assert_eq!(network.open_connections(), 0);
        assert!(conn.request_code(PHONE).await.is_err());
    }
}
