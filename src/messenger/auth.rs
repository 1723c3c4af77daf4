//! Account login: phone number → one-time code → (second factor) → credential.
//!
//! Each step is a separate call, possibly minutes apart and from different
//! HTTP requests, so the flow in between lives in the [`AuthFlowStore`]
//! together with the connection that requested the code. That connection is
//! closed on every terminal transition; only the second-factor step keeps it.

use super::pending::{AuthFlowStore, FlowSlot, PendingAuth, PendingStage, PendingView};
use super::traits::{Connection, Connector, ProtocolError};
use crate::store::{Account, AccountRepository, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default lifetime of a pending login after a code request
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(10 * 60);

/// Default window for entering the second-factor password
pub const DEFAULT_SECOND_FACTOR_TTL: Duration = Duration::from_secs(5 * 60);

/// Login flow states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unstarted,
    CodeRequested,
    SecondFactorRequired,
    Verified,
    Authenticated,
    Failed,
}

/// Inputs that move a login flow between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    CodeIssued,
    CodeAccepted,
    PasswordRequired,
    PasswordAccepted,
    CredentialStored,
    Rejected,
}

impl AuthState {
    /// Next state, or `None` if `event` cannot happen in this state.
    pub fn on(self, event: AuthEvent) -> Option<AuthState> {
        use AuthEvent::*;
        use AuthState::*;

        match (self, event) {
            (Unstarted, CodeIssued) => Some(CodeRequested),
            (CodeRequested, CodeAccepted) => Some(Verified),
            (CodeRequested, PasswordRequired) => Some(SecondFactorRequired),
            (SecondFactorRequired, PasswordAccepted) => Some(Verified),
            (Verified, CredentialStored) => Some(Authenticated),
            (Unstarted | CodeRequested | SecondFactorRequired | Verified, Rejected) => Some(Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }
}

fn advance(phone: &str, from: AuthState, event: AuthEvent) -> AuthState {
    match from.on(event) {
        Some(to) => {
            debug!(phone = %phone, from = ?from, event = ?event, to = ?to, "login state changed");
            to
        }
        None => {
            warn!(phone = %phone, from = ?from, event = ?event, "unexpected login transition");
            AuthState::Failed
        }
    }
}

/// Result type for login operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors reported by login operations
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Too many attempts, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code expired")]
    ExpiredCode,

    #[error("Invalid second-factor password")]
    InvalidPassword,

    #[error("Challenge token does not match the pending login")]
    ChallengeMismatch,

    #[error("No pending login for this phone number")]
    NoPendingFlow,

    #[error("Code already accepted, second-factor password expected")]
    SecondFactorPending,

    #[error("Second-factor password was not requested")]
    SecondFactorNotRequested,

    #[error("Failed to store account: {0}")]
    Persistence(#[from] StoreError),

    #[error("Authentication step failed: {0}")]
    StepFailed(String),
}

impl AuthError {
    /// Stable machine-readable name
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidInput(_) => "invalid_input",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::InvalidCode => "invalid_code",
            AuthError::ExpiredCode => "expired_code",
            AuthError::InvalidPassword => "invalid_password",
            AuthError::ChallengeMismatch => "challenge_mismatch",
            AuthError::NoPendingFlow => "no_pending_flow",
            AuthError::SecondFactorPending => "second_factor_pending",
            AuthError::SecondFactorNotRequested => "second_factor_not_requested",
            AuthError::Persistence(_) => "persistence",
            AuthError::StepFailed(_) => "step_failed",
        }
    }

    /// Whether the same call may succeed later without user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::RateLimited { .. })
    }
}

/// Answer to a code request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequested {
    pub challenge_token: String,
    pub code_valid_seconds: u64,
}

/// Answer to a code or password submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Credential stored; the account can be listened on
    Authenticated(Account),
    /// The account has a second factor; call `submit_password`
    SecondFactorRequired,
}

/// Timing knobs for login flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSettings {
    /// Upper bound on a pending login after the code request
    pub code_ttl: Duration,
    /// Fresh window granted once the code is accepted and a password is needed
    pub second_factor_ttl: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            code_ttl: DEFAULT_CODE_TTL,
            second_factor_ttl: DEFAULT_SECOND_FACTOR_TTL,
        }
    }
}

/// Drives login flows against the network and stores resulting accounts
pub struct AuthService {
    connector: Arc<dyn Connector>,
    accounts: Arc<dyn AccountRepository>,
    flows: Arc<AuthFlowStore>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        connector: Arc<dyn Connector>,
        accounts: Arc<dyn AccountRepository>,
        flows: Arc<AuthFlowStore>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            connector,
            accounts,
            flows,
            settings,
        }
    }

    /// Pending logins, shared with whoever sweeps them
    pub fn flows(&self) -> &Arc<AuthFlowStore> {
        &self.flows
    }

    /// Current pending login for `phone`, if any
    pub async fn pending(&self, phone: &str) -> Option<PendingView> {
        self.flows.get(phone.trim()).await
    }

    /// Ask the network to send a login code to `phone`.
    ///
    /// Replaces any pending login for the same number. The account
    /// repository is not touched.
    pub async fn request_code(&self, phone: &str) -> AuthResult<CodeRequested> {
        let phone = required("phone", phone)?;

        let connection = self
            .connector
            .connect(None)
            .await
            .map_err(|e| step_failed(phone, "connect", e))?;

        let issued = match connection.request_code(phone).await {
            Ok(issued) => issued,
            Err(ProtocolError::RateLimited { retry_after }) => {
                connection.close().await;
                warn!(
                    phone = %phone,
                    retry_after_secs = retry_after.as_secs(),
                    "code request rate limited"
                );
                return Err(AuthError::RateLimited { retry_after });
            }
            Err(e) => {
                connection.close().await;
                return Err(step_failed(phone, "request_code", e));
            }
        };

        let ttl = issued
            .valid_for
            .map_or(self.settings.code_ttl, |valid| valid.min(self.settings.code_ttl));
        let challenge_token = issued.challenge_token;

        let mut slot = self.flows.slot(phone).await;
        if let Some(displaced) = slot.take() {
            debug!(phone = %phone, "replacing pending login");
            displaced.close().await;
        }
        slot.put(PendingAuth::new(phone, challenge_token.clone(), ttl, connection));
        advance(phone, AuthState::Unstarted, AuthEvent::CodeIssued);

        info!(phone = %phone, valid_secs = ttl.as_secs(), "login code requested");

        Ok(CodeRequested {
            challenge_token,
            code_valid_seconds: ttl.as_secs(),
        })
    }

    /// Submit the code received for `phone`.
    pub async fn verify_code(
        &self,
        phone: &str,
        code: &str,
        challenge_token: &str,
    ) -> AuthResult<VerifyOutcome> {
        let phone = required("phone", phone)?;
        let code = required("code", code)?;
        let challenge_token = challenge(challenge_token)?;

        let mut slot = self.flows.slot(phone).await;
        let connection = live_flow(&mut slot, challenge_token, PendingStage::AwaitingCode).await?;

        match connection.sign_in(phone, code, challenge_token).await {
            Ok(()) => {
                let state = advance(phone, AuthState::CodeRequested, AuthEvent::CodeAccepted);
                self.complete(&mut slot, &connection, phone, state)
                    .await
                    .map(VerifyOutcome::Authenticated)
            }
            Err(ProtocolError::PasswordRequired) => {
                if let Some(mut pending) = slot.take() {
                    pending.await_password(self.settings.second_factor_ttl);
                    slot.put(pending);
                }
                advance(phone, AuthState::CodeRequested, AuthEvent::PasswordRequired);
                info!(phone = %phone, "second-factor password required");
                Ok(VerifyOutcome::SecondFactorRequired)
            }
            Err(e) => {
                advance(phone, AuthState::CodeRequested, AuthEvent::Rejected);
                release(&mut slot, &connection).await;
                Err(rejected(phone, "sign_in", e))
            }
        }
    }

    /// Submit the second-factor password after `SecondFactorRequired`.
    ///
    /// A wrong password ends the flow; the user starts over with a new code.
    pub async fn submit_password(
        &self,
        phone: &str,
        password: &str,
        challenge_token: &str,
    ) -> AuthResult<VerifyOutcome> {
        let phone = required("phone", phone)?;
        if password.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty".to_string()));
        }
        let challenge_token = challenge(challenge_token)?;

        let mut slot = self.flows.slot(phone).await;
        let connection =
            live_flow(&mut slot, challenge_token, PendingStage::AwaitingPassword).await?;

        match connection.check_password(password).await {
            Ok(()) => {
                let state = advance(
                    phone,
                    AuthState::SecondFactorRequired,
                    AuthEvent::PasswordAccepted,
                );
                self.complete(&mut slot, &connection, phone, state)
                    .await
                    .map(VerifyOutcome::Authenticated)
            }
            Err(e) => {
                advance(phone, AuthState::SecondFactorRequired, AuthEvent::Rejected);
                release(&mut slot, &connection).await;
                Err(rejected(phone, "check_password", e))
            }
        }
    }

    /// Export the credential, end the flow and store the account.
    async fn complete(
        &self,
        slot: &mut FlowSlot,
        connection: &Arc<dyn Connection>,
        phone: &str,
        state: AuthState,
    ) -> AuthResult<Account> {
        let exported = connection.export_credential().await;
        release(slot, connection).await;

        let credential = match exported {
            Ok(credential) => credential,
            Err(e) => {
                advance(phone, state, AuthEvent::Rejected);
                return Err(step_failed(phone, "export_credential", e));
            }
        };

        let account = match self.accounts.upsert(phone, &credential).await {
            Ok(account) => account,
            Err(e) => {
                advance(phone, state, AuthEvent::Rejected);
                error!(phone = %phone, error = %e, "failed to store authenticated account");
                return Err(AuthError::Persistence(e));
            }
        };
        advance(phone, state, AuthEvent::CredentialStored);

        info!(
            phone = %phone,
            credential = %credential.fingerprint(),
            "account authenticated"
        );
        Ok(account)
    }
}

/// Look up the live flow behind `slot` and check it can take the next step.
///
/// Never touches the network; a failed check leaves the flow as it was.
async fn live_flow(
    slot: &mut FlowSlot,
    challenge_token: &str,
    expected: PendingStage,
) -> AuthResult<Arc<dyn Connection>> {
    let pending = slot.get().await.ok_or(AuthError::NoPendingFlow)?;

    if !pending.challenge_matches(challenge_token) {
        return Err(AuthError::ChallengeMismatch);
    }

    match (expected, pending.stage) {
        (PendingStage::AwaitingCode, PendingStage::AwaitingPassword) => {
            Err(AuthError::SecondFactorPending)
        }
        (PendingStage::AwaitingPassword, PendingStage::AwaitingCode) => {
            Err(AuthError::SecondFactorNotRequested)
        }
        _ => Ok(pending.connection()),
    }
}

/// End the flow behind `slot` and close its connection.
async fn release(slot: &mut FlowSlot, connection: &Arc<dyn Connection>) {
    if let Some(pending) = slot.take() {
        pending.close().await;
    }
    connection.close().await;
}

fn required<'a>(field: &str, value: &'a str) -> AuthResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(value)
}

/// Tokens are opaque: only emptiness is checked, the value is compared as given.
fn challenge(token: &str) -> AuthResult<&str> {
    if token.trim().is_empty() {
        return Err(AuthError::InvalidInput(
            "challenge_token must not be empty".to_string(),
        ));
    }
    Ok(token)
}

fn step_failed(phone: &str, step: &str, e: ProtocolError) -> AuthError {
    error!(phone = %phone, step = step, error = %e, "authentication step failed");
    AuthError::StepFailed(e.to_string())
}

/// Translate a rejected code or password submission.
fn rejected(phone: &str, step: &str, e: ProtocolError) -> AuthError {
    match e {
        ProtocolError::InvalidCode => {
            info!(phone = %phone, "invalid login code");
            AuthError::InvalidCode
        }
        ProtocolError::ExpiredCode => {
            info!(phone = %phone, "expired login code");
            AuthError::ExpiredCode
        }
        ProtocolError::InvalidPassword => {
            info!(phone = %phone, "invalid second-factor password");
            AuthError::InvalidPassword
        }
        ProtocolError::RateLimited { retry_after } => {
            warn!(phone = %phone, step = step, retry_after_secs = retry_after.as_secs(), "rate limited");
            AuthError::RateLimited { retry_after }
        }
        other => step_failed(phone, step, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::mock::MockNetwork;
    use crate::messenger::traits::Credential;
    use crate::store::{SqliteStore, StoreResult};

    const PHONE: &str = "+10000000000";

    async fn service(network: &MockNetwork) -> (AuthService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let service = AuthService::new(
            Arc::new(network.clone()),
            store.clone(),
            Arc::new(AuthFlowStore::new()),
            AuthSettings::default(),
        );
        (service, store)
    }

    #[test]
    fn test_state_transitions() {
        use AuthEvent::*;
        use AuthState::*;

        assert_eq!(Unstarted.on(CodeIssued), Some(CodeRequested));
        assert_eq!(CodeRequested.on(CodeAccepted), Some(Verified));
        assert_eq!(CodeRequested.on(PasswordRequired), Some(SecondFactorRequired));
        assert_eq!(SecondFactorRequired.on(PasswordAccepted), Some(Verified));
        assert_eq!(Verified.on(CredentialStored), Some(Authenticated));
        assert_eq!(SecondFactorRequired.on(Rejected), Some(Failed));

        // Terminal states accept nothing
        for event in [CodeIssued, CodeAccepted, PasswordRequired, PasswordAccepted, CredentialStored, Rejected] {
            assert_eq!(Authenticated.on(event), None);
            assert_eq!(Failed.on(event), None);
        }

        // No skipping straight to a stored credential
        assert_eq!(CodeRequested.on(CredentialStored), None);
        assert_eq!(SecondFactorRequired.on(CodeAccepted), None);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AuthError::NoPendingFlow.kind(), "no_pending_flow");
        assert_eq!(AuthError::ChallengeMismatch.kind(), "challenge_mismatch");
        assert!(AuthError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!AuthError::InvalidCode.is_retryable());
    }

    #[tokio::test]
    async fn test_request_code_stores_pending_flow() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        let (service, store) = service(&network).await;

        let requested = service.request_code(PHONE).await.unwrap();
        assert!(!requested.challenge_token.is_empty());
        assert_eq!(requested.code_valid_seconds, 120);

        let pending = service.pending(PHONE).await.unwrap();
        assert_eq!(pending.stage, PendingStage::AwaitingCode);

        // Repository untouched, connection kept for the verify step
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(network.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_code_validity_capped_by_settings() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        network.set_code_validity(None);
        let (service, _store) = service(&network).await;

        let requested = service.request_code(PHONE).await.unwrap();
        assert_eq!(requested.code_valid_seconds, DEFAULT_CODE_TTL.as_secs());
    }

    #[tokio::test]
    async fn test_empty_phone_rejected_without_network() {
        let network = MockNetwork::new();
        let (service, _store) = service(&network).await;

        let err = service.request_code("   ").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput(_)));
        assert_eq!(network.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_second_request_replaces_first() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        let (service, _store) = service(&network).await;

        let first = service.request_code(PHONE).await.unwrap();
        let second = service.request_code(PHONE).await.unwrap();

        // Only the newest flow's connection stays open
        assert_eq!(network.open_connections(), 1);

        let err = service
            .verify_code(PHONE, "12345", &first.challenge_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ChallengeMismatch));

        let outcome = service
            .verify_code(PHONE, "12345", &second.challenge_token)
            .await
            .unwrap();
        assert!(matches!(outcome, VerifyOutcome::Authenticated(_)));
    }

    #[tokio::test]
    async fn test_verify_code_success_stores_account() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        let (service, store) = service(&network).await;

        let requested = service.request_code(PHONE).await.unwrap();
        let outcome = service
            .verify_code(PHONE, "12345", &requested.challenge_token)
            .await
            .unwrap();

        let VerifyOutcome::Authenticated(account) = outcome else {
            panic!("expected authenticated outcome");
        };
        assert_eq!(account.identifier, PHONE);

        let stored = store.get(PHONE).await.unwrap().unwrap();
        assert_eq!(stored.credential, account.credential);
        assert!(service.pending(PHONE).await.is_none());
        assert_eq!(network.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_invalid_code_is_terminal() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        let (service, store) = service(&network).await;

        let requested = service.request_code(PHONE).await.unwrap();
        let err = service
            .verify_code(PHONE, "00000", &requested.challenge_token)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCode));
        assert!(service.pending(PHONE).await.is_none());
        assert_eq!(network.open_connections(), 0);
        assert!(store.list().await.unwrap().is_empty());

        // The flow is gone, so retrying needs a new code
        let err = service
            .verify_code(PHONE, "12345", &requested.challenge_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoPendingFlow));
    }

    #[tokio::test]
    async fn test_expired_code_reported() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        network.expire_code(PHONE);
        let (service, _store) = service(&network).await;

        let requested = service.request_code(PHONE).await.unwrap();
        let err = service
            .verify_code(PHONE, "12345", &requested.challenge_token)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ExpiredCode));
        assert_eq!(network.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_second_factor_flow() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        network.set_password(PHONE, "hunter2");
        let (service, store) = service(&network).await;

        let requested = service.request_code(PHONE).await.unwrap();
        let token = requested.challenge_token;

        let outcome = service.verify_code(PHONE, "12345", &token).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::SecondFactorRequired);

        // Flow and connection carried over
        let pending = service.pending(PHONE).await.unwrap();
        assert_eq!(pending.stage, PendingStage::AwaitingPassword);
        assert!(pending.expires_in <= DEFAULT_SECOND_FACTOR_TTL);
        assert!(pending.expires_in > DEFAULT_SECOND_FACTOR_TTL - Duration::from_secs(5));
        assert_eq!(network.open_connections(), 1);

        // The code step cannot be replayed
        let err = service.verify_code(PHONE, "12345", &token).await.unwrap_err();
        assert!(matches!(err, AuthError::SecondFactorPending));

        let outcome = service.submit_password(PHONE, "hunter2", &token).await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Authenticated(_)));
        assert!(store.get(PHONE).await.unwrap().is_some());
        assert_eq!(network.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_wrong_password_is_terminal() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        network.set_password(PHONE, "hunter2");
        let (service, store) = service(&network).await;

        let token = service.request_code(PHONE).await.unwrap().challenge_token;
        service.verify_code(PHONE, "12345", &token).await.unwrap();

        let err = service.submit_password(PHONE, "wrong", &token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidPassword));
        assert!(service.pending(PHONE).await.is_none());
        assert_eq!(network.open_connections(), 0);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_password_before_code_is_rejected() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        let (service, _store) = service(&network).await;

        let token = service.request_code(PHONE).await.unwrap().challenge_token;
        let calls = network.network_calls();

        let err = service.submit_password(PHONE, "hunter2", &token).await.unwrap_err();
        assert!(matches!(err, AuthError::SecondFactorNotRequested));

        // Flow untouched, nothing sent
        assert_eq!(network.network_calls(), calls);
        assert!(service.pending(PHONE).await.is_some());
    }

    #[tokio::test]
    async fn test_request_code_failure_releases_connection() {
        let network = MockNetwork::new();
        let (service, _store) = service(&network).await;

        // Unknown number: the network rejects the request
        let err = service.request_code("+19999999999").await.unwrap_err();
        assert!(matches!(err, AuthError::StepFailed(_)));
        assert_eq!(err.kind(), "step_failed");
        assert_eq!(network.open_connections(), 0);
        assert!(service.pending("+19999999999").await.is_none());
    }

    #[tokio::test]
    async fn test_padded_challenge_token_is_mismatch() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        let (service, store) = service(&network).await;

        let token = service.request_code(PHONE).await.unwrap().challenge_token;
        let calls = network.network_calls();

        let err = service
            .verify_code(PHONE, "12345", &format!("  {}\n", token))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ChallengeMismatch));
        assert_eq!(network.network_calls(), calls);
        assert!(store.list().await.unwrap().is_empty());

        // Blank tokens are malformed input, not a mismatch
        let err = service.verify_code(PHONE, "12345", "  ").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput(_)));

        // The flow survives and the exact token still works
        assert!(service.pending(PHONE).await.is_some());
        let outcome = service.verify_code(PHONE, "12345", &token).await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Authenticated(_)));
    }

    /// Repository that refuses every write
    struct ReadOnlyAccounts;

    #[async_trait::async_trait]
    impl AccountRepository for ReadOnlyAccounts {
        async fn upsert(&self, _identifier: &str, _credential: &Credential) -> StoreResult<Account> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }

        async fn get(&self, _identifier: &str) -> StoreResult<Option<Account>> {
            Ok(None)
        }

        async fn list(&self) -> StoreResult<Vec<Account>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _identifier: &str) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_store_failure_after_verification_is_reported() {
        let network = MockNetwork::new();
        network.add_account(PHONE, "12345");
        let service = AuthService::new(
            Arc::new(network.clone()),
            Arc::new(ReadOnlyAccounts),
            Arc::new(AuthFlowStore::new()),
            AuthSettings::default(),
        );

        let token = service.request_code(PHONE).await.unwrap().challenge_token;
        let err = service.verify_code(PHONE, "12345", &token).await.unwrap_err();

        assert!(matches!(err, AuthError::Persistence(_)));
        assert_eq!(err.kind(), "persistence");
        assert!(service.pending(PHONE).await.is_none());
        assert_eq!(network.open_connections(), 0);
    }
}
