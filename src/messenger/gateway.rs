//! HTTP gateway client
//!
//! The wire protocol itself runs in a separate gateway process. This client
//! maps [`Connector`] / [`Connection`] onto its JSON API:
//!
//! | call                | request                                   |
//! |---------------------|-------------------------------------------|
//! | connect             | `POST /sessions` `{credential?}`          |
//! | request_code        | `POST /sessions/{id}/send_code`           |
//! | sign_in             | `POST /sessions/{id}/sign_in`             |
//! | check_password      | `POST /sessions/{id}/check_password`      |
//! | export_credential   | `POST /sessions/{id}/export`              |
//! | list_chats          | `GET /sessions/{id}/dialogs`              |
//! | send_message        | `POST /sessions/{id}/messages`            |
//! | history             | `GET /sessions/{id}/history`              |
//! | me                  | `GET /sessions/{id}/me`                   |
//! | next_event          | `GET /sessions/{id}/updates` (long poll)  |
//! | close               | `DELETE /sessions/{id}`                   |
//!
//! Failures come back as `{"error": {"kind", "message", "retry_after"}}`.

use super::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Gateway client settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL, e.g. `http://127.0.0.1:8081`
    pub base_url: String,
    /// Timeout for ordinary calls
    pub request_timeout: Duration,
    /// How long the gateway may hold an update poll open
    pub poll_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            request_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(25),
        }
    }
}

/// [`Connector`] backed by the gateway's HTTP API
#[derive(Debug, Clone)]
pub struct GatewayConnector {
    http: reqwest::Client,
    config: Arc<GatewayConfig>,
}

impl GatewayConnector {
    pub fn new(config: GatewayConfig) -> ProtocolResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProtocolError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let mut config = config;
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }
}

#[derive(Deserialize)]
struct SessionCreated {
    session_id: String,
}

#[async_trait]
impl Connector for GatewayConnector {
    async fn connect(&self, credential: Option<&Credential>) -> ProtocolResult<Arc<dyn Connection>> {
        let body = json!({ "credential": credential.map(Credential::expose) });
        let url = format!("{}/sessions", self.config.base_url);
        let created: SessionCreated = send(self.http.post(&url).json(&body)).await?;

        debug!(session = %created.session_id, "gateway session opened");

        Ok(Arc::new(GatewayConnection {
            http: self.http.clone(),
            config: Arc::clone(&self.config),
            session_id: created.session_id,
            pending_events: Mutex::new(VecDeque::new()),
            peer_closed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

struct GatewayConnection {
    http: reqwest::Client,
    config: Arc<GatewayConfig>,
    session_id: String,
    /// Events received in one poll but not yet handed out
    pending_events: Mutex<VecDeque<InboundEvent>>,
    /// The gateway reported the session gone; drain `pending_events`, then end
    peer_closed: AtomicBool,
    closed: AtomicBool,
}

impl GatewayConnection {
    fn session_url(&self) -> String {
        format!("{}/sessions/{}", self.config.base_url, self.session_id)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.session_url(), path);
        self.http.request(method, url)
    }

    fn ensure_open(&self) -> ProtocolResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::Disconnected("session closed".to_string()));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct CodeSent {
    challenge_token: String,
    timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct Exported {
    credential: String,
}

#[derive(Deserialize)]
struct Ack {}

#[derive(Deserialize)]
struct WireSender {
    id: i64,
    handle: Option<String>,
    first_name: Option<String>,
}

#[derive(Deserialize)]
struct WireEvent {
    sender: WireSender,
    body: String,
    received_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Updates {
    #[serde(default)]
    events: Vec<WireEvent>,
    #[serde(default)]
    closed: bool,
}

#[derive(Serialize)]
struct HistoryQuery<'a> {
    target: &'a str,
    limit: u32,
}

#[async_trait]
impl Connection for GatewayConnection {
    async fn request_code(&self, phone: &str) -> ProtocolResult<CodeIssued> {
        self.ensure_open()?;
        let sent: CodeSent =
            send(self.request(Method::POST, "send_code").json(&json!({ "phone": phone }))).await?;
        Ok(CodeIssued {
            challenge_token: sent.challenge_token,
            valid_for: sent.timeout_secs.map(Duration::from_secs),
        })
    }

    async fn sign_in(&self, phone: &str, code: &str, challenge_token: &str) -> ProtocolResult<()> {
        self.ensure_open()?;
        let body = json!({ "phone": phone, "code": code, "challenge_token": challenge_token });
        let _: Ack = send(self.request(Method::POST, "sign_in").json(&body)).await?;
        Ok(())
    }

    async fn check_password(&self, password: &str) -> ProtocolResult<()> {
        self.ensure_open()?;
        let body = json!({ "password": password });
        let _: Ack = send(self.request(Method::POST, "check_password").json(&body)).await?;
        Ok(())
    }

    async fn export_credential(&self) -> ProtocolResult<Credential> {
        self.ensure_open()?;
        let exported: Exported = send(self.request(Method::POST, "export")).await?;
        Ok(Credential::new(exported.credential))
    }

    async fn list_chats(&self) -> ProtocolResult<Vec<ChatSummary>> {
        self.ensure_open()?;
        send(self.request(Method::GET, "dialogs")).await
    }

    async fn send_message(&self, target: &str, body: &str) -> ProtocolResult<()> {
        self.ensure_open()?;
        let payload = json!({ "target": target, "body": body });
        let _: Ack = send(self.request(Method::POST, "messages").json(&payload)).await?;
        Ok(())
    }

    async fn history(&self, target: &str, limit: u32) -> ProtocolResult<Vec<HistoryMessage>> {
        self.ensure_open()?;
        send(
            self.request(Method::GET, "history")
                .query(&HistoryQuery { target, limit }),
        )
        .await
    }

    async fn me(&self) -> ProtocolResult<Profile> {
        self.ensure_open()?;
        send(self.request(Method::GET, "me")).await
    }

    async fn next_event(&self) -> ProtocolResult<Option<InboundEvent>> {
        let mut pending = self.pending_events.lock().await;

        loop {
            if let Some(event) = pending.pop_front() {
                return Ok(Some(event));
            }
            if self.peer_closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            self.ensure_open()?;

            let poll = self.config.poll_timeout;
            let updates: Updates = send(
                self.request(Method::GET, "updates")
                    .query(&[("timeout", poll.as_secs())])
                    .timeout(poll + self.config.request_timeout),
            )
            .await
            .map_err(|e| match e {
                ProtocolError::Network(reason) => ProtocolError::Disconnected(reason),
                other => other,
            })?;

            if updates.closed {
                debug!(session = %self.session_id, "gateway ended the session");
                self.peer_closed.store(true, Ordering::Release);
            }

            pending.extend(updates.events.into_iter().map(|event| InboundEvent {
                sender: Peer {
                    id: event.sender.id,
                    handle: event.sender.handle,
                    first_name: event.sender.first_name,
                },
                body: event.body,
                received_at: event.received_at,
            }));
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let result = self.http.delete(self.session_url()).send().await;
        if let Err(e) = result {
            debug!(session = %self.session_id, error = %e, "failed to close gateway session");
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    kind: String,
    #[serde(default)]
    message: String,
    retry_after: Option<u64>,
}

/// Send a request and decode a JSON answer or a gateway error.
async fn send<T: DeserializeOwned>(request: RequestBuilder) -> ProtocolResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| ProtocolError::Network(e.to_string()))?;

    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProtocolError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
            Ok(envelope) => map_error(envelope.error),
            Err(_) => ProtocolError::Protocol(format!("Gateway returned {}", status)),
        });
    }

    if bytes.is_empty() {
        return serde_json::from_slice(b"{}")
            .map_err(|e| ProtocolError::Protocol(format!("Empty gateway response: {}", e)));
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| ProtocolError::Protocol(format!("Invalid gateway response: {}", e)))
}

fn map_error(error: ErrorBody) -> ProtocolError {
    match error.kind.as_str() {
        "rate_limited" => ProtocolError::RateLimited {
            retry_after: Duration::from_secs(error.retry_after.unwrap_or(0)),
        },
        "invalid_code" => ProtocolError::InvalidCode,
        "expired_code" => ProtocolError::ExpiredCode,
        "password_required" => ProtocolError::PasswordRequired,
        "invalid_password" => ProtocolError::InvalidPassword,
        "unauthorized" => ProtocolError::Unauthorized,
        "disconnected" => ProtocolError::Disconnected(error.message),
        _ => ProtocolError::Protocol(if error.message.is_empty() {
            error.kind
        } else {
            error.message
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    fn body(kind: &str, retry_after: Option<u64>) -> ErrorBody {
        ErrorBody {
            kind: kind.to_string(),
            message: format!("{} happened", kind),
            retry_after,
        }
    }

    #[test]
    fn test_map_error_kinds() {
        assert_eq!(
            map_error(body("rate_limited", Some(30))),
            ProtocolError::RateLimited {
                retry_after: Duration::from_secs(30)
            }
        );
        assert_eq!(map_error(body("invalid_code", None)), ProtocolError::InvalidCode);
        assert_eq!(map_error(body("expired_code", None)), ProtocolError::ExpiredCode);
        assert_eq!(
            map_error(body("password_required", None)),
            ProtocolError::PasswordRequired
        );
        assert_eq!(map_error(body("unauthorized", None)), ProtocolError::Unauthorized);
        assert_eq!(
            map_error(body("peer_flood", None)),
            ProtocolError::Protocol("peer_flood happened".to_string())
        );
    }

    /// Minimal stand-in for the gateway process
    async fn spawn_gateway() -> String {
        let app = Router::new()
            .route(
                "/sessions",
                post(|Json(body): Json<Value>| async move {
                    if body["credential"] == "revoked" {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({"error": {"kind": "unauthorized", "message": "revoked"}})),
                        );
                    }
                    (StatusCode::OK, Json(json!({"session_id": "s1"})))
                }),
            )
            .route(
                "/sessions/:id/send_code",
                post(|Json(body): Json<Value>| async move {
                    if body["phone"] == "+1busy" {
                        return (
                            StatusCode::TOO_MANY_REQUESTS,
                            Json(json!({"error": {"kind": "rate_limited", "message": "flood", "retry_after": 42}})),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({"challenge_token": "abc", "timeout_secs": 120})),
                    )
                }),
            )
            .route(
                "/sessions/:id/updates",
                get(|| async {
                    Json(json!({
                        "events": [{
                            "sender": {"id": 5, "handle": "alice", "first_name": null},
                            "body": "hi",
                            "received_at": "2024-01-01T00:00:00Z"
                        }],
                        "closed": false
                    }))
                }),
            )
            .route("/sessions/:id", delete(|Path(_id): Path<String>| async { StatusCode::NO_CONTENT }));

        serve(app).await
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn connector(base_url: String) -> GatewayConnector {
        GatewayConnector::new(GatewayConfig {
            base_url,
            request_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_code_through_gateway() {
        let connector = connector(spawn_gateway().await);
        let conn = connector.connect(None).await.unwrap();

        let issued = conn.request_code("+10000000000").await.unwrap();
        assert_eq!(issued.challenge_token, "abc");
        assert_eq!(issued.valid_for, Some(Duration::from_secs(120)));

        assert_eq!(
            conn.request_code("+1busy").await,
            Err(ProtocolError::RateLimited {
                retry_after: Duration::from_secs(42)
            })
        );
    }

    #[tokio::test]
    async fn test_revoked_credential_maps_to_unauthorized() {
        let connector = connector(spawn_gateway().await);
        let result = connector.connect(Some(&Credential::new("revoked"))).await;
        assert!(matches!(result, Err(ProtocolError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_updates_become_events() {
        let connector = connector(spawn_gateway().await);
        let conn = connector.connect(Some(&Credential::new("ok"))).await.unwrap();

        let event = conn.next_event().await.unwrap().unwrap();
        assert_eq!(event.body, "hi");
        assert_eq!(event.sender.display_name(), "alice");

        conn.close().await;
        assert!(matches!(
            conn.next_event().await,
            Err(ProtocolError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_final_events_delivered_before_end() {
        let app = Router::new()
            .route("/sessions", post(|| async { Json(json!({"session_id": "s2"})) }))
            .route(
                "/sessions/:id/updates",
                get(|| async {
                    Json(json!({
                        "events": [{
                            "sender": {"id": 7, "handle": null, "first_name": "Bob"},
                            "body": "last words",
                            "received_at": "2024-01-01T00:00:00Z"
                        }],
                        "closed": true
                    }))
                }),
            );
        let connector = connector(serve(app).await);
        let conn = connector.connect(None).await.unwrap();

        let event = conn.next_event().await.unwrap().unwrap();
        assert_eq!(event.body, "last words");
        assert_eq!(event.sender.display_name(), "Bob");

        // Ends without polling again
        assert_eq!(conn.next_event().await, Ok(None));
        assert_eq!(conn.next_event().await, Ok(None));
    }

    #[tokio::test]
    async fn test_close_deletes_session() {
        let deleted = Arc::new(StdMutex::new(Vec::new()));
        let recorded = Arc::clone(&deleted);
        let app = Router::new()
            .route("/sessions", post(|| async { Json(json!({"session_id": "s3"})) }))
            .route(
                "/sessions/:id",
                delete(move |Path(id): Path<String>| {
                    let recorded = Arc::clone(&recorded);
                    async move {
                        recorded.lock().unwrap().push(id);
                        StatusCode::NO_CONTENT
                    }
                }),
            );
        let connector = connector(serve(app).await);
        let conn = connector.connect(None).await.unwrap();

        conn.close().await;
        conn.close().await;

        assert_eq!(*deleted.lock().unwrap(), vec!["s3".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_network_error() {
        // Nothing listens on port 9 of localhost
        let connector = connector("http://127.0.0.1:9".to_string());
        assert!(matches!(
            connector.connect(None).await,
            Err(ProtocolError::Network(_))
        ));
    }
}
