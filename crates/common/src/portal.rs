//! Portal client: join credentials and room lifecycle.
//!
//! The portal is the conferencing backend. A client talks to it exactly three
//! ways: once at join time to trade `{room, device_id, session_id}` for a
//! media-session credential, and optionally at the end of a call to end or
//! disband the room. Everything is bearer-authenticated with the user's
//! signalling token.
//!
//! # Security
//!
//! - The bearer token and the media JWT are held as `SecretString`
//! - Error bodies are logged at trace level only
//! - HTTP timeouts prevent hanging joins

use crate::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const CREDENTIALS_PATH: &str = "/api/token/livekit";
const END_ROOM_PATH: &str = "/api/rooms/end";
const DISBAND_ROOM_PATH: &str = "/api/rooms/disband";

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned by the portal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    /// Request never got a response.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Bearer token missing or expired (401).
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller is not the room host (403).
    #[error("Only the host can do this")]
    NotHost,

    /// No such room (404).
    #[error("Room not found")]
    RoomNotFound,

    /// Room exists but has not started or has already ended (409).
    #[error("Room is not active")]
    RoomNotActive,

    /// Room was disbanded by its host (410).
    #[error("Room was disbanded")]
    RoomDisbanded,

    /// Any other non-success status; `message` is the server's explanation if it gave one.
    #[error("Portal rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Success status but unusable body.
    #[error("Invalid portal response: {0}")]
    InvalidResponse(String),

    /// Client could not be configured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PortalError {
    /// Text suitable for showing to the person trying to join.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            PortalError::Http(_) => "Cannot reach the server. Please try again.".to_string(),
            PortalError::Unauthorized => "Please sign in again.".to_string(),
            PortalError::NotHost => "Only the host can do this.".to_string(),
            PortalError::RoomNotFound => "This room does not exist.".to_string(),
            PortalError::RoomNotActive => "This room is not active.".to_string(),
            PortalError::RoomDisbanded => "This room was disbanded by the host.".to_string(),
            PortalError::Rejected { message, .. } if !message.is_empty() => message.clone(),
            PortalError::Rejected { .. }
            | PortalError::InvalidResponse(_)
            | PortalError::Configuration(_) => "Could not get a connection token.".to_string(),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the portal client.
#[derive(Clone)]
pub struct PortalConfig {
    /// Portal base URL (e.g., `https://portal.example.com`).
    pub base_url: String,

    /// Signalling bearer token obtained at login.
    pub bearer_token: SecretString,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl std::fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalConfig")
            .field("base_url", &self.base_url)
            .field("bearer_token", &"[REDACTED]")
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl PortalConfig {
    #[must_use]
    pub fn new(base_url: String, bearer_token: SecretString) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct CredentialsRequest<'a> {
    room: &'a str,
    device_id: &'a str,
    session_id: &'a str,
}

#[derive(Serialize)]
struct RoomRequest<'a> {
    room_id: &'a str,
}

/// Media-session credential issued for one `{user, room, device, tab}`.
#[derive(Clone, Deserialize)]
pub struct MediaCredentials {
    /// Media server URL to connect to.
    #[serde(alias = "livekit_url")]
    pub media_url: String,

    /// Short-lived media-session token.
    #[serde(alias = "livekit_jwt")]
    pub media_jwt: SecretString,

    /// Whether the caller hosts this room (may end or disband it).
    #[serde(default)]
    pub is_host: bool,
}

impl std::fmt::Debug for MediaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCredentials")
            .field("media_url", &self.media_url)
            .field("media_jwt", &"[REDACTED]")
            .field("is_host", &self.is_host)
            .finish()
    }
}

/// Error body shape. The portal is not consistent about which field it fills.
#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> String {
        self.message.or(self.error).or(self.detail).unwrap_or_default()
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the portal.
#[derive(Debug, Clone)]
pub struct PortalClient {
    config: PortalConfig,
    http: reqwest::Client,
}

impl PortalClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: PortalConfig) -> Result<Self, PortalError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PortalError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    /// Trade room and device identity for a media-session credential.
    ///
    /// # Errors
    ///
    /// Returns the room lifecycle errors (`RoomNotFound`, `RoomNotActive`,
    /// `RoomDisbanded`), `Unauthorized`, or `InvalidResponse` when the portal
    /// answers without a usable URL and token.
    #[instrument(skip_all, fields(room = %room))]
    pub async fn fetch_media_credentials(
        &self,
        room: &str,
        device_id: &str,
        session_id: &str,
    ) -> Result<MediaCredentials, PortalError> {
        let response = self
            .post(
                CREDENTIALS_PATH,
                &CredentialsRequest {
                    room,
                    device_id,
                    session_id,
                },
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejection(response).await);
        }

        let creds: MediaCredentials = response.json().await.map_err(|e| {
            warn!(target: "common.portal", error = %e, "Failed to parse credential response");
            PortalError::InvalidResponse(e.to_string())
        })?;

        if creds.media_url.trim().is_empty() || creds.media_jwt.expose_secret().is_empty() {
            warn!(target: "common.portal", "Credential response missing url or token");
            return Err(PortalError::InvalidResponse(
                "missing media url or token".to_string(),
            ));
        }

        debug!(
            target: "common.portal",
            is_host = creds.is_host,
            "Media credentials acquired"
        );
        Ok(creds)
    }

    /// End the room for everyone.
    ///
    /// # Errors
    ///
    /// Returns `NotHost` when the portal refuses (403), or other portal errors.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn end_room(&self, room_id: &str) -> Result<(), PortalError> {
        self.room_action(END_ROOM_PATH, room_id).await
    }

    /// Disband the room: every participant is removed immediately. Host only.
    ///
    /// # Errors
    ///
    /// Returns `NotHost` when the caller is not the host (403), or other portal errors.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn disband_room(&self, room_id: &str) -> Result<(), PortalError> {
        self.room_action(DISBAND_ROOM_PATH, room_id).await
    }

    async fn room_action(&self, path: &str, room_id: &str) -> Result<(), PortalError> {
        let response = self.post(path, &RoomRequest { room_id }).await?;
        if response.status().is_success() {
            debug!(target: "common.portal", path = path, "Room action accepted");
            Ok(())
        } else {
            Err(rejection(response).await)
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, PortalError> {
        let url = format!("{}{}", self.config.base_url, path);
        trace!(target: "common.portal", url = %url, "POST");

        self.http
            .post(&url)
            .bearer_auth(self.config.bearer_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "common.portal", error = %e, "HTTP request failed");
                PortalError::Http(e.to_string())
            })
    }
}

/// Map a non-success response to a `PortalError`.
async fn rejection(response: reqwest::Response) -> PortalError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_else(|e| {
        trace!(target: "common.portal", error = %e, "Failed to read error response body");
        String::new()
    });
    trace!(target: "common.portal", status = status, body = %body, "Portal error body");

    let err = match status {
        401 => PortalError::Unauthorized,
        403 => PortalError::NotHost,
        404 => PortalError::RoomNotFound,
        409 => PortalError::RoomNotActive,
        410 => PortalError::RoomDisbanded,
        _ => PortalError::Rejected {
            status,
            message: serde_json::from_str::<ErrorBody>(&body)
                .unwrap_or_default()
                .into_message(),
        },
    };

    warn!(target: "common.portal", status = status, error = %err, "Portal rejected request");
    err
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> PortalClient {
        PortalClient::new(PortalConfig::new(
            server.uri(),
            SecretString::from("signal-token"),
        ))
        .unwrap()
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = PortalConfig::new(
            "https://portal.example/".to_string(),
            SecretString::from("super-secret-token"),
        );

        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super-secret-token"));
        assert_eq!(config.base_url, "https://portal.example");
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn test_credentials_accept_legacy_field_names() {
        let creds: MediaCredentials = serde_json::from_str(
            r#"{"livekit_url":"wss://media.example","livekit_jwt":"lk-token","is_host":true}"#,
        )
        .unwrap();
        assert_eq!(creds.media_url, "wss://media.example");
        assert_eq!(creds.media_jwt.expose_secret(), "lk-token");
        assert!(creds.is_host);
        assert!(!format!("{creds:?}").contains("lk-token"));
    }

    #[tokio::test]
    async fn test_fetch_media_credentials_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/token/livekit"))
            .and(header("authorization", "Bearer signal-token"))
            .and(body_json(serde_json::json!({
                "room": "standup",
                "device_id": "dev_1",
                "session_id": "sess_1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "media_url": "wss://media.example",
                "media_jwt": "issued-jwt",
                "is_host": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let creds = client_for(&server)
            .fetch_media_credentials("standup", "dev_1", "sess_1")
            .await
            .unwrap();

        assert_eq!(creds.media_url, "wss://media.example");
        assert_eq!(creds.media_jwt.expose_secret(), "issued-jwt");
        assert!(!creds.is_host);
    }

    #[tokio::test]
    async fn test_fetch_media_credentials_maps_lifecycle_statuses() {
        for (status, expected) in [
            (401, PortalError::Unauthorized),
            (404, PortalError::RoomNotFound),
            (409, PortalError::RoomNotActive),
            (410, PortalError::RoomDisbanded),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/token/livekit"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = client_for(&server)
                .fetch_media_credentials("r", "d", "s")
                .await
                .unwrap_err();
            assert_eq!(err, expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_rejection_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token/livekit"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"detail": "room id malformed"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_media_credentials("??", "d", "s")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PortalError::Rejected {
                status: 422,
                message: "room id malformed".to_string()
            }
        );
        assert_eq!(err.user_message(), "room id malformed");
    }

    #[tokio::test]
    async fn test_missing_token_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token/livekit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "media_url": "wss://media.example",
                "media_jwt": ""
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_media_credentials("r", "d", "s")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_end_room_posts_room_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rooms/end"))
            .and(body_json(serde_json::json!({"room_id": "standup"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).end_room("standup").await.unwrap();
    }

    #[tokio::test]
    async fn test_disband_room_requires_host() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rooms/disband"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(serde_json::json!({"error": "not host"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).disband_room("standup").await.unwrap_err();
        assert_eq!(err, PortalError::NotHost);
    }

    #[tokio::test]
    async fn test_unreachable_portal_is_http_error() {
        let client = PortalClient::new(
            PortalConfig::new(
                "http://127.0.0.1:9".to_string(),
                SecretString::from("t"),
            )
            .with_http_timeout(Duration::from_millis(500)),
        )
        .unwrap();

        let err = client.end_room("r").await.unwrap_err();
        assert!(matches!(err, PortalError::Http(_)));
    }
}
