//! OAuth2 client-credentials token management
//!
//! Bitbucket issues short-lived access tokens for OAuth consumers. The
//! [`TokenManager`] requests one on first use and transparently requests a new
//! one once the held token is within [`TOKEN_RESET_THRESHOLD_SECS`] of expiry.
//! See <https://tools.ietf.org/html/rfc6749#section-4.4>.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{MirrorError, Result};

/// Safety margin so a request never goes out with a token that expires mid-flight
pub const TOKEN_RESET_THRESHOLD_SECS: i64 = 600;

/// Bearer credential obtained from the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// Stored but never used; renewal re-runs the client-credentials grant
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the credential may still be sent at `now`, keeping `threshold` in reserve
    pub fn is_valid_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now + threshold < self.expires_at
    }

    /// Value for the `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    expires_in: i64,
}

/// Owns the token state for a single run
pub struct TokenManager {
    http: Client,
    token_url: String,
    client_id: String,
    secret: String,
    reset_threshold: Duration,
    // Held across the refresh request so concurrent callers never both refresh
    credential: Mutex<Option<Credential>>,
}

impl TokenManager {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            secret: secret.into(),
            reset_threshold: Duration::seconds(TOKEN_RESET_THRESHOLD_SECS),
            credential: Mutex::new(None),
        }
    }

    /// Return a currently valid credential, requesting a new one when needed
    pub async fn obtain_credential(&self) -> Result<Credential> {
        let mut held = self.credential.lock().await;

        if let Some(credential) = held.as_ref() {
            if credential.is_valid_at(Utc::now(), self.reset_threshold) {
                return Ok(credential.clone());
            }
            debug!(
                "Access token expires at {}, requesting a new one",
                credential.expires_at
            );
            *held = None;
        }

        let credential = self.request_token().await?;
        *held = Some(credential.clone());
        Ok(credential)
    }

    /// `Authorization` header value built from a currently valid credential
    pub async fn authorization_header(&self) -> Result<String> {
        Ok(self.obtain_credential().await?.authorization_header())
    }

    async fn request_token(&self) -> Result<Credential> {
        debug!("Requesting access token from {}", self.token_url);

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| MirrorError::Auth(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::Auth(format!(
                "token endpoint returned status {}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MirrorError::Auth(format!("malformed token response: {}", e)))?;

        let expires_at = Duration::try_seconds(token.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                MirrorError::Auth(format!("invalid expires_in {} in token response", token.expires_in))
            })?;
        info!("Obtained access token valid until {}", expires_at);

        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
        })
    }
}
