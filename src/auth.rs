//! Bearer token strategies.
//!
//! Two strategies are supported and exactly one must be configured:
//! - a long-lived session token, returned as-is until it expires;
//! - an access/secret key pair, exchanged for an access+refresh token pair
//!   that is refreshed (or re-obtained) transparently.
//!
//! Token expiry is read from the unverified `exp` claim of the JWT payload.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::ApiDefaults;
use crate::config::{trim_base_url, Settings};

/// Tokens expiring within this many seconds are treated as already expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;
pub const LOGIN_PATH: &str = "/oidc/login";
pub const REFRESH_PATH: &str = "/oidc/refresh";

const CREDENTIALS_HINT: &str =
    "provide either XRVOYAGE_SESSION_TOKEN \
     or both XRVOYAGE_ACCESS_KEY_ID and XRVOYAGE_SECRET_ACCESS_KEY";

/// Raised when no usable bearer credential can be produced.
#[derive(Debug, Error)]
pub enum InvalidCredentialsError {
    #[error("invalid credentials configuration: {0}")]
    Misconfigured(&'static str),

    #[error("{endpoint} rejected credentials with http status {status}")]
    Rejected {
        endpoint: &'static str,
        status: StatusCode,
    },

    #[error("the provided {0} is expired")]
    Expired(&'static str),

    #[error("could not decode token: {0}")]
    Malformed(String),

    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// An access token plus the optional refresh token issued with it.
#[derive(Clone, Debug)]
pub struct Credential {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Unix seconds taken from the access token's `exp` claim.
    pub expires_at: i64,
}

impl Credential {
    /// Builds a credential, decoding the access token expiry.
    pub fn from_tokens(
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    ) -> Result<Self, InvalidCredentialsError> {
        let expires_at = token_expiry(access_token.expose_secret())?;
        Ok(Self {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        is_expired_at(self.expires_at, now)
    }

    /// Returns whether the refresh token is present and not yet expired.
    fn can_refresh_at(&self, now: i64) -> Result<bool, InvalidCredentialsError> {
        match self.refresh_token.as_ref() {
            Some(refresh_token) => Ok(!is_token_expired_at(refresh_token.expose_secret(), now)?),
            None => Ok(false),
        }
    }
}

/// Source of bearer tokens for both the REST API and the websocket.
#[derive(Debug)]
pub enum TokenStrategy {
    SessionToken(SessionTokenStrategy),
    KeyPair(KeyPairTokenStrategy),
}

impl TokenStrategy {
    /// Selects a strategy from settings.
    ///
    /// Exactly one of a session token or a complete access/secret key pair
    /// must be configured.
    pub fn from_settings(
        settings: &Settings,
        http: Client,
    ) -> Result<Self, InvalidCredentialsError> {
        match (
            settings.session_token.as_ref(),
            settings.access_key_id.as_ref(),
            settings.secret_access_key.as_ref(),
        ) {
            (Some(token), None, None) => Ok(Self::session_token(token.clone())),
            (None, Some(access_key), Some(secret_key)) => Ok(Self::key_pair(
                http,
                &settings.api_base_url,
                access_key.clone(),
                secret_key.clone(),
            )),
            _ => Err(InvalidCredentialsError::Misconfigured(CREDENTIALS_HINT)),
        }
    }

    pub fn session_token(token: SecretString) -> Self {
        Self::SessionToken(SessionTokenStrategy { token })
    }

    pub fn key_pair(
        http: Client,
        api_base_url: &str,
        access_key: SecretString,
        secret_key: SecretString,
    ) -> Self {
        Self::KeyPair(KeyPairTokenStrategy {
            http,
            api_base_url: trim_base_url(api_base_url),
            access_key,
            secret_key,
            request_timeout: ApiDefaults::REQUEST_TIMEOUT,
            credential: Mutex::new(None),
        })
    }

    /// Bounds each login/refresh exchange. Has no effect on session tokens.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        if let Self::KeyPair(strategy) = &mut self {
            strategy.request_timeout = timeout;
        }
        self
    }

    /// Returns a currently valid access token.
    pub async fn token(&self) -> Result<SecretString, InvalidCredentialsError> {
        match self {
            Self::SessionToken(strategy) => strategy.token(),
            Self::KeyPair(strategy) => strategy.token().await,
        }
    }
}

/// Returns a configured long-lived token; never refreshes.
#[derive(Debug)]
pub struct SessionTokenStrategy {
    token: SecretString,
}

impl SessionTokenStrategy {
    fn token(&self) -> Result<SecretString, InvalidCredentialsError> {
        if is_token_expired_at(self.token.expose_secret(), unix_now())? {
            return Err(InvalidCredentialsError::Expired("XRVOYAGE_SESSION_TOKEN"));
        }
        Ok(self.token.clone())
    }
}

/// Logs in with an access/secret key pair and keeps the issued tokens fresh.
#[derive(Debug)]
pub struct KeyPairTokenStrategy {
    http: Client,
    api_base_url: String,
    access_key: SecretString,
    secret_key: SecretString,
    request_timeout: Duration,
    credential: Mutex<Option<Credential>>,
}

#[derive(Deserialize)]
struct TokenPairResponse {
    access_token: SecretString,
    #[serde(default)]
    refresh_token: Option<SecretString>,
}

impl KeyPairTokenStrategy {
    async fn token(&self) -> Result<SecretString, InvalidCredentialsError> {
        let mut slot = self.credential.lock().await;

        let current = match slot.take() {
            Some(credential) if credential.can_refresh_at(unix_now())? => credential,
            _ => self.login().await?,
        };

        // A login may have just completed, so read the clock again.
        let current = if current.is_expired_at(unix_now()) {
            match self.refresh(&current).await {
                Ok(refreshed) => refreshed,
                Err(err @ InvalidCredentialsError::Rejected { .. }) => {
                    debug!(event = "token_refresh_failed", error = %err, "attempting to login");
                    self.login().await?
                }
                Err(err) => return Err(err),
            }
        } else {
            current
        };

        let token = current.access_token.clone();
        *slot = Some(current);
        Ok(token)
    }

    async fn login(&self) -> Result<Credential, InvalidCredentialsError> {
        debug!(event = "token_login");
        let body = json!({
            "access_key": self.access_key.expose_secret(),
            "secret_key": self.secret_key.expose_secret(),
        });
        let pair = self.exchange(LOGIN_PATH, &body).await?;
        let refresh_token = pair.refresh_token.ok_or_else(|| {
            InvalidCredentialsError::Malformed("login response missing refresh_token".to_string())
        })?;
        Credential::from_tokens(pair.access_token, Some(refresh_token))
    }

    async fn refresh(&self, current: &Credential) -> Result<Credential, InvalidCredentialsError> {
        let Some(refresh_token) = current.refresh_token.as_ref() else {
            return Err(InvalidCredentialsError::Expired("refresh token"));
        };
        debug!(event = "token_refresh");
        let body = json!({ "refresh_token": refresh_token.expose_secret() });
        let pair = self.exchange(REFRESH_PATH, &body).await?;
        let refresh_token = pair.refresh_token.or_else(|| current.refresh_token.clone());
        Credential::from_tokens(pair.access_token, refresh_token)
    }

    async fn exchange(
        &self,
        endpoint: &'static str,
        body: &serde_json::Value,
    ) -> Result<TokenPairResponse, InvalidCredentialsError> {
        let url = format!("{}{}", self.api_base_url, endpoint);
        let response = self
            .http
            .post(url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|source| InvalidCredentialsError::Transport { endpoint, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InvalidCredentialsError::Rejected { endpoint, status });
        }

        let text = response
            .text()
            .await
            .map_err(|source| InvalidCredentialsError::Transport { endpoint, source })?;
        serde_json::from_str(&text).map_err(|err| {
            InvalidCredentialsError::Malformed(format!("{endpoint} response: {err}"))
        })
    }
}

/// Expiry check with the safety margin applied.
///
/// A token is expired once `now >= exp - EXPIRY_MARGIN_SECS`.
pub fn is_expired_at(exp: i64, now: i64) -> bool {
    now > exp || now >= exp.saturating_sub(EXPIRY_MARGIN_SECS)
}

/// Decodes the token's `exp` claim and applies [`is_expired_at`].
pub fn is_token_expired_at(token: &str, now: i64) -> Result<bool, InvalidCredentialsError> {
    Ok(is_expired_at(token_expiry(token)?, now))
}

/// Reads the `exp` claim (unix seconds) from a JWT without verifying it.
///
/// A payload without `exp` yields `0`, so such tokens are always expired.
pub fn token_expiry(token: &str) -> Result<i64, InvalidCredentialsError> {
    #[derive(Deserialize)]
    struct Claims {
        #[serde(default)]
        exp: Option<f64>,
    }

    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_header), Some(payload), Some(_signature)) => payload,
        _ => {
            return Err(InvalidCredentialsError::Malformed(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| InvalidCredentialsError::Malformed(format!("payload base64: {err}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|err| InvalidCredentialsError::Malformed(format!("payload json: {err}")))?;

    Ok(claims.exp.unwrap_or(0.0) as i64)
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
