use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::auth::{InvalidCredentialsError, TokenStrategy};
use crate::config::trim_base_url;

const ERROR_BODY_SNIPPET_LEN: usize = 220;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiDefaults;

impl ApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ApiDefaults::CONNECT_TIMEOUT,
            request_timeout: ApiDefaults::REQUEST_TIMEOUT,
        }
    }
}

/// Builds the HTTP client shared by the REST surfaces and the token strategy.
pub fn build_http_client(options: &ApiClientOptions) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(options.connect_timeout)
        .build()
}

/// Authenticated JSON client for the REST API.
///
/// Every request fetches a bearer token from the [`TokenStrategy`]; token
/// caching lives entirely in the strategy. Requests are sent once and any
/// non-2xx status is returned as [`ApiError::HttpStatus`].
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenStrategy>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: Arc<TokenStrategy>) -> Result<Self, ApiError> {
        Self::with_options(base_url, tokens, ApiClientOptions::default())
    }

    pub fn with_options(
        base_url: &str,
        tokens: Arc<TokenStrategy>,
        options: ApiClientOptions,
    ) -> Result<Self, ApiError> {
        let http = build_http_client(&options).map_err(ApiError::Transport)?;
        Ok(Self::from_http(http, base_url, tokens, options.request_timeout))
    }

    /// Wraps an existing HTTP client.
    pub fn from_http(
        http: Client,
        base_url: &str,
        tokens: Arc<TokenStrategy>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: trim_base_url(base_url),
            tokens,
            request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<TokenStrategy> {
        &self.tokens
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(self.request(Method::GET, path)).await
    }

    pub async fn get_with_query<Q>(&self, path: &str, query: &Q) -> Result<Value, ApiError>
    where
        Q: Serialize + ?Sized,
    {
        self.execute(self.request(Method::GET, path).query(query)).await
    }

    pub async fn post<T>(&self, path: &str, body: &T) -> Result<Value, ApiError>
    where
        T: Serialize + ?Sized,
    {
        self.execute(self.request(Method::POST, path).json(body)).await
    }

    pub async fn put<T>(&self, path: &str, body: &T) -> Result<Value, ApiError>
    where
        T: Serialize + ?Sized,
    {
        self.execute(self.request(Method::PUT, path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(self.request(Method::DELETE, path)).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .timeout(self.request_timeout)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Value, ApiError> {
        let token = self.tokens.token().await?;
        let response = builder
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(ApiError::Transport)?;

        let status = response.status();
        let url = response.url().path().to_string();
        let body = response.text().await.map_err(ApiError::Transport)?;
        debug!(event = "api_response", path = %url, status = status.as_u16());

        if !status.is_success() {
            return Err(ApiError::HttpStatus { status, body });
        }

        Ok(parse_response_body(body))
    }
}

/// Errors returned by REST calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Credentials(#[from] InvalidCredentialsError),

    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    /// Non-2xx response. `body` holds the full response text.
    #[error("http status {status}: {}", summarize_error_body(.body))]
    HttpStatus { status: StatusCode, body: String },
}

impl ApiError {
    /// Status code of an [`ApiError::HttpStatus`] error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::HttpStatus { status, .. } if status.is_client_error())
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::HttpStatus { status, .. } if status.is_server_error())
    }
}

// Successful responses are usually JSON; anything else is kept as a string.
fn parse_response_body(body: String) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

fn summarize_error_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
