//! Remote service client.
//!
//! A thin, retryable wrapper over the compliance service's REST control
//! plane. The client knows nothing about endpoints or payload shapes —
//! those belong to the resolver, provisioner, and poller. It provides:
//!
//! - **[`RemoteApi`]** — the `{get, post, delete}` capability every
//!   component consumes, mockable in tests.
//! - **[`HttpRemoteApi`]** — the production implementation over
//!   `reqwest`, with an injected [`TokenSource`] and bounded retry.
//! - **[`classify`]** — maps an HTTP status into the four outcomes the
//!   orchestrator reasons about.
//!
//! # Retry Strategy
//!
//! - Network errors (timeout, connect, request) → retry
//! - HTTP 429 (rate limited) → retry
//! - HTTP 401 → refresh the credential once, then retry immediately
//! - Any other HTTP status → returned to the caller for classification
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! 5xx responses are deliberately *not* retried here: during polling
//! they are "not yet" signals the state machine must see, and each
//! polling phase already carries its own time budget.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::ServiceConfig;
use crate::error::TransportError;

/// A raw response: status code plus body bytes, unclassified.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, lossily decoded. For error details and logging.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The four outcomes the orchestrator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOutcome {
    Success,
    NotFound,
    /// Server-side or rate-limit condition that may clear on its own.
    Transient,
    /// Client-side error that will not clear by retrying.
    Fatal,
}

/// Classify an HTTP status into an [`ApiOutcome`].
pub fn classify(status: u16) -> ApiOutcome {
    match status {
        200..=299 => ApiOutcome::Success,
        404 => ApiOutcome::NotFound,
        408 | 429 => ApiOutcome::Transient,
        500..=599 => ApiOutcome::Transient,
        _ => ApiOutcome::Fatal,
    }
}

/// The generic `{get, post, delete}` capability the orchestrator
/// consumes. Paths are relative to the service base URL.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn get(&self, path: &str) -> Result<ApiResponse, TransportError>;
    async fn post(&self, path: &str, body: serde_json::Value)
        -> Result<ApiResponse, TransportError>;
    async fn delete(&self, path: &str) -> Result<ApiResponse, TransportError>;
}

/// A refreshable credential, injected into the client at construction.
///
/// Never a module-level singleton: the client owns exactly one source
/// and calls [`refresh`](TokenSource::refresh) itself when the service
/// answers 401.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current bearer token.
    async fn token(&self) -> Result<String, TransportError>;
    /// Force re-acquisition; returns the fresh token.
    async fn refresh(&self) -> Result<String, TransportError>;
}

/// Token supplied externally through an environment variable.
///
/// Re-reads the variable on every call, so an external rotation process
/// can swap the credential under a long poll.
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn token(&self) -> Result<String, TransportError> {
        std::env::var(&self.var)
            .map_err(|_| TransportError::Token(format!("{} is not set", self.var)))
    }

    async fn refresh(&self) -> Result<String, TransportError> {
        self.token().await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: std::time::Instant,
}

/// OAuth client-credentials token source with expiry-aware caching.
pub struct OAuthTokenSource {
    token_url: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenSource {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;
        Ok(Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<CachedToken, TransportError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| TransportError::Token(format!("token request: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Token(format!(
                "token endpoint answered {}: {}",
                status, body
            )));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Token(format!("token response: {}", e)))?;

        // Refresh one minute early so a token never expires mid-request.
        let ttl = Duration::from_secs(parsed.expires_in.unwrap_or(3600).saturating_sub(60));
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: std::time::Instant::now() + ttl,
        })
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn token(&self) -> Result<String, TransportError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > std::time::Instant::now() {
                return Ok(entry.token.clone());
            }
        }
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn refresh(&self) -> Result<String, TransportError> {
        let mut cached = self.cached.lock().await;
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Build the appropriate [`TokenSource`] for the service configuration:
/// OAuth client-credentials when `token_url` is set, otherwise the
/// environment variable named by `token_env`.
pub fn create_token_source(config: &ServiceConfig) -> Result<Box<dyn TokenSource>, TransportError> {
    match &config.token_url {
        Some(url) => {
            let client_id = std::env::var(&config.client_id_env)
                .map_err(|_| TransportError::Token(format!("{} is not set", config.client_id_env)))?;
            let client_secret = std::env::var(&config.client_secret_env).map_err(|_| {
                TransportError::Token(format!("{} is not set", config.client_secret_env))
            })?;
            Ok(Box::new(OAuthTokenSource::new(
                url.clone(),
                client_id,
                client_secret,
            )?))
        }
        None => Ok(Box::new(EnvTokenSource::new(config.token_env.clone()))),
    }
}

/// Production [`RemoteApi`] over `reqwest`.
pub struct HttpRemoteApi {
    http: reqwest::Client,
    base_url: String,
    tokens: Box<dyn TokenSource>,
    max_retries: u32,
}

impl HttpRemoteApi {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Box<dyn TokenSource>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            tokens,
            max_retries,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, TransportError> {
        let tokens = create_token_source(config)?;
        Self::new(
            config.base_url.clone(),
            tokens,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.url(path);
        let mut token = self.tokens.token().await?;
        let mut refreshed = false;
        let mut last_detail = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {}", token))
                .header("Accept", "application/json");
            if let Some(json) = body {
                request = request.json(json);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    // Auth expiry: refresh the credential once per call.
                    if status == 401 && !refreshed {
                        token = self.tokens.refresh().await?;
                        refreshed = true;
                        last_detail = "unauthorized (401)".to_string();
                        continue;
                    }

                    if status == 429 {
                        last_detail = format!("rate limited ({})", status);
                        continue;
                    }

                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| TransportError::Request {
                            path: path.to_string(),
                            source: e,
                        })?;
                    return Ok(ApiResponse {
                        status,
                        body: bytes.to_vec(),
                    });
                }
                Err(e) => {
                    last_detail = e.to_string();
                    continue;
                }
            }
        }

        Err(TransportError::RetriesExhausted {
            path: path.to_string(),
            attempts: self.max_retries + 1,
            detail: last_detail,
        })
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn get(&self, path: &str) -> Result<ApiResponse, TransportError> {
        self.send(reqwest::Method::GET, path, None).await
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, TransportError> {
        self.send(reqwest::Method::POST, path, Some(&body)).await
    }

    async fn delete(&self, path: &str) -> Result<ApiResponse, TransportError> {
        self.send(reqwest::Method::DELETE, path, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_success_range() {
        assert_eq!(classify(200), ApiOutcome::Success);
        assert_eq!(classify(201), ApiOutcome::Success);
        assert_eq!(classify(202), ApiOutcome::Success);
        assert_eq!(classify(204), ApiOutcome::Success);
    }

    #[test]
    fn classify_not_found() {
        assert_eq!(classify(404), ApiOutcome::NotFound);
    }

    #[test]
    fn classify_transient() {
        assert_eq!(classify(408), ApiOutcome::Transient);
        assert_eq!(classify(429), ApiOutcome::Transient);
        assert_eq!(classify(500), ApiOutcome::Transient);
        assert_eq!(classify(503), ApiOutcome::Transient);
    }

    #[test]
    fn classify_fatal_client_errors() {
        assert_eq!(classify(400), ApiOutcome::Fatal);
        assert_eq!(classify(401), ApiOutcome::Fatal);
        assert_eq!(classify(403), ApiOutcome::Fatal);
        assert_eq!(classify(409), ApiOutcome::Fatal);
    }

    #[test]
    fn url_join_normalizes_slashes() {
        let api = HttpRemoteApi::new(
            "https://svc.example.com/api/",
            Box::new(EnvTokenSource::new("UNSET_TEST_TOKEN")),
            Duration::from_secs(5),
            0,
        )
        .unwrap();
        assert_eq!(api.url("/cases"), "https://svc.example.com/api/cases");
        assert_eq!(api.url("cases"), "https://svc.example.com/api/cases");
    }

    #[test]
    fn response_body_text_lossy() {
        let r = ApiResponse {
            status: 500,
            body: b"server exploded".to_vec(),
        };
        assert_eq!(r.body_text(), "server exploded");
    }
}
