//! tfo poll: asks the poll API whether a job has finished and which objects it produced.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value as Json;
use tfo_core::{JobRef, PollResult};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("login failed: {reason}")]
    Login { reason: String },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decoding poll response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of poll results for a job.
#[async_trait]
pub trait PollClient: Send + Sync {
    async fn read(&self, job: &JobRef) -> Result<PollResult, PollError>;
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Scheme, host and port only; request paths are joined onto it.
    pub base_url: Url,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl PollConfig {
    pub fn new(base_url: Url, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { base_url, user: user.into(), password: password.into(), timeout: Duration::from_secs(30) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `{protocol}://{host}:{port}`
pub fn base_url(protocol: &str, host: &str, port: u16) -> Result<Url, PollError> {
    Ok(Url::parse(&format!("{protocol}://{host}:{port}"))?)
}

#[derive(Serialize)]
struct Credentials<'a> {
    user: &'a str,
    password: &'a str,
}

/// The login response carries the token as a string or a one-element list.
fn token_from(data: &Json) -> Option<String> {
    let token = match data {
        Json::String(s) => Some(s.as_str()),
        Json::Array(items) => items.first().and_then(|v| v.as_str()),
        _ => None,
    };
    token.filter(|t| !t.is_empty()).map(str::to_string)
}

/// HTTP poll client with a cached bearer token. A rejected token triggers one re-login.
pub struct HttpPollClient {
    http: reqwest::Client,
    config: Arc<PollConfig>,
    token: Mutex<Option<String>>,
}

impl HttpPollClient {
    pub fn new(config: PollConfig) -> Result<Self, PollError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config: Arc::new(config), token: Mutex::new(None) })
    }

    pub fn poll_url(&self, uid: &str) -> Result<Url, PollError> {
        Ok(self.config.base_url.join(&format!("api/v1/poll/{uid}"))?)
    }

    async fn login(&self) -> Result<String, PollError> {
        let url = self.config.base_url.join("login")?;
        let resp = self
            .http
            .post(url)
            .json(&Credentials { user: &self.config.user, password: &self.config.password })
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(PollError::Login { reason: format!("status {}: {}", status.as_u16(), body) });
        }
        let envelope: PollResult = serde_json::from_str(&body)?;
        let token = token_from(&envelope.data.data).ok_or_else(|| PollError::Login { reason: "response carried no token".into() })?;
        info!(user = %self.config.user, "logged in to poll api");
        Ok(token)
    }

    async fn token(&self) -> Result<String, PollError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            return Ok(t.clone());
        }
        let t = self.login().await?;
        *cached = Some(t.clone());
        Ok(t)
    }

    async fn get(&self, uid: &str) -> Result<reqwest::Response, PollError> {
        let token = self.token().await?;
        Ok(self.http.get(self.poll_url(uid)?).bearer_auth(token).send().await?)
    }

    /// Non-2xx bodies are still decoded when they carry the usual envelope (e.g. a not-found result).
    async fn decode(resp: reqwest::Response) -> Result<PollResult, PollError> {
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }
        serde_json::from_str::<PollResult>(&body).map_err(|_| PollError::Status { status: status.as_u16(), body })
    }
}

#[async_trait]
impl PollClient for HttpPollClient {
    async fn read(&self, job: &JobRef) -> Result<PollResult, PollError> {
        counter!("poll_requests_total", 1u64);
        let mut resp = self.get(&job.uid).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!(uid = %job.uid, "token rejected; logging in again");
            *self.token.lock().await = None;
            resp = self.get(&job.uid).await?;
        }
        Self::decode(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_shapes() {
        assert_eq!(token_from(&json!("abc")), Some("abc".to_string()));
        assert_eq!(token_from(&json!(["abc"])), Some("abc".to_string()));
        assert_eq!(token_from(&json!([])), None);
        assert_eq!(token_from(&json!("")), None);
        assert_eq!(token_from(&json!({"token": "abc"})), None);
    }

    #[test]
    fn urls_join_onto_origin() {
        let base = base_url("https", "tfo-api.example", 8443).unwrap();
        assert_eq!(base.as_str(), "https://tfo-api.example:8443/");
        let client = HttpPollClient::new(PollConfig::new(base, "u", "p")).unwrap();
        assert_eq!(client.poll_url("4f1c").unwrap().as_str(), "https://tfo-api.example:8443/api/v1/poll/4f1c");
    }

    #[test]
    fn bad_protocol_is_rejected() {
        assert!(matches!(base_url("", "host", 80), Err(PollError::Url(_))));
    }
}
