//! epx-upstream
//!
//! Client for the upstream event producer. The feed hands out short-lived
//! tokens against email/password credentials; tokens live in memory only
//! and are re-requested every cycle. Records come back as raw JSON objects
//! so the ingester can run the column allow-list before any typed parsing.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const TOKEN_PATH: &str = "/api/get_tokenp";
pub const CANDIDATES_PATH: &str = "/data_center/api/unverified_candidates";

/// One candidate record exactly as the feed returns it.
pub type RawCandidate = serde_json::Map<String, Value>;

/// Upstream event feed contract.
///
/// Implementations must be `Send + Sync` so callers can hold a
/// `Box<dyn EventProvider>` across task boundaries.
#[async_trait::async_trait]
pub trait EventProvider: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Fetch the current batch of unverified candidates.
    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>>;
}

/// HTTP client for the production event feed.
///
/// Credentials are read by the caller and passed in; do not log them.
#[derive(Debug, Clone)]
pub struct EpClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
}

impl EpClient {
    pub fn new(email: String, password: String) -> Result<Self> {
        Self::new_with_base_url(email, password, epx_config::DEFAULT_EP_BASE_URL.to_string())
    }

    pub fn new_with_base_url(email: String, password: String, base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build upstream http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            password,
        })
    }

    /// Exchange credentials for a fresh token. Never cached.
    async fn fetch_token(&self) -> Result<String> {
        let url = format!("{}{TOKEN_PATH}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "email": self.email,
                "password": self.password,
            }))
            .send()
            .await
            .context("upstream token request failed")?
            .error_for_status()
            .context("upstream token request rejected")?;

        let body: TokenResponse = resp
            .json()
            .await
            .context("upstream token response decode failed")?;
        body.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("upstream token response carried no token"))
    }
}

#[async_trait::async_trait]
impl EventProvider for EpClient {
    fn source_name(&self) -> &'static str {
        "ep"
    }

    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>> {
        let token = self.fetch_token().await?;

        let url = format!("{}{CANDIDATES_PATH}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("tdic-token", &token)
            .query(&[("token", token.as_str())])
            .send()
            .await
            .context("upstream candidates request failed")?
            .error_for_status()
            .context("upstream candidates request rejected")?;

        let body: Value = resp
            .json()
            .await
            .context("upstream candidates response decode failed")?;

        match body {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(anyhow!("candidate record is not an object: {other}")),
                })
                .collect(),
            other => Err(anyhow!(
                "upstream candidates endpoint did not return an array: {}",
                truncate_for_log(&other.to_string())
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 200;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX).collect();
        format!("{head}…")
    }
}
