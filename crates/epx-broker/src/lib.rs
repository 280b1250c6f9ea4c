//! epx-broker
//!
//! Client for the downstream follow-up broker (a SkyPortal-style API).
//! Rate limits and outages are retried in place with a bounded budget
//! (1 s on 429, 30 s on 503 or timeout); a duplicate-key rejection when
//! posting a candidate counts as success, so retries never create
//! duplicates downstream.

pub mod annotations;

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use epx_schemas::time::isot_from_jd;

pub use annotations::{
    from_parallel, round2, to_parallel, upsert, EventAnnotation, ANNOTATION_ORIGIN,
};

/// Substring the broker returns when a candidate already exists.
pub const DUPLICATE_CANDIDATE_MARKER: &str =
    r#"duplicate key value violates unique constraint "candidates_main_index""#;

/// Attempt budget for transient failures on a single call.
const MAX_TRANSIENT_RETRIES: u32 = 5;

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);
const OUTAGE_BACKOFF: Duration = Duration::from_secs(30);

/// Errors from the broker boundary, split so callers can tell transient
/// conditions (retried here) from hard failures.
#[derive(Debug)]
pub enum BrokerError {
    /// Still rate-limited / unavailable after the retry budget.
    TransientExhausted(String),
    Http { status: u16, message: String },
    Transport(String),
    Decode(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::TransientExhausted(msg) => {
                write!(f, "broker still unavailable after retries: {msg}")
            }
            BrokerError::Http { status, message } => {
                write!(f, "broker http error status={status}: {message}")
            }
            BrokerError::Transport(msg) => write!(f, "broker transport error: {msg}"),
            BrokerError::Decode(msg) => write!(f, "broker decode error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// The fields of a cross-match the broker needs to see.
#[derive(Debug, Clone)]
pub struct AlertToPost {
    pub object_id: String,
    pub candid: i64,
    pub jd: f64,
    pub ra: f64,
    pub dec: f64,
    pub drb: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCandidateOutcome {
    Posted,
    /// The broker already had it; treated as success.
    AlreadyExists,
}

/// An annotation as returned by the broker, with enough identity to update
/// it in place.
#[derive(Debug, Clone)]
pub struct RemoteAnnotation {
    pub id: i64,
    pub origin: String,
    pub author_id: Option<i64>,
    pub data: Value,
}

/// HTTP client for a SkyPortal-compatible broker.
#[derive(Debug, Clone)]
pub struct SkyPortalClient {
    http: reqwest::Client,
    host: String,
    token: String,
    filter_id: i64,
    group_id: i64,
}

impl SkyPortalClient {
    /// Connect and bootstrap: the configured filter id must exist at the
    /// broker, and its group id is what candidates and annotations go to.
    pub async fn connect(host: String, token: String, filter_id: i64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build broker http client")?;

        let mut client = Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            token,
            filter_id,
            group_id: 0,
        };

        let (status, body) = client.api(reqwest::Method::GET, "filters", None).await?;
        if status != 200 {
            bail!("failed to fetch broker filters: status={status}");
        }
        let filters = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let group_id = filters
            .iter()
            .find(|f| f.get("id").and_then(Value::as_i64) == Some(filter_id))
            .and_then(|f| f.get("group_id").and_then(Value::as_i64))
            .ok_or_else(|| anyhow!("filter id={filter_id} not found at the broker"))?;

        client.group_id = group_id;
        info!(filter_id, group_id, "broker client ready");
        Ok(client)
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    /// One API call with in-place retries for 429/503/timeout. Returns the
    /// final status and decoded body (Null when the body is not JSON).
    async fn api(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<(u16, Value), BrokerError> {
        let url = format!("{}/api/{}", self.host, endpoint);

        let mut attempts = 0u32;
        loop {
            attempts += 1;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("token {}", self.token));
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(err) if err.is_timeout() => {
                    if attempts >= MAX_TRANSIENT_RETRIES {
                        return Err(BrokerError::TransientExhausted("request timed out".into()));
                    }
                    warn!(endpoint, "broker request timed out, waiting 30s");
                    tokio::time::sleep(OUTAGE_BACKOFF).await;
                    continue;
                }
                Err(err) => return Err(BrokerError::Transport(err.to_string())),
            };

            let status = response.status().as_u16();
            if status == 429 || status == 503 {
                if attempts >= MAX_TRANSIENT_RETRIES {
                    return Err(BrokerError::TransientExhausted(format!("status={status}")));
                }
                let backoff = if status == 429 {
                    debug!(endpoint, "broker rate limit, waiting 1s");
                    RATE_LIMIT_BACKOFF
                } else {
                    warn!(endpoint, "broker unavailable, waiting 30s");
                    OUTAGE_BACKOFF
                };
                tokio::time::sleep(backoff).await;
                continue;
            }

            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            return Ok((status, body));
        }
    }

    /// Post one candidate. A duplicate-key rejection is success.
    pub async fn post_candidate(&self, alert: &AlertToPost) -> Result<PostCandidateOutcome> {
        let passed_at = isot_from_jd(alert.jd)?;
        let payload = json!({
            "id": alert.object_id,
            "ra": alert.ra,
            "dec": alert.dec,
            "score": alert.drb,
            "filter_ids": [self.filter_id],
            "passing_alert_id": alert.candid,
            "passed_at": passed_at,
            "origin": ANNOTATION_ORIGIN,
        });

        let (status, body) = self
            .api(reqwest::Method::POST, "candidates", Some(&payload))
            .await?;
        if status == 200 {
            return Ok(PostCandidateOutcome::Posted);
        }

        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if message.contains(DUPLICATE_CANDIDATE_MARKER) {
            return Ok(PostCandidateOutcome::AlreadyExists);
        }

        Err(BrokerError::Http {
            status,
            message: message.to_string(),
        }
        .into())
    }

    /// Pull the alert's photometry into the broker from the alert source.
    pub async fn import_alert(
        &self,
        object_id: &str,
        candid: i64,
        import_group_id: i64,
    ) -> Result<()> {
        let payload = json!({
            "candid": candid,
            "group_ids": [import_group_id],
        });
        let (status, body) = self
            .api(
                reqwest::Method::POST,
                &format!("alerts/{object_id}"),
                Some(&payload),
            )
            .await?;
        if status != 200 {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(BrokerError::Http {
                status,
                message: message.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Fetch a source's annotations.
    pub async fn fetch_annotations(&self, object_id: &str) -> Result<Vec<RemoteAnnotation>> {
        let (status, body) = self
            .api(
                reqwest::Method::GET,
                &format!("sources/{object_id}/annotations"),
                None,
            )
            .await?;
        if status != 200 {
            bail!("failed to fetch annotations for {object_id}: status={status}");
        }

        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let annotations = rows
            .iter()
            .filter_map(|row| {
                Some(RemoteAnnotation {
                    id: row.get("id")?.as_i64()?,
                    origin: row.get("origin")?.as_str()?.to_string(),
                    author_id: row.get("author_id").and_then(Value::as_i64),
                    data: row.get("data").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        Ok(annotations)
    }

    /// Write one event's annotation onto a source: create this pipeline's
    /// annotation if absent, otherwise merge the per-event record into the
    /// existing parallel-list payload and update in place.
    pub async fn upsert_annotation(&self, object_id: &str, entry: EventAnnotation) -> Result<()> {
        let existing = self.fetch_annotations(object_id).await?;
        let ours = existing.iter().find(|a| a.origin == ANNOTATION_ORIGIN);

        match ours {
            None => {
                let payload = json!({
                    "obj_id": object_id,
                    "origin": ANNOTATION_ORIGIN,
                    "data": to_parallel(&[entry]),
                    "group_ids": [self.group_id],
                });
                let (status, body) = self
                    .api(
                        reqwest::Method::POST,
                        &format!("sources/{object_id}/annotations"),
                        Some(&payload),
                    )
                    .await?;
                if status != 200 {
                    let message = body
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    bail!("failed to post annotation for {object_id}: status={status} {message}");
                }
            }
            Some(annotation) => {
                let mut records = from_parallel(&annotation.data);
                upsert(&mut records, entry);

                let mut payload = json!({
                    "obj_id": object_id,
                    "origin": ANNOTATION_ORIGIN,
                    "data": to_parallel(&records),
                    "group_ids": [self.group_id],
                });
                if let Some(author_id) = annotation.author_id {
                    payload["author_id"] = json!(author_id);
                }

                let (status, body) = self
                    .api(
                        reqwest::Method::PUT,
                        &format!("sources/{}/annotations/{}", object_id, annotation.id),
                        Some(&payload),
                    )
                    .await?;
                if status != 200 {
                    let message = body
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    bail!(
                        "failed to update annotation {} for {object_id}: status={status} {message}",
                        annotation.id
                    );
                }
            }
        }
        Ok(())
    }
}
