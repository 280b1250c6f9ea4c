//! epx-catalog
//!
//! Client for the remote alert catalog (a Kowalski-style query API). Each
//! event becomes one structured query; batches go out with a bounded
//! fan-out and a per-call timeout, and every query fails or succeeds on its
//! own so one bad cone does not poison the cycle.

pub mod queries;

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;

pub use queries::{
    archival_query, cone_search_query, ArchivalSearchSpec, ConeSearchSpec, ZTF_ALERTS_CATALOG,
};

pub const QUERIES_PATH: &str = "/api/queries";

/// Upper bound on in-flight catalog queries per batch.
pub const MAX_CONCURRENT_QUERIES: usize = 4;

/// Errors a catalog query may return. Transport failures (including the
/// per-call timeout) are retryable on a later cycle; the others are not.
#[derive(Debug)]
pub enum CatalogError {
    /// Network or transport failure, including timeouts.
    Transport(String),
    /// The catalog answered with an application-level error.
    Api { status: Option<u16>, message: String },
    /// A response payload could not be decoded.
    Decode(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Transport(msg) => write!(f, "catalog transport error: {msg}"),
            CatalogError::Api {
                status: Some(code),
                message,
            } => write!(f, "catalog api error status={code}: {message}"),
            CatalogError::Api {
                status: None,
                message,
            } => write!(f, "catalog api error: {message}"),
            CatalogError::Decode(msg) => write!(f, "catalog decode error: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// One alert as projected by the catalog. The PS1 star colors ride along
/// for the local post-filter and are dropped before persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertCandidate {
    pub candid: i64,
    pub object_id: String,
    pub jd: f64,
    pub ra: f64,
    pub dec: f64,
    #[serde(default)]
    pub fid: Option<i32>,
    #[serde(default)]
    pub magpsf: Option<f64>,
    #[serde(default)]
    pub sigmapsf: Option<f64>,
    #[serde(default)]
    pub drb: Option<f64>,
    #[serde(default)]
    pub jdstarthist: Option<f64>,
    #[serde(default)]
    pub sgscore: Option<f64>,
    #[serde(default)]
    pub distpsnr: Option<f64>,
    #[serde(default)]
    pub ssdistnr: Option<f64>,
    #[serde(default)]
    pub ssmagnr: Option<f64>,
    #[serde(default)]
    pub ndethist: Option<i64>,
    #[serde(default)]
    pub srmag: Option<f64>,
    #[serde(default)]
    pub simag: Option<f64>,
    #[serde(default)]
    pub szmag: Option<f64>,
}

/// Result of one per-event query within a batch.
#[derive(Debug)]
pub struct SearchOutcome {
    pub event_name: String,
    pub result: Result<Vec<AlertCandidate>, CatalogError>,
}

/// Remote alert catalog contract.
#[async_trait::async_trait]
pub trait AlertCatalog: Send + Sync {
    /// Prompt-window cone searches, one per event.
    async fn prompt_searches(&self, specs: &[ConeSearchSpec]) -> Vec<SearchOutcome>;

    /// Archival lookback aggregations, one per event.
    async fn archival_searches(&self, specs: &[ArchivalSearchSpec]) -> Vec<SearchOutcome>;
}

/// HTTP client for a Kowalski-compatible catalog service.
#[derive(Debug, Clone)]
pub struct KowalskiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl KowalskiClient {
    pub fn new(base_url: String, token: String, timeout_secs: f64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_secs.max(1.0)))
            .build()
            .context("build catalog http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn submit(&self, query: &Value) -> Result<ApiResponse, CatalogError> {
        let url = format!("{}{QUERIES_PATH}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(query)
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let status = resp.status();
        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;

        if !status.is_success() {
            return Err(CatalogError::Api {
                status: Some(status.as_u16()),
                message: body.message.unwrap_or_else(|| "unknown".to_string()),
            });
        }
        if body.status != "success" {
            return Err(CatalogError::Api {
                status: None,
                message: body.message.unwrap_or_else(|| "unknown".to_string()),
            });
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl AlertCatalog for KowalskiClient {
    async fn prompt_searches(&self, specs: &[ConeSearchSpec]) -> Vec<SearchOutcome> {
        let mut futures: Vec<BoxFuture<'_, SearchOutcome>> = Vec::with_capacity(specs.len());
        for spec in specs.iter() {
            let query = cone_search_query(spec);
            futures.push(Box::pin(async move {
                let result = match self.submit(&query).await {
                    Ok(resp) => parse_cone_data(&resp.data, &spec.event_name),
                    Err(err) => Err(err),
                };
                SearchOutcome {
                    event_name: spec.event_name.clone(),
                    result,
                }
            }));
        }
        stream::iter(futures)
            .buffer_unordered(MAX_CONCURRENT_QUERIES)
            .collect()
            .await
    }

    async fn archival_searches(&self, specs: &[ArchivalSearchSpec]) -> Vec<SearchOutcome> {
        let mut futures: Vec<BoxFuture<'_, SearchOutcome>> = Vec::with_capacity(specs.len());
        for spec in specs.iter() {
            let query = archival_query(spec);
            futures.push(Box::pin(async move {
                let result = match self.submit(&query).await {
                    Ok(resp) => parse_archival_data(&resp.data),
                    Err(err) => Err(err),
                };
                SearchOutcome {
                    event_name: spec.event_name.clone(),
                    result,
                }
            }));
        }
        stream::iter(futures)
            .buffer_unordered(MAX_CONCURRENT_QUERIES)
            .collect()
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Cone-search payloads come back keyed by catalog, then by the event name
/// the request used. An absent key means an empty cone, not an error.
fn parse_cone_data(data: &Value, event_name: &str) -> Result<Vec<AlertCandidate>, CatalogError> {
    let matches = match data.get(ZTF_ALERTS_CATALOG).and_then(|c| c.get(event_name)) {
        Some(v) => v.clone(),
        None => return Ok(Vec::new()),
    };
    serde_json::from_value(matches).map_err(|e| CatalogError::Decode(e.to_string()))
}

/// Aggregation payloads are a one-element array bundling the event name
/// with its per-object alerts.
fn parse_archival_data(data: &Value) -> Result<Vec<AlertCandidate>, CatalogError> {
    let first = match data.as_array().and_then(|a| a.first()) {
        Some(v) => v,
        None => return Ok(Vec::new()),
    };
    let objects = first.get("objects").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(objects).map_err(|e| CatalogError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn cone_spec(name: &str) -> ConeSearchSpec {
        ConeSearchSpec {
            event_name: name.to_string(),
            ra: 10.0,
            dec: 20.0,
            radius_arcsec: 36.0,
            jd_start: 2_460_369.5,
            jd_end: 2_460_401.5,
        }
    }

    fn alert_json(candid: i64) -> Value {
        json!({
            "candid": candid,
            "object_id": "ZTF24aabbccd",
            "jd": 2_460_370.6,
            "ra": 10.001,
            "dec": 20.001,
            "fid": 1,
            "magpsf": 18.5,
            "sigmapsf": 0.07,
            "drb": 0.98,
            "jdstarthist": 2_460_370.1,
            "sgscore": 0.02,
            "distpsnr": 3.4,
            "ssdistnr": -999.0,
            "ssmagnr": -999.0,
            "ndethist": 4,
            "srmag": 21.2,
            "simag": 20.9,
            "szmag": null,
        })
    }

    #[tokio::test]
    async fn prompt_batch_parses_per_event_results() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST)
                .path(QUERIES_PATH)
                .header("authorization", "Bearer secret")
                .body_contains("EP240301a");
            then.status(200).json_body(json!({
                "status": "success",
                "data": { ZTF_ALERTS_CATALOG: { "EP240301a": [alert_json(1), alert_json(2)] } }
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path(QUERIES_PATH).body_contains("EP240301b");
            then.status(200).json_body(json!({
                "status": "error",
                "message": "cone too large",
            }));
        });

        let client =
            KowalskiClient::new(server.base_url(), "secret".to_string(), 10.0).unwrap();
        let outcomes = client
            .prompt_searches(&[cone_spec("EP240301a"), cone_spec("EP240301b")])
            .await;

        let ok = outcomes.iter().find(|o| o.event_name == "EP240301a").unwrap();
        assert_eq!(ok.result.as_ref().unwrap().len(), 2);

        let failed = outcomes.iter().find(|o| o.event_name == "EP240301b").unwrap();
        let err = failed.result.as_ref().unwrap_err();
        assert!(err.to_string().contains("cone too large"));
    }

    #[tokio::test]
    async fn empty_cone_is_not_an_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path(QUERIES_PATH);
            then.status(200).json_body(json!({
                "status": "success",
                "data": { ZTF_ALERTS_CATALOG: {} }
            }));
        });

        let client = KowalskiClient::new(server.base_url(), "secret".to_string(), 10.0).unwrap();
        let outcomes = client.prompt_searches(&[cone_spec("EP240301a")]).await;
        assert!(outcomes[0].result.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn archival_batch_unwraps_object_bundle() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path(QUERIES_PATH);
            then.status(200).json_body(json!({
                "status": "success",
                "data": [{ "_id": "EP240301a", "objects": [alert_json(9)] }]
            }));
        });

        let client = KowalskiClient::new(server.base_url(), "secret".to_string(), 10.0).unwrap();
        let spec = ArchivalSearchSpec {
            event_name: "EP240301a".to_string(),
            ra: 10.0,
            dec: 20.0,
            radius_deg: 0.01,
            jd_start: 2_460_338.5,
            jd_end: 2_460_369.5,
        };
        let outcomes = client.archival_searches(&[spec]).await;
        let alerts = outcomes[0].result.as_ref().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].candid, 9);
        assert_eq!(alerts[0].szmag, None);
    }

    #[tokio::test]
    async fn http_failure_is_a_transport_or_api_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path(QUERIES_PATH);
            then.status(500).json_body(json!({
                "status": "error",
                "message": "internal",
            }));
        });

        let client = KowalskiClient::new(server.base_url(), "secret".to_string(), 10.0).unwrap();
        let outcomes = client.prompt_searches(&[cone_spec("EP240301a")]).await;
        assert!(outcomes[0].result.is_err());
    }
}
