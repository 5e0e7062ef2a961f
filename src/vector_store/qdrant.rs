//! Qdrant REST backend.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use super::{CollectionName, Distance, IndexedPoint, ScoredPoint, VectorBackend};
use crate::embeddings::ChunkRecord;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Blocking client for a Qdrant server or cloud cluster.
#[derive(Clone)]
pub struct QdrantBackend {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl QdrantBackend {
    /// Connects to `url` (e.g. `http://localhost:6333`), with an optional API key.
    pub fn new(
        url: &str,
        api_key: Option<&str>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|err| Error::Config(format!("invalid Qdrant URL {url:?}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!("Qdrant URL must be http(s): {url}")));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            headers.insert(
                HeaderName::from_static("api-key"),
                HeaderValue::from_str(key)
                    .map_err(|_| Error::Config("invalid Qdrant API key".to_string()))?,
            );
        }
        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| Error::Config(format!("failed to build Qdrant HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn collection_url(&self, name: &CollectionName) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    /// Sends a request built by `build`, retrying transient failures.
    fn send<F>(&self, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry.run(operation, |_| {
            build(&self.http)
                .send()
                .map_err(|err| Error::from_transport(operation, err))
                .and_then(|resp| {
                    let status = resp.status();
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        Err(Error::from_status(status, body_text(resp)))
                    } else {
                        Ok(resp)
                    }
                })
        })
    }
}

fn body_text(resp: Response) -> String {
    resp.text()
        .unwrap_or_else(|_| "<body unavailable>".to_string())
}

fn expect_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(Error::from_status(status, body_text(resp)))
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct SearchEntry {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

impl VectorBackend for QdrantBackend {
    fn collection_exists(&self, name: &CollectionName) -> Result<bool> {
        let url = self.collection_url(name);
        let resp = self.send("qdrant get collection", |http| http.get(&url))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => expect_success(resp).map(|_| true),
        }
    }

    fn create_collection(
        &self,
        name: &CollectionName,
        dimensions: usize,
        distance: Distance,
    ) -> Result<()> {
        let url = self.collection_url(name);
        let metric = match distance {
            Distance::Cosine => "Cosine",
        };
        let body = json!({ "vectors": { "size": dimensions, "distance": metric } });
        let resp = self.send("qdrant create collection", |http| http.put(&url).json(&body))?;
        expect_success(resp).map(|_| ())
    }

    fn delete_collection(&self, name: &CollectionName) -> Result<bool> {
        let url = self.collection_url(name);
        let resp = self.send("qdrant delete collection", |http| http.delete(&url))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let envelope: Envelope<bool> = expect_success(resp)?
            .json()
            .map_err(|err| Error::from_transport("qdrant delete response", err))?;
        Ok(envelope.result)
    }

    fn upsert(&self, name: &CollectionName, points: &[IndexedPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let url = format!("{}/points", self.collection_url(name));
        let body = json!({ "points": points });
        let resp = self.send("qdrant upsert", |http| {
            http.put(&url).query(&[("wait", "true")]).json(&body)
        })?;
        expect_success(resp).map(|_| ())
    }

    fn search(
        &self,
        name: &CollectionName,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let url = format!("{}/points/search", self.collection_url(name));
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
        };
        let resp = self.send("qdrant search", |http| http.post(&url).json(&body))?;
        let envelope: Envelope<Vec<SearchEntry>> = expect_success(resp)?
            .json()
            .map_err(|err| Error::from_transport("qdrant search response", err))?;
        Ok(envelope
            .result
            .into_iter()
            .filter_map(decode_hit)
            .collect())
    }

    fn count(&self, name: &CollectionName) -> Result<usize> {
        let url = format!("{}/points/count", self.collection_url(name));
        let body = json!({ "exact": true });
        let resp = self.send("qdrant count", |http| http.post(&url).json(&body))?;
        let envelope: Envelope<CountResult> = expect_success(resp)?
            .json()
            .map_err(|err| Error::from_transport("qdrant count response", err))?;
        Ok(envelope.result.count)
    }
}

fn decode_hit(entry: SearchEntry) -> Option<ScoredPoint> {
    let id = match &entry.id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let Some(payload) = entry.payload else {
        warn!(point_id = %id, "skipping hit without payload");
        return None;
    };
    match serde_json::from_value::<ChunkRecord>(payload) {
        Ok(payload) => Some(ScoredPoint {
            id,
            score: entry.score,
            payload,
        }),
        Err(err) => {
            let err = Error::PartialData(format!("point {id}: {err}"));
            warn!(error = %err, "skipping hit with malformed payload");
            None
        }
    }
}
