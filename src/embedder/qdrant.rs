//! Qdrant Cloud Inference embedding provider.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{Error, Result};

/// Blocking embeddings client that talks to Qdrant Cloud Inference endpoints.
#[derive(Clone)]
pub struct QdrantEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl QdrantEmbedder {
    /// Builds a new Qdrant inference client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `api-key` header
    /// * `endpoint` - Full inference endpoint, e.g. `https://cluster-id.cloud.qdrant.io/inference/text`
    /// * `model` - Model identifier advertised by the cluster (e.g. `qdrant/all-MiniLM-L6-v2`)
    pub fn new(api_key: &str, endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing Qdrant API key".to_string()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::Config(
                "Qdrant inference endpoint must be an http(s) URL".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(Error::Config("missing Qdrant model name".to_string()));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| Error::Config("invalid Qdrant API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| Error::Config(format!("failed to build Qdrant HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

impl Embedder for QdrantEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = InferenceRequest {
            model: &self.model,
            inputs: [text],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| Error::from_transport("Qdrant inference request", err))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::from_status(status, body));
        }
        let payload: InferenceResponse = resp
            .json()
            .map_err(|err| Error::from_transport("Qdrant inference response", err))?;
        payload.into_embedding()
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    data: Vec<InferenceData>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl InferenceResponse {
    fn into_embedding(self) -> Result<Vec<f32>> {
        if let Some(first) = self.data.into_iter().min_by_key(|d| d.index.unwrap_or(0)) {
            return Ok(first.embedding);
        }
        self.embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode("Qdrant response missing embedding payloads".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct InferenceData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}
