//! OpenAI-compatible embedding provider.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{Error, Result};

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing OpenAI API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(Error::Config("missing OpenAI embedding model".to_string()));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| Error::Config("invalid OpenAI API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| Error::Config(format!("failed to build OpenAI HTTP client: {err}")))?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            dimensions,
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| Error::from_transport("OpenAI embeddings request", err))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::from_status(status, body));
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .map_err(|err| Error::from_transport("OpenAI embedding response", err))?;
        let vector = parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| Error::Decode("OpenAI returned no embeddings".to_string()))?;
        if let Some(expected) = self.dimensions {
            if vector.len() != expected {
                return Err(Error::Decode(format!(
                    "OpenAI returned {} dimensions, expected {}",
                    vector.len(),
                    expected
                )));
            }
        }
        Ok(vector)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
