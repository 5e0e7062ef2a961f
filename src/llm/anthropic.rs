use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, LlmProvider};
use crate::error::{Error, Result};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic messages API provider.
pub struct AnthropicProvider {
    client: Client,
    model: String,
}

impl AnthropicProvider {
    /// Builds a client for `model`.
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing Anthropic API key".to_string()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| Error::Config("invalid Anthropic API key".to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| Error::Config(format!("failed to build Anthropic HTTP client: {err}")))?;
        Ok(Self {
            client,
            model: model.to_string(),
        })
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: request.prompt,
                }],
            }],
        };
        let resp = self
            .client
            .post(MESSAGES_URL)
            .json(&body)
            .send()
            .map_err(|err| Error::from_transport("Anthropic messages API", err))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::from_status(status, text));
        }
        let parsed: AnthropicResponse = resp
            .json()
            .map_err(|err| Error::from_transport("Anthropic response", err))?;
        parsed.into_answer()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

impl AnthropicResponse {
    fn into_answer(self) -> Result<String> {
        let answer = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.is_empty() {
            return Err(Error::Decode(
                "Anthropic response missing text content".to_string(),
            ));
        }
        Ok(answer)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
