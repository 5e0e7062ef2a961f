use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, LlmProvider};
use crate::error::{Error, Result};

/// OpenAI-compatible chat completions provider.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiProvider {
    /// Builds a chat-completions client against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing OpenAI API key".to_string()));
        }
        let mut headers = HeaderMap::new();
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
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|err| Error::from_transport("OpenAI chat completions", err))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::from_status(status, text));
        }
        let parsed: ChatResponse = resp
            .json()
            .map_err(|err| Error::from_transport("OpenAI chat response", err))?;
        parsed.into_answer()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl ChatResponse {
    fn into_answer(self) -> Result<String> {
        self.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| Error::Decode("OpenAI response missing message content".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
