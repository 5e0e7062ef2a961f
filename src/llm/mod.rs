//! Generative model providers.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::error::Result;

/// Default Anthropic model.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
/// Default OpenAI chat model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Trait implemented by concrete LLM providers.
///
/// One remote attempt per call; failures are classified so the caller's
/// retry policy can decide whether to try again.
pub trait LlmProvider: Send + Sync {
    /// Sends a single-turn completion and returns the answer text.
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;

    /// Provider label used in logs.
    fn name(&self) -> &str;
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// System instruction.
    pub system: &'a str,
    /// User turn.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: usize,
}
