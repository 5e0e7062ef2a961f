//! Retrieval-augmented answer generation.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::llm::{CompletionRequest, LlmProvider};
use crate::retry::RetryPolicy;
use crate::search::{group_by_page, PageGroup, Retriever, SearchResult};

/// Default candidate pool for grounding an answer.
pub const DEFAULT_RAG_CANDIDATES: usize = 15;
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
/// Default answer token budget.
pub const DEFAULT_MAX_TOKENS: usize = 1000;

const SYSTEM_PROMPT: &str = "You are a knowledgeable assistant. Answer the question using only the provided context. If the context does not contain the answer, say that you could not find it.";

/// Generation knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RagOptions {
    /// Chunks retrieved as context.
    pub candidates: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Answer token budget.
    pub max_tokens: usize,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_RAG_CANDIDATES,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Answer plus the pages it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    /// Model answer, or the error description on failure.
    pub answer: String,
    /// Context pages by descending best-chunk score.
    pub pages: Vec<PageGroup>,
}

/// Builds the grounded prompt from retrieved chunks.
pub fn build_prompt(query: &str, chunks: &[SearchResult]) -> String {
    let mut prompt = String::from(
        "Using the provided context, answer the following question comprehensively.\n\nContext:\n",
    );
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            prompt.push('\n');
        }
        // writing to a String cannot fail
        let _ = writeln!(
            prompt,
            "{} (Chunk {}/{})\n{}",
            chunk.title,
            chunk.chunk_idx + 1,
            chunk.total_chunks,
            chunk.content
        );
    }
    let _ = write!(prompt, "\nQuestion:\n{query}\n\nAnswer:\n");
    prompt
}

/// Answers questions from indexed content.
pub struct ResponseGenerator {
    retriever: Retriever,
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    options: RagOptions,
}

impl ResponseGenerator {
    /// Wires a generator from injected services.
    pub fn new(retriever: Retriever, llm: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self {
            retriever,
            llm,
            retry,
            options: RagOptions::default(),
        }
    }

    /// Overrides the generation knobs.
    pub fn with_options(mut self, options: RagOptions) -> Self {
        self.options = options;
        self
    }

    /// Generates an answer, propagating failures.
    pub fn try_generate(&self, query: &str) -> Result<RagAnswer> {
        let chunks = self.retriever.retrieve(query, self.options.candidates)?;
        if chunks.is_empty() {
            warn!("no context retrieved; asking the model without grounding");
        }
        let prompt = build_prompt(query, &chunks);
        let request = CompletionRequest {
            system: SYSTEM_PROMPT,
            prompt: &prompt,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        let operation = format!("{} completion", self.llm.name());
        let answer = self
            .retry
            .run(&operation, |_| self.llm.complete(&request))?;

        let pages = group_by_page(chunks, query, None, self.retriever.excerpt_length());
        info!(pages = pages.len(), answer_chars = answer.chars().count(), "generated answer");
        Ok(RagAnswer { answer, pages })
    }

    /// Generates an answer; failures become an error-text answer with no pages.
    pub fn generate(&self, query: &str) -> RagAnswer {
        self.try_generate(query).unwrap_or_else(|err| {
            error!(error = %err, "answer generation failed");
            RagAnswer {
                answer: format!("Error generating response: {err}"),
                pages: Vec::new(),
            }
        })
    }
}
