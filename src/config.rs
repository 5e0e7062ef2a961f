//! Command-line and environment configuration shared across binaries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::chunker::{ChunkConfig, Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::content::{NotionClient, DEFAULT_NOTION_VERSION};
use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::qdrant::QdrantEmbedder;
use crate::embedder::{Embedder, EmbeddingClient};
use crate::error::{Error, Result};
use crate::llm::{
    AnthropicProvider, LlmProvider, OpenAiProvider, DEFAULT_ANTHROPIC_MODEL, DEFAULT_OPENAI_MODEL,
};
use crate::rag::{RagOptions, DEFAULT_MAX_TOKENS, DEFAULT_RAG_CANDIDATES, DEFAULT_TEMPERATURE};
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::vector_store::{CollectionName, QdrantBackend, VectorIndex, DEFAULT_UPSERT_BATCH};

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("{name} must be set")))
}

/// OpenAI credentials shared by the embedding and answer providers.
#[derive(Args, Debug, Clone)]
pub struct OpenAiArgs {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible API root
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,
}

/// Notion database to index.
#[derive(Args, Debug, Clone)]
pub struct NotionArgs {
    /// Notion integration token
    #[arg(long, env = "NOTION_API_KEY", hide_env_values = true)]
    pub notion_api_key: Option<String>,

    /// Database whose pages are indexed
    #[arg(long, env = "NOTION_DATABASE_ID")]
    pub notion_database_id: Option<String>,

    /// Notion-Version header
    #[arg(long, env = "NOTION_VERSION", default_value = DEFAULT_NOTION_VERSION)]
    pub notion_version: String,

    /// HTTP timeout for Notion calls, in seconds
    #[arg(long, env = "NOTION_TIMEOUT_SECS", default_value_t = 30)]
    pub notion_timeout_secs: u64,
}

impl NotionArgs {
    /// Builds the Notion content source.
    pub fn build_source(&self, retry: RetryPolicy) -> Result<NotionClient> {
        NotionClient::new(
            required(&self.notion_api_key, "NOTION_API_KEY")?,
            required(&self.notion_database_id, "NOTION_DATABASE_ID")?,
            &self.notion_version,
            Duration::from_secs(self.notion_timeout_secs.max(1)),
            retry,
        )
    }
}

/// Embedding backends.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbeddingProviderArg {
    /// OpenAI-compatible `/embeddings`.
    Openai,
    /// Qdrant Cloud Inference.
    Qdrant,
}

/// Embedding model selection and retry knobs.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Embedding backend
    #[arg(long, env = "NOTIONSEARCH_EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProviderArg::Openai)]
    pub embedding_provider: EmbeddingProviderArg,

    /// Embedding model identifier
    #[arg(long, env = "NOTIONSEARCH_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    /// Vector dimensionality (must match the collection)
    #[arg(long, env = "NOTIONSEARCH_EMBEDDING_DIMENSIONS", default_value_t = 1536)]
    pub embedding_dimensions: usize,

    /// Qdrant inference endpoint (qdrant provider only)
    #[arg(long, env = "QDRANT_INFERENCE_URL")]
    pub qdrant_inference_url: Option<String>,

    /// Qdrant inference API key (qdrant provider only)
    #[arg(long, env = "QDRANT_INFERENCE_API_KEY", hide_env_values = true)]
    pub qdrant_inference_key: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "NOTIONSEARCH_EMBEDDING_TIMEOUT_SECS", default_value_t = 60)]
    pub embedding_timeout_secs: u64,

    /// Attempts per remote call, first call included
    #[arg(long, env = "NOTIONSEARCH_MAX_RETRIES", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_retries: usize,

    /// Query embeddings kept in memory (0 disables the cache)
    #[arg(long, env = "NOTIONSEARCH_QUERY_CACHE", default_value_t = 256)]
    pub query_cache: usize,
}

impl EmbeddingArgs {
    /// Retry policy used for every remote call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs.max(1))
    }

    /// Builds the configured provider.
    pub fn build_embedder(&self, openai: &OpenAiArgs) -> Result<Arc<dyn Embedder>> {
        Ok(match self.embedding_provider {
            EmbeddingProviderArg::Openai => Arc::new(OpenAiEmbedder::new(
                required(&openai.openai_api_key, "OPENAI_API_KEY")?,
                &openai.openai_base_url,
                &self.embedding_model,
                Some(self.embedding_dimensions),
                self.timeout(),
            )?),
            EmbeddingProviderArg::Qdrant => Arc::new(QdrantEmbedder::new(
                required(&self.qdrant_inference_key, "QDRANT_INFERENCE_API_KEY")?,
                required(&self.qdrant_inference_url, "QDRANT_INFERENCE_URL")?,
                &self.embedding_model,
                self.timeout(),
            )?),
        })
    }

    /// Builds the retrying embedding client.
    pub fn build_client(&self, openai: &OpenAiArgs) -> Result<EmbeddingClient> {
        Ok(
            EmbeddingClient::new(self.build_embedder(openai)?, self.retry_policy())
                .with_query_cache(self.query_cache),
        )
    }
}

/// Qdrant collection holding the chunk vectors.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Qdrant REST URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    pub qdrant_url: String,

    /// Qdrant API key (cloud clusters)
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Collection name
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "notion_chunks")]
    pub collection: String,

    /// Points per upsert request
    #[arg(long, env = "NOTIONSEARCH_UPSERT_BATCH", default_value_t = DEFAULT_UPSERT_BATCH)]
    pub upsert_batch: usize,

    /// HTTP timeout for Qdrant calls, in seconds
    #[arg(long, env = "QDRANT_TIMEOUT_SECS", default_value_t = 30)]
    pub qdrant_timeout_secs: u64,
}

impl IndexArgs {
    /// Builds the Qdrant-backed index.
    pub fn build_index(&self, dimensions: usize, retry: RetryPolicy) -> Result<VectorIndex> {
        let backend = QdrantBackend::new(
            &self.qdrant_url,
            self.qdrant_api_key.as_deref(),
            Duration::from_secs(self.qdrant_timeout_secs.max(1)),
            retry,
        )?;
        Ok(
            VectorIndex::new(Arc::new(backend), CollectionName::new(self.collection.as_str())?, dimensions)
                .with_batch_size(self.upsert_batch),
        )
    }
}

/// Chunking parameters.
#[derive(Args, Debug, Clone)]
pub struct ChunkArgs {
    /// Maximum chunk length in characters
    #[arg(long, env = "NOTIONSEARCH_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Trailing characters repeated at the start of the next chunk
    #[arg(long, env = "NOTIONSEARCH_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,
}

impl ChunkArgs {
    /// Builds the chunker.
    pub fn build_chunker(&self) -> Chunker {
        Chunker::new(ChunkConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        })
    }
}

/// Answer model backends.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LlmProviderArg {
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages.
    Anthropic,
}

/// Answer generation settings.
#[derive(Args, Debug, Clone)]
pub struct LlmArgs {
    /// Answer model backend
    #[arg(long, env = "NOTIONSEARCH_LLM_PROVIDER", value_enum, default_value_t = LlmProviderArg::Openai)]
    pub llm_provider: LlmProviderArg,

    /// Answer model (defaults per provider)
    #[arg(long, env = "NOTIONSEARCH_LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Anthropic API key (anthropic provider only)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Sampling temperature
    #[arg(long, env = "NOTIONSEARCH_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// Maximum answer tokens
    #[arg(long, env = "NOTIONSEARCH_MAX_COMPLETION_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_completion_tokens: usize,

    /// Chunks retrieved as answer context
    #[arg(long, env = "NOTIONSEARCH_RAG_CANDIDATES", default_value_t = DEFAULT_RAG_CANDIDATES)]
    pub rag_candidates: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "NOTIONSEARCH_LLM_TIMEOUT_SECS", default_value_t = 60)]
    pub llm_timeout_secs: u64,
}

impl LlmArgs {
    /// Generation knobs.
    pub fn rag_options(&self) -> RagOptions {
        RagOptions {
            candidates: self.rag_candidates.max(1),
            temperature: self.temperature,
            max_tokens: self.max_completion_tokens.max(1),
        }
    }

    /// Builds the configured provider.
    pub fn build_llm(&self, openai: &OpenAiArgs) -> Result<Arc<dyn LlmProvider>> {
        let timeout = Duration::from_secs(self.llm_timeout_secs.max(1));
        Ok(match self.llm_provider {
            LlmProviderArg::Openai => Arc::new(OpenAiProvider::new(
                required(&openai.openai_api_key, "OPENAI_API_KEY")?,
                &openai.openai_base_url,
                self.llm_model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
                timeout,
            )?),
            LlmProviderArg::Anthropic => Arc::new(AnthropicProvider::new(
                required(&self.anthropic_api_key, "ANTHROPIC_API_KEY")?,
                self.llm_model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL),
                timeout,
            )?),
        })
    }
}

/// Logging destinations.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "NOTIONSEARCH_LOG", default_value = "info")]
    pub log_level: String,

    /// Also write a daily-rolling log file here
    #[arg(long, env = "NOTIONSEARCH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}
