#![warn(missing_docs)]
//! Core library entry points for notionsearch: chunking, embedding, vector
//! indexing, page-grouped retrieval and grounded answer generation over a
//! Notion database.

pub mod chunker;
pub mod config;
pub mod content;
pub mod embedder;
pub mod embeddings;
pub mod error;
pub mod excerpt;
pub mod indexer;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod retry;
pub mod search;
pub mod vector_store;

pub use chunker::{ChunkConfig, Chunker};
pub use content::{BlockKind, ContentBlock, ContentSource, NotionClient, SourcePage};
pub use embedder::{Embedder, EmbeddingClient};
pub use embeddings::{ChunkRecord, EmbeddedChunkRecord};
pub use error::{Error, Result};
pub use excerpt::create_excerpt;
pub use indexer::{IndexReport, Indexer};
pub use llm::{CompletionRequest, LlmProvider};
pub use rag::{RagAnswer, RagOptions, ResponseGenerator};
pub use retry::{RetryPolicy, Sleeper};
pub use search::{PageGroup, Retriever, SearchOptions, SearchResult};
pub use vector_store::{CollectionName, MemoryBackend, QdrantBackend, VectorBackend, VectorIndex};
