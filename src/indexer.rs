//! Full rebuild of the vector index from the content source.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::content::{page_text, ContentSource, SourcePage};
use crate::embedder::EmbeddingClient;
use crate::embeddings::ChunkRecord;
use crate::error::Result;
use crate::vector_store::{IndexedPoint, VectorIndex};

/// Counters for one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Pages listed by the content source.
    pub pages_seen: usize,
    /// Pages skipped for missing titles or unreadable blocks.
    pub pages_skipped: usize,
    /// Chunks produced by the chunker.
    pub chunks_created: usize,
    /// Chunks that received an embedding.
    pub chunks_embedded: usize,
    /// Points written to the rebuilt collection.
    pub points_written: usize,
}

/// Fetches, chunks, embeds and indexes every page.
pub struct Indexer {
    source: Arc<dyn ContentSource>,
    chunker: Chunker,
    embeddings: EmbeddingClient,
    index: VectorIndex,
}

impl Indexer {
    /// Wires the pipeline from injected services.
    pub fn new(
        source: Arc<dyn ContentSource>,
        chunker: Chunker,
        embeddings: EmbeddingClient,
        index: VectorIndex,
    ) -> Self {
        Self {
            source,
            chunker,
            embeddings,
            index,
        }
    }

    /// Chunk records for one page; `None` when the page must be skipped.
    fn page_records(&self, page_idx: usize, page: &SourcePage) -> Option<Vec<ChunkRecord>> {
        let title = match page.require_title() {
            Ok(title) => title,
            Err(err) => {
                warn!(page_idx, page_id = %page.id, error = %err, "skipping page");
                return None;
            }
        };
        let blocks = match self.source.fetch_blocks(&page.id) {
            Ok(blocks) => blocks,
            Err(err) => {
                warn!(page_idx, page_id = %page.id, error = %err, "skipping page with unreadable blocks");
                return None;
            }
        };
        let mut text = page_text(&blocks);
        if text.is_empty() {
            // title-only pages stay searchable by title
            text = title.to_string();
        }
        let chunks: Vec<String> = self.chunker.split(&text).collect();
        let total = chunks.len();
        Some(
            chunks
                .into_iter()
                .enumerate()
                .map(|(chunk_idx, chunk)| {
                    ChunkRecord::new(page.id.clone(), page_idx, title, chunk_idx, total, chunk)
                })
                .collect(),
        )
    }

    /// Rebuilds the index from scratch.
    ///
    /// Per-page problems are logged and skipped; a failed listing or a failed
    /// rebuild aborts the run.
    pub fn index_all(&self) -> Result<IndexReport> {
        let pages = self.source.fetch_pages()?;
        let mut report = IndexReport {
            pages_seen: pages.len(),
            ..IndexReport::default()
        };
        info!(pages = pages.len(), "indexing content");

        let mut records = Vec::new();
        for (page_idx, page) in pages.iter().enumerate() {
            match self.page_records(page_idx, page) {
                Some(page_records) => records.extend(page_records),
                None => report.pages_skipped += 1,
            }
        }
        report.chunks_created = records.len();

        let embedded = self.embeddings.embed_batch(records);
        report.chunks_embedded = embedded.len();

        let points: Vec<IndexedPoint> = embedded.into_iter().map(IndexedPoint::from).collect();
        report.points_written = self.index.replace_all(points)?;
        info!(
            pages_seen = report.pages_seen,
            pages_skipped = report.pages_skipped,
            chunks_created = report.chunks_created,
            chunks_embedded = report.chunks_embedded,
            points_written = report.points_written,
            collection = %self.index.collection(),
            "index rebuilt"
        );
        Ok(report)
    }
}
