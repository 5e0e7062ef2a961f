//! Query execution, page grouping and ranking.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{error, info};

use crate::embedder::EmbeddingClient;
use crate::error::Result;
use crate::excerpt::{create_excerpt, DEFAULT_EXCERPT_LENGTH};
use crate::vector_store::{ScoredPoint, VectorIndex};

/// Default nearest-neighbour pool per query.
pub const DEFAULT_CANDIDATES: usize = 10;
/// Default number of pages kept in grouped mode.
pub const DEFAULT_MAX_PAGES: usize = 5;
/// Default number of chunks kept per page in grouped mode.
pub const DEFAULT_CHUNKS_PER_PAGE: usize = 3;

/// Knobs for a single search.
///
/// `candidates` bounds the nearest-neighbour pool in both modes. Ungrouped
/// searches return the whole pool; grouped searches return at most
/// `max_pages * chunks_per_page` chunks drawn from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Nearest neighbours fetched from the index.
    pub candidates: usize,
    /// Aggregate hits by source page.
    pub group_by_page: bool,
    /// Pages kept in grouped mode.
    pub max_pages: usize,
    /// Chunks kept per page in grouped mode.
    pub chunks_per_page: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES,
            group_by_page: true,
            max_pages: DEFAULT_MAX_PAGES,
            chunks_per_page: DEFAULT_CHUNKS_PER_PAGE,
        }
    }
}

impl SearchOptions {
    /// Flat search over `candidates` nearest neighbours.
    pub fn ungrouped(candidates: usize) -> Self {
        Self {
            candidates,
            group_by_page: false,
            ..Self::default()
        }
    }
}

/// A ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Page title.
    pub title: String,
    /// Source page identifier.
    pub page_id: String,
    /// Zero-based chunk position within the page.
    pub chunk_idx: usize,
    /// Number of chunks in the page.
    pub total_chunks: usize,
    /// Full chunk text.
    pub content: String,
    /// Similarity score.
    pub score: f32,
    /// Query-focused snippet (grouped results only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl From<ScoredPoint> for SearchResult {
    fn from(hit: ScoredPoint) -> Self {
        Self {
            title: hit.payload.title,
            page_id: hit.payload.page_id,
            chunk_idx: hit.payload.chunk_idx,
            total_chunks: hit.payload.total_chunks,
            content: hit.payload.text,
            score: hit.score,
            excerpt: None,
        }
    }
}

/// A page's best chunks under one ranked entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageGroup {
    /// Page title.
    pub title: String,
    /// Source page identifier.
    pub page_id: String,
    /// Highest chunk score on the page.
    pub score: f32,
    /// Chunks by descending score.
    pub chunks: Vec<SearchResult>,
}

fn by_score_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Buckets ranked chunks by page and orders pages by their best chunk.
///
/// Within a page chunks are stably sorted by descending score, so equal
/// scores keep retrieval order; pages with equal scores are ordered by the
/// rank of their first retrieved chunk. `chunks_per_page` truncates each
/// page before excerpts are attached.
pub fn group_by_page(
    results: Vec<SearchResult>,
    query: &str,
    chunks_per_page: Option<usize>,
    excerpt_length: usize,
) -> Vec<PageGroup> {
    let mut buckets: HashMap<String, (usize, Vec<SearchResult>)> = HashMap::new();
    for (rank, result) in results.into_iter().enumerate() {
        buckets
            .entry(result.page_id.clone())
            .or_insert_with(|| (rank, Vec::new()))
            .1
            .push(result);
    }

    let mut pages: Vec<(usize, PageGroup)> = buckets
        .into_iter()
        .filter_map(|(page_id, (first_rank, mut chunks))| {
            chunks.sort_by(|a, b| by_score_desc(a.score, b.score));
            if let Some(limit) = chunks_per_page {
                chunks.truncate(limit);
            }
            for chunk in &mut chunks {
                chunk.excerpt = Some(create_excerpt(&chunk.content, query, excerpt_length));
            }
            let best = chunks.first()?;
            let (title, score) = (best.title.clone(), best.score);
            Some((
                first_rank,
                PageGroup {
                    title,
                    page_id,
                    score,
                    chunks,
                },
            ))
        })
        .collect();

    pages.sort_by(|(rank_a, a), (rank_b, b)| {
        by_score_desc(a.score, b.score).then(rank_a.cmp(rank_b))
    });
    pages.into_iter().map(|(_, page)| page).collect()
}

/// Embeds queries and ranks index hits.
#[derive(Clone)]
pub struct Retriever {
    embeddings: EmbeddingClient,
    index: VectorIndex,
    excerpt_length: usize,
}

impl Retriever {
    /// Builds a retriever from injected services.
    pub fn new(embeddings: EmbeddingClient, index: VectorIndex) -> Self {
        Self {
            embeddings,
            index,
            excerpt_length: DEFAULT_EXCERPT_LENGTH,
        }
    }

    /// Overrides the excerpt width.
    pub fn with_excerpt_length(mut self, excerpt_length: usize) -> Self {
        self.excerpt_length = excerpt_length.max(1);
        self
    }

    /// Excerpt width used for grouped results.
    pub fn excerpt_length(&self) -> usize {
        self.excerpt_length
    }

    /// Nearest chunks to `query`, by descending score, without grouping.
    pub fn retrieve(&self, query: &str, candidates: usize) -> Result<Vec<SearchResult>> {
        let vector = self.embeddings.embed_query(query)?;
        let hits = self.index.query(&vector, candidates)?;
        Ok(hits.into_iter().map(SearchResult::from).collect())
    }

    /// Top pages for `query`, each with its best chunks.
    pub fn search_pages(&self, query: &str, options: &SearchOptions) -> Result<Vec<PageGroup>> {
        let candidates = self.retrieve(query, options.candidates)?;
        let pool = candidates.len();
        let mut pages = group_by_page(
            candidates,
            query,
            Some(options.chunks_per_page.max(1)),
            self.excerpt_length,
        );
        let found = pages.len();
        pages.truncate(options.max_pages);
        info!(pool, pages = found, kept = pages.len(), "grouped search hits by page");
        Ok(pages)
    }

    /// Runs a search, propagating failures.
    pub fn try_search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        if !options.group_by_page {
            let results = self.retrieve(query, options.candidates)?;
            info!(results = results.len(), "ungrouped search complete");
            return Ok(results);
        }
        Ok(self
            .search_pages(query, options)?
            .into_iter()
            .flat_map(|page| page.chunks)
            .collect())
    }

    /// Runs a search; failures are logged and yield no results.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        self.try_search(query, options).unwrap_or_else(|err| {
            error!(error = %err, "search failed");
            Vec::new()
        })
    }
}
