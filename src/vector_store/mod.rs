//! Vector index over a pluggable similarity-search backend.

pub mod memory;
pub mod qdrant;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::embeddings::{ChunkRecord, EmbeddedChunkRecord};
use crate::error::{Error, Result};

pub use memory::MemoryBackend;
pub use qdrant::QdrantBackend;

/// Default number of points per upsert request.
pub const DEFAULT_UPSERT_BATCH: usize = 100;

/// Validated collection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    /// Builds a collection name; only ASCII alphanumerics, `-` and `_` are allowed.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config("collection name is required".to_string()));
        }
        if !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(Error::Config(format!(
                "collection name {name:?} may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// Raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Similarity metric used by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Distance {
    /// Cosine similarity.
    Cosine,
}

/// Point identifier derived deterministically from a chunk id.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

/// Vector plus payload written to the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedPoint {
    /// Stable identifier (see [`point_id`]).
    pub id: Uuid,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Chunk fields stored alongside the vector.
    pub payload: ChunkRecord,
}

impl From<EmbeddedChunkRecord> for IndexedPoint {
    fn from(record: EmbeddedChunkRecord) -> Self {
        Self {
            id: point_id(&record.chunk.id),
            vector: record.embedding,
            payload: record.chunk,
        }
    }
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    /// Point identifier as reported by the backend.
    pub id: String,
    /// Similarity score (higher is closer).
    pub score: f32,
    /// Decoded chunk payload.
    pub payload: ChunkRecord,
}

/// Storage primitives the index is built on.
pub trait VectorBackend: Send + Sync {
    /// Whether the collection exists.
    fn collection_exists(&self, name: &CollectionName) -> Result<bool>;

    /// Creates an empty collection.
    fn create_collection(
        &self,
        name: &CollectionName,
        dimensions: usize,
        distance: Distance,
    ) -> Result<()>;

    /// Drops the collection; `Ok(false)` when it did not exist.
    fn delete_collection(&self, name: &CollectionName) -> Result<bool>;

    /// Writes points and returns only once the backend has applied them.
    fn upsert(&self, name: &CollectionName, points: &[IndexedPoint]) -> Result<()>;

    /// Top-`limit` points by descending similarity.
    fn search(&self, name: &CollectionName, vector: &[f32], limit: usize)
        -> Result<Vec<ScoredPoint>>;

    /// Number of stored points.
    fn count(&self, name: &CollectionName) -> Result<usize>;
}

/// The persistent collection backing similarity search.
///
/// [`VectorIndex::replace_all`] drops and rebuilds the collection without a
/// transaction: queries running during a rebuild may see a missing or
/// partially populated collection, and a failed upsert batch leaves the
/// batches before it in place.
#[derive(Clone)]
pub struct VectorIndex {
    backend: Arc<dyn VectorBackend>,
    collection: CollectionName,
    dimensions: usize,
    batch_size: usize,
}

impl VectorIndex {
    /// Builds an index handle for `collection` with fixed dimensionality.
    pub fn new(backend: Arc<dyn VectorBackend>, collection: CollectionName, dimensions: usize) -> Self {
        Self {
            backend,
            collection,
            dimensions: dimensions.max(1),
            batch_size: DEFAULT_UPSERT_BATCH,
        }
    }

    /// Overrides the upsert batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Collection this index writes to.
    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Vector dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Creates the collection when it is missing.
    pub fn ensure_collection(&self) -> Result<()> {
        if self.backend.collection_exists(&self.collection)? {
            return Ok(());
        }
        self.backend
            .create_collection(&self.collection, self.dimensions, Distance::Cosine)?;
        info!(collection = %self.collection, dimensions = self.dimensions, "created collection");
        Ok(())
    }

    /// Drops the collection, recreates it and upserts `points` in batches.
    ///
    /// Points whose vector length does not match the collection are skipped.
    /// Returns the number of points written.
    pub fn replace_all(&self, points: Vec<IndexedPoint>) -> Result<usize> {
        let dropped = self
            .backend
            .delete_collection(&self.collection)
            .map_err(|err| Error::IndexState(format!("dropping {}: {err}", self.collection)))?;
        if dropped {
            info!(collection = %self.collection, "dropped existing collection");
        }
        self.backend
            .create_collection(&self.collection, self.dimensions, Distance::Cosine)
            .map_err(|err| Error::IndexState(format!("creating {}: {err}", self.collection)))?;

        let (points, mismatched): (Vec<_>, Vec<_>) = points
            .into_iter()
            .partition(|point| point.vector.len() == self.dimensions);
        for point in &mismatched {
            warn!(
                chunk_id = %point.payload.id,
                found = point.vector.len(),
                expected = self.dimensions,
                "skipping point with wrong dimensionality"
            );
        }

        let total_batches = points.len().div_ceil(self.batch_size);
        let mut written = 0usize;
        for (batch_no, batch) in points.chunks(self.batch_size).enumerate() {
            self.backend
                .upsert(&self.collection, batch)
                .map_err(|err| {
                    Error::IndexState(format!(
                        "batch {} of {} failed with {} of {} points written: {err}",
                        batch_no + 1,
                        total_batches,
                        written,
                        points.len()
                    ))
                })?;
            written += batch.len();
            info!(batch = batch_no + 1, total_batches, written, "upserted batch");
        }
        Ok(written)
    }

    /// Nearest neighbours of `vector`, ordered by descending score.
    pub fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.backend.search(&self.collection, vector, limit)
    }

    /// Number of points currently stored.
    pub fn point_count(&self) -> Result<usize> {
        self.backend.count(&self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn point(chunk_id: &str, vector: Vec<f32>) -> IndexedPoint {
        let (page, chunk) = chunk_id.split_once('-').unwrap();
        let mut record = ChunkRecord::new(
            format!("page-{page}"),
            page.parse().unwrap(),
            "Title",
            chunk.parse().unwrap(),
            4,
            format!("text {chunk_id}"),
        );
        record.id = chunk_id.to_string();
        IndexedPoint {
            id: point_id(chunk_id),
            vector,
            payload: record,
        }
    }

    /// Memory backend that fails the n-th upsert call.
    struct FailingUpserts {
        inner: MemoryBackend,
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl VectorBackend for FailingUpserts {
        fn collection_exists(&self, name: &CollectionName) -> Result<bool> {
            self.inner.collection_exists(name)
        }
        fn create_collection(&self, name: &CollectionName, d: usize, m: Distance) -> Result<()> {
            self.inner.create_collection(name, d, m)
        }
        fn delete_collection(&self, name: &CollectionName) -> Result<bool> {
            self.inner.delete_collection(name)
        }
        fn upsert(&self, name: &CollectionName, points: &[IndexedPoint]) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(Error::Transient("connection reset".into()));
            }
            self.inner.upsert(name, points)
        }
        fn search(&self, name: &CollectionName, v: &[f32], l: usize) -> Result<Vec<ScoredPoint>> {
            self.inner.search(name, v, l)
        }
        fn count(&self, name: &CollectionName) -> Result<usize> {
            self.inner.count(name)
        }
    }

    #[test]
    fn collection_names_are_validated() {
        assert!(CollectionName::new("notion_chunks").is_ok());
        assert!(CollectionName::new("  ").is_err());
        assert!(CollectionName::new("bad/name").is_err());
    }

    #[test]
    fn point_ids_are_stable() {
        assert_eq!(point_id("3-1"), point_id("3-1"));
        assert_ne!(point_id("3-1"), point_id("1-3"));
    }

    #[test]
    fn replace_all_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let index = VectorIndex::new(backend, CollectionName::new("c").unwrap(), 2)
            .with_batch_size(2);
        let points = vec![
            point("0-0", vec![1.0, 0.0]),
            point("0-1", vec![0.0, 1.0]),
            point("1-0", vec![0.5, 0.5]),
        ];
        assert_eq!(index.replace_all(points.clone()).unwrap(), 3);
        assert_eq!(index.replace_all(points).unwrap(), 3);
        assert_eq!(index.point_count().unwrap(), 3);
    }

    #[test]
    fn replace_all_skips_wrong_dimensions() {
        let backend = Arc::new(MemoryBackend::new());
        let index = VectorIndex::new(backend, CollectionName::new("c").unwrap(), 2);
        let written = index
            .replace_all(vec![point("0-0", vec![1.0, 0.0]), point("0-1", vec![1.0])])
            .unwrap();
        assert_eq!(written, 1);
    }

    #[test]
    fn failed_batch_aborts_and_reports_index_state() {
        let backend = Arc::new(FailingUpserts {
            inner: MemoryBackend::new(),
            fail_on: 2,
            calls: AtomicUsize::new(0),
        });
        let index = VectorIndex::new(backend.clone(), CollectionName::new("c").unwrap(), 2)
            .with_batch_size(1);
        let err = index
            .replace_all(vec![
                point("0-0", vec![1.0, 0.0]),
                point("0-1", vec![0.0, 1.0]),
                point("0-2", vec![1.0, 1.0]),
            ])
            .expect_err("second batch fails");
        assert!(matches!(err, Error::IndexState(_)));
        assert!(err.to_string().contains("batch 2 of 3"));
        // later batches are never attempted
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.point_count().unwrap(), 1);
    }

    #[test]
    fn ensure_collection_creates_once() {
        let backend = Arc::new(MemoryBackend::new());
        let name = CollectionName::new("c").unwrap();
        let index = VectorIndex::new(backend.clone(), name.clone(), 3);
        index.ensure_collection().unwrap();
        index.ensure_collection().unwrap();
        assert!(backend.collection_exists(&name).unwrap());
        assert_eq!(index.point_count().unwrap(), 0);
    }

    #[test]
    fn zero_limit_query_short_circuits() {
        let backend = Arc::new(MemoryBackend::new());
        let index = VectorIndex::new(backend, CollectionName::new("missing").unwrap(), 2);
        assert!(index.query(&[1.0, 0.0], 0).unwrap().is_empty());
    }
}
