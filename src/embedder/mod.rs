//! Embedding providers and the retrying client that wraps them.

pub mod openai;
pub mod qdrant;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, info, warn};

use crate::embeddings::{ChunkRecord, EmbeddedChunkRecord};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// A remote model that turns text into a fixed-length vector.
///
/// Implementations make exactly one remote attempt per call and classify
/// failures via [`Error::is_retryable`]; retrying is the caller's concern.
pub trait Embedder: Send + Sync {
    /// Embeds a single input.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Provider label used in logs.
    fn name(&self) -> &str;
}

/// Embedding client with bounded retry and an optional query cache.
#[derive(Clone)]
pub struct EmbeddingClient {
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    cache: Option<Arc<Mutex<LruCache<String, Vec<f32>>>>>,
}

impl EmbeddingClient {
    /// Wraps `embedder` with `retry`.
    pub fn new(embedder: Arc<dyn Embedder>, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            retry,
            cache: None,
        }
    }

    /// Caches up to `capacity` query embeddings (0 disables caching).
    pub fn with_query_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|cap| Arc::new(Mutex::new(LruCache::new(cap))));
        self
    }

    /// Embeds `text`, retrying transient failures.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::PartialData("cannot embed empty text".to_string()));
        }
        let operation = format!("{} embedding", self.embedder.name());
        self.retry.run(&operation, |attempt| {
            if attempt > 0 {
                debug!(attempt, "re-sending embedding request");
            }
            self.embedder.embed(text)
        })
    }

    /// Embeds a search query, consulting the cache first.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = lock(cache).get(query).cloned() {
                debug!("query embedding cache hit");
                return Ok(hit);
            }
        }
        let vector = self.embed(query)?;
        if let Some(cache) = &self.cache {
            lock(cache).put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Embeds each record independently.
    ///
    /// Records whose embedding fails are logged and dropped, so the result
    /// may be shorter than the input. Order is preserved.
    pub fn embed_batch(&self, records: Vec<ChunkRecord>) -> Vec<EmbeddedChunkRecord> {
        let total = records.len();
        let mut embedded = Vec::with_capacity(total);
        for chunk in records {
            match self.embed(&chunk.embedding_input()) {
                Ok(embedding) => embedded.push(EmbeddedChunkRecord { chunk, embedding }),
                Err(err) => {
                    warn!(chunk_id = %chunk.id, page_id = %chunk.page_id, error = %err, "dropping chunk that failed to embed");
                }
            }
        }
        info!(embedded = embedded.len(), total, "embedded chunk batch");
        embedded
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::tests::instant_policy;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails a configurable number of times per input before answering.
    struct FlakyEmbedder {
        failures_before_success: HashMap<String, usize>,
        calls: Mutex<HashMap<String, usize>>,
        total_calls: AtomicUsize,
    }

    impl FlakyEmbedder {
        fn new(failures: &[(&str, usize)]) -> Self {
            Self {
                failures_before_success: failures
                    .iter()
                    .map(|(text, n)| (text.to_string(), *n))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
                total_calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for FlakyEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            let mut calls = self.calls.lock().unwrap();
            let seen = calls.entry(text.to_string()).or_insert(0);
            *seen += 1;
            let allowed = self
                .failures_before_success
                .iter()
                .find(|(needle, _)| text.contains(needle.as_str()))
                .map(|(_, n)| *n)
                .unwrap_or(0);
            if *seen <= allowed {
                return Err(Error::Transient("429 Too Many Requests".into()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let embedder = Arc::new(FlakyEmbedder::new(&[("query", 2)]));
        let (policy, sleeper) = instant_policy(3);
        let client = EmbeddingClient::new(embedder, policy);

        let vector = client.embed("query text").expect("third attempt succeeds");
        assert_eq!(vector, vec![10.0, 1.0]);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
    }

    #[test]
    fn exhausted_retries_surface_remote_call_error() {
        let embedder = Arc::new(FlakyEmbedder::new(&[("query", 10)]));
        let (policy, _) = instant_policy(3);
        let client = EmbeddingClient::new(embedder.clone(), policy);

        let err = client.embed("query").expect_err("never succeeds");
        assert!(matches!(err, Error::RemoteCall { attempts: 3, .. }));
        assert_eq!(embedder.total_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn batch_drops_only_failing_records() {
        let embedder = Arc::new(FlakyEmbedder::new(&[("broken", 99)]));
        let (policy, _) = instant_policy(2);
        let client = EmbeddingClient::new(embedder, policy);
        let records = vec![
            ChunkRecord::new("a", 0, "Alpha", 0, 1, "fine"),
            ChunkRecord::new("b", 1, "Beta", 0, 1, "broken chunk"),
            ChunkRecord::new("c", 2, "Gamma", 0, 1, "also fine"),
        ];

        let embedded = client.embed_batch(records);
        let ids: Vec<&str> = embedded.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["0-0", "2-0"]);
        assert_eq!(embedded[0].chunk.text, "fine");
    }

    #[test]
    fn empty_text_is_rejected_without_remote_call() {
        let embedder = Arc::new(FlakyEmbedder::new(&[]));
        let client = EmbeddingClient::new(embedder.clone(), RetryPolicy::new(3));
        assert!(matches!(client.embed("  "), Err(Error::PartialData(_))));
        assert_eq!(embedder.total_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn query_cache_avoids_repeat_calls() {
        let embedder = Arc::new(FlakyEmbedder::new(&[]));
        let client =
            EmbeddingClient::new(embedder.clone(), RetryPolicy::new(1)).with_query_cache(4);
        let first = client.embed_query("neural networks").unwrap();
        let second = client.embed_query("neural networks").unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.total_calls.load(Ordering::SeqCst), 1);
    }
}
