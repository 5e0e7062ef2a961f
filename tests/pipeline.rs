use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notionsearch::chunker::ChunkConfig;
use notionsearch::content::{BlockKind, ContentBlock, ContentSource, SourcePage};
use notionsearch::retry::{RetryPolicy, Sleeper};
use notionsearch::vector_store::{CollectionName, MemoryBackend, VectorIndex};
use notionsearch::{
    Chunker, CompletionRequest, Embedder, EmbeddingClient, Error, Indexer, LlmProvider,
    ResponseGenerator, Result, Retriever, SearchOptions,
};
use pretty_assertions::assert_eq;

const VOCABULARY: &[&str] = &[
    "rust", "ownership", "borrowing", "python", "typing", "garden", "tomatoes", "soil",
];

/// One dimension per vocabulary word; counts occurrences.
struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; VOCABULARY.len()];
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            if let Some(dim) = VOCABULARY.iter().position(|v| *v == word) {
                vector[dim] += 1.0;
            }
        }
        Ok(vector)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

struct StaticSource {
    pages: Vec<SourcePage>,
    blocks: HashMap<String, Vec<ContentBlock>>,
}

impl ContentSource for StaticSource {
    fn fetch_pages(&self) -> Result<Vec<SourcePage>> {
        Ok(self.pages.clone())
    }

    fn fetch_blocks(&self, page_id: &str) -> Result<Vec<ContentBlock>> {
        Ok(self.blocks.get(page_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct CountingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, delay: Duration) {
        self.sleeps.lock().unwrap().push(delay);
    }
}

fn page(id: &str, title: &str) -> SourcePage {
    SourcePage {
        id: id.to_string(),
        title: Some(title.to_string()),
    }
}

fn source() -> StaticSource {
    let blocks = HashMap::from([
        (
            "rust-page".to_string(),
            vec![
                ContentBlock::new(BlockKind::Heading { level: 1 }, "Ownership"),
                ContentBlock::new(BlockKind::Paragraph, "Ownership and borrowing keep Rust memory safe."),
                ContentBlock::new(BlockKind::ListItem, "Each value has one owner."),
            ],
        ),
        (
            "python-page".to_string(),
            vec![ContentBlock::new(BlockKind::Paragraph, "Python favours duck typing.")],
        ),
        (
            "garden-page".to_string(),
            vec![
                ContentBlock::new(BlockKind::Paragraph, "Tomatoes need rich soil."),
                ContentBlock::new(BlockKind::Paragraph, "Water the garden every morning."),
            ],
        ),
    ]);
    StaticSource {
        pages: vec![
            page("rust-page", "Rust"),
            page("python-page", "Python"),
            page("garden-page", "Garden"),
        ],
        blocks,
    }
}

fn services(backend: Arc<MemoryBackend>) -> (EmbeddingClient, VectorIndex) {
    let embeddings = EmbeddingClient::new(Arc::new(KeywordEmbedder), RetryPolicy::new(1));
    let index = VectorIndex::new(
        backend,
        CollectionName::new("notion_chunks").unwrap(),
        VOCABULARY.len(),
    )
    .with_batch_size(2);
    (embeddings, index)
}

fn indexer(backend: Arc<MemoryBackend>) -> Indexer {
    let (embeddings, index) = services(backend);
    Indexer::new(
        Arc::new(source()),
        Chunker::new(ChunkConfig {
            chunk_size: 60,
            overlap: 20,
        }),
        embeddings,
        index,
    )
}

#[test]
fn reindexing_is_idempotent() {
    let backend = Arc::new(MemoryBackend::new());
    let collection = CollectionName::new("notion_chunks").unwrap();

    let first = indexer(backend.clone()).index_all().unwrap();
    let first_payloads = backend.payloads(&collection);
    let second = indexer(backend.clone()).index_all().unwrap();
    let second_payloads = backend.payloads(&collection);

    assert_eq!(first, second);
    assert_eq!(first.pages_skipped, 0);
    assert!(first.points_written >= 3);
    assert_eq!(first_payloads, second_payloads);
    assert_eq!(first_payloads.len(), first.points_written);
}

#[test]
fn grouped_search_ranks_matching_page_first() {
    let backend = Arc::new(MemoryBackend::new());
    indexer(backend.clone()).index_all().unwrap();
    let (embeddings, index) = services(backend);
    let retriever = Retriever::new(embeddings, index);

    let results = retriever.search("rust ownership", &SearchOptions::default());
    assert_eq!(results[0].page_id, "rust-page");
    assert!(results[0]
        .excerpt
        .as_deref()
        .is_some_and(|e| e.to_lowercase().contains("ownership")));

    let pages = retriever
        .search_pages(
            "tomatoes soil",
            &SearchOptions {
                max_pages: 1,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].title, "Garden");
}

#[test]
fn flaky_embeddings_recover_after_two_backoffs() {
    struct FailTwice {
        calls: AtomicUsize,
    }
    impl Embedder for FailTwice {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(Error::Transient("503 Service Unavailable".into()));
            }
            KeywordEmbedder.embed(text)
        }
        fn name(&self) -> &str {
            "fail-twice"
        }
    }

    let sleeper = Arc::new(CountingSleeper::default());
    let client = EmbeddingClient::new(
        Arc::new(FailTwice {
            calls: AtomicUsize::new(0),
        }),
        RetryPolicy::new(3).with_sleeper(sleeper.clone()),
    );
    let vector = client.embed("rust").unwrap();
    assert_eq!(vector[0], 1.0);
    assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
}

#[test]
fn rag_degrades_when_generation_keeps_failing() {
    struct Overloaded;
    impl LlmProvider for Overloaded {
        fn complete(&self, _: &CompletionRequest<'_>) -> Result<String> {
            Err(Error::Transient("529 overloaded".into()))
        }
        fn name(&self) -> &str {
            "overloaded"
        }
    }

    let backend = Arc::new(MemoryBackend::new());
    indexer(backend.clone()).index_all().unwrap();
    let (embeddings, index) = services(backend);
    let sleeper = Arc::new(CountingSleeper::default());
    let generator = ResponseGenerator::new(
        Retriever::new(embeddings, index),
        Arc::new(Overloaded),
        RetryPolicy::new(3).with_sleeper(sleeper.clone()),
    );

    let answer = generator.generate("rust ownership");
    assert!(answer.answer.starts_with("Error generating response:"));
    assert!(answer.pages.is_empty());
    assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
}

#[test]
fn rag_answers_with_pages_sorted_by_best_chunk() {
    struct Canned;
    impl LlmProvider for Canned {
        fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
            assert!(request.prompt.contains("Question:\nwhy rust ownership"));
            Ok("Because of ownership.".to_string())
        }
        fn name(&self) -> &str {
            "canned"
        }
    }

    let backend = Arc::new(MemoryBackend::new());
    indexer(backend.clone()).index_all().unwrap();
    let (embeddings, index) = services(backend);
    let generator = ResponseGenerator::new(
        Retriever::new(embeddings, index),
        Arc::new(Canned),
        RetryPolicy::new(1),
    );

    let answer = generator.generate("why rust ownership");
    assert_eq!(answer.answer, "Because of ownership.");
    assert_eq!(answer.pages[0].page_id, "rust-page");
    let scores: Vec<f32> = answer.pages.iter().map(|p| p.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}
