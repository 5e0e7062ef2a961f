//! Chunk records flowing from the chunker through embedding into the index.

use serde::{Deserialize, Serialize};

/// One chunk of a source page, as stored in the vector index payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// `"{page_idx}-{chunk_idx}"`, unique within an indexing run.
    pub id: String,
    /// Content-source page identifier.
    #[serde(default)]
    pub page_id: String,
    /// Position of the page in the content listing.
    #[serde(default)]
    pub page_idx: usize,
    /// Page title.
    #[serde(default = "untitled")]
    pub title: String,
    /// Zero-based position of this chunk within its page.
    #[serde(default)]
    pub chunk_idx: usize,
    /// Number of chunks the page was split into.
    #[serde(default = "one")]
    pub total_chunks: usize,
    /// Chunk body.
    #[serde(default, alias = "chunk")]
    pub text: String,
}

fn untitled() -> String {
    String::from("Untitled")
}

fn one() -> usize {
    1
}

impl ChunkRecord {
    /// Builds a record, deriving the chunk id from page and chunk positions.
    pub fn new(
        page_id: impl Into<String>,
        page_idx: usize,
        title: impl Into<String>,
        chunk_idx: usize,
        total_chunks: usize,
        text: impl Into<String>,
    ) -> Self {
        debug_assert!(chunk_idx < total_chunks);
        Self {
            id: format!("{page_idx}-{chunk_idx}"),
            page_id: page_id.into(),
            page_idx,
            title: title.into(),
            chunk_idx,
            total_chunks,
            text: text.into(),
        }
    }

    /// Text submitted to the embedding model.
    ///
    /// The title appears twice ahead of the body to bias the vector toward
    /// the page topic.
    pub fn embedding_input(&self) -> String {
        format!("{title} {title}\n\n{body}", title = self.title, body = self.text)
    }
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunkRecord {
    /// Source chunk, unchanged by embedding.
    pub chunk: ChunkRecord,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_combines_page_and_chunk_positions() {
        let record = ChunkRecord::new("abc", 4, "Title", 2, 3, "body");
        assert_eq!(record.id, "4-2");
    }

    #[test]
    fn embedding_input_repeats_title() {
        let record = ChunkRecord::new("abc", 0, "Ranking", 0, 1, "Gradient boosted trees.");
        assert_eq!(
            record.embedding_input(),
            "Ranking Ranking\n\nGradient boosted trees."
        );
    }

    #[test]
    fn sparse_payload_falls_back_to_defaults() {
        let record: ChunkRecord = serde_json::from_str(r#"{"id":"1-0","text":"hi"}"#).unwrap();
        assert_eq!(record.title, "Untitled");
        assert_eq!(record.total_chunks, 1);
        assert_eq!(record.page_id, "");
    }

    #[test]
    fn legacy_chunk_key_is_accepted() {
        let record: ChunkRecord =
            serde_json::from_str(r#"{"id":"0-0","chunk":"older payload"}"#).unwrap();
        assert_eq!(record.text, "older payload");
    }
}
