//! Paragraph-aligned text chunking with trailing-paragraph overlap.
//!
//! Text is split on newlines; each non-blank line is a paragraph. Paragraphs
//! accumulate into a buffer until the next one would push the joined length
//! past `chunk_size`, at which point the buffer is sealed and the next buffer
//! is seeded with as many trailing paragraphs as fit in `overlap`. Paragraphs
//! are never split, so a single paragraph longer than `chunk_size` becomes an
//! oversized chunk of its own. Lengths are counted in characters.

use std::str::Lines;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;
/// Default overlap budget in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 128;

const SEPARATOR: &str = "\n";

/// Chunking knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per chunk (single oversized paragraphs excepted).
    pub chunk_size: usize,
    /// Maximum characters repeated from the end of one chunk at the start of the next.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Stateless paragraph chunker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Builds a chunker; `chunk_size` is clamped to at least one character.
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config: ChunkConfig {
                chunk_size: config.chunk_size.max(1),
                overlap: config.overlap,
            },
        }
    }

    /// Active configuration.
    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// Lazily splits `text` into chunks in document order.
    ///
    /// The returned iterator is `Clone`, so a sequence can be replayed from
    /// any point; calling `split` again restarts from the beginning.
    pub fn split<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            paragraphs: text.lines(),
            buffer: Vec::new(),
            config: self.config,
        }
    }
}

/// Iterator over the chunks of one text.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    paragraphs: Lines<'a>,
    buffer: Vec<Paragraph<'a>>,
    config: ChunkConfig,
}

#[derive(Debug, Clone, Copy)]
struct Paragraph<'a> {
    text: &'a str,
    chars: usize,
}

impl<'a> Chunks<'a> {
    fn seal(&self) -> String {
        let parts: Vec<&str> = self.buffer.iter().map(|p| p.text).collect();
        parts.join(SEPARATOR)
    }

    /// Replaces the buffer with the overlap carried into the next chunk.
    fn seed_overlap(&mut self, incoming: usize) {
        let mut retained: Vec<Paragraph<'a>> = Vec::new();
        for paragraph in self.buffer.iter().rev() {
            let mut candidate = retained.clone();
            candidate.push(*paragraph);
            if joined_len(&candidate) > self.config.overlap {
                break;
            }
            retained = candidate;
        }
        retained.reverse();

        // the seeded buffer plus the incoming paragraph must still fit
        while !retained.is_empty()
            && joined_len(&retained) + SEPARATOR.len() + incoming > self.config.chunk_size
        {
            retained.remove(0);
        }
        self.buffer = retained;
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(text) = self.paragraphs.next() else {
                if self.buffer.is_empty() {
                    return None;
                }
                let chunk = self.seal();
                self.buffer.clear();
                return Some(chunk);
            };
            if text.trim().is_empty() {
                continue;
            }
            let paragraph = Paragraph {
                text,
                chars: text.chars().count(),
            };
            let grown = joined_len(&self.buffer) + SEPARATOR.len() + paragraph.chars;
            if !self.buffer.is_empty() && grown > self.config.chunk_size {
                let chunk = self.seal();
                self.seed_overlap(paragraph.chars);
                self.buffer.push(paragraph);
                return Some(chunk);
            }
            self.buffer.push(paragraph);
        }
    }
}

fn joined_len(paragraphs: &[Paragraph<'_>]) -> usize {
    if paragraphs.is_empty() {
        return 0;
    }
    paragraphs.iter().map(|p| p.chars).sum::<usize>() + (paragraphs.len() - 1) * SEPARATOR.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkConfig {
            chunk_size,
            overlap,
        })
    }

    fn paragraphs(count: usize, width: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let label = format!("p{i:03} ");
                let fill = "x".repeat(width.saturating_sub(label.len()));
                format!("{label}{fill}")
            })
            .collect()
    }

    /// Number of trailing paragraphs of `prev` repeated at the start of `next`.
    fn shared_paragraphs(prev: &str, next: &str) -> usize {
        let prev: Vec<&str> = prev.lines().collect();
        let next: Vec<&str> = next.lines().collect();
        (1..=prev.len().min(next.len()))
            .rev()
            .find(|&k| prev[prev.len() - k..] == next[..k])
            .unwrap_or(0)
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert_eq!(Chunker::default().split("").count(), 0);
        assert_eq!(Chunker::default().split("\n\n   \n").count(), 0);
    }

    #[test]
    fn short_text_is_one_chunk_without_blank_lines() {
        let chunks: Vec<String> = Chunker::default()
            .split("First paragraph.\n\n\nSecond paragraph.\n")
            .collect();
        assert_eq!(chunks, vec!["First paragraph.\nSecond paragraph.".to_string()]);
    }

    #[test]
    fn chunks_respect_size_and_overlap_budgets() {
        let paras = paragraphs(40, 50);
        let text = paras.join("\n\n");
        let chunks: Vec<String> = chunker(300, 110).split(&text).collect();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            assert!(chunk.chars().count() <= 300, "oversized chunk: {chunk}");
        }
        for pair in chunks.windows(2) {
            let shared = shared_paragraphs(&pair[0], &pair[1]);
            assert_eq!(shared, 2, "two 50-char paragraphs fit in 110 chars");
            let overlap: Vec<&str> = pair[1].lines().take(shared).collect();
            assert!(overlap.join("\n").chars().count() <= 110);
        }
    }

    #[test]
    fn removing_overlap_reconstructs_paragraph_sequence() {
        let paras = paragraphs(25, 70);
        let text = paras.join("\n");
        let chunks: Vec<String> = chunker(256, 128).split(&text).collect();

        let mut rebuilt: Vec<String> = chunks[0].lines().map(str::to_string).collect();
        for pair in chunks.windows(2) {
            let shared = shared_paragraphs(&pair[0], &pair[1]);
            rebuilt.extend(pair[1].lines().skip(shared).map(str::to_string));
        }
        assert_eq!(rebuilt, paras);
    }

    #[test]
    fn zero_overlap_produces_disjoint_chunks() {
        let paras = paragraphs(10, 40);
        let text = paras.join("\n");
        let chunks: Vec<String> = chunker(100, 0).split(&text).collect();
        let total: usize = chunks.iter().map(|c| c.lines().count()).sum();
        assert_eq!(total, paras.len());
    }

    #[test]
    fn oversized_paragraph_is_emitted_alone() {
        let long = "y".repeat(500);
        let text = format!("intro\n{long}\noutro");
        let chunks: Vec<String> = chunker(100, 20).split(&text).collect();
        assert_eq!(chunks, vec!["intro".to_string(), long, "outro".to_string()]);
    }

    #[test]
    fn overlap_never_pushes_chunk_past_limit() {
        let text = format!("{}\n{}\n{}", "a".repeat(30), "b".repeat(30), "c".repeat(90));
        let chunks: Vec<String> = chunker(100, 40).split(&text).collect();
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        assert_eq!(chunks.last().unwrap(), &"c".repeat(90));
    }

    #[test]
    fn sizes_count_characters_not_bytes() {
        let para = "é".repeat(60);
        let text = format!("{para}\n{para}");
        let chunks: Vec<String> = chunker(121, 0).split(&text).collect();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn splitting_is_deterministic_and_restartable() {
        let text = paragraphs(30, 64).join("\n");
        let chunker = chunker(200, 70);
        let first: Vec<String> = chunker.split(&text).collect();
        let second: Vec<String> = chunker.split(&text).collect();
        assert_eq!(first, second);

        let mut iter = chunker.split(&text);
        iter.next();
        let replay = iter.clone();
        assert_eq!(iter.collect::<Vec<_>>(), replay.collect::<Vec<_>>());
    }
}
