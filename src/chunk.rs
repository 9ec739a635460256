//! Sliding-window character chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! stepping `chunk_size - chunk_overlap` characters between window starts.
//! Chunking is a pure function of `(text, chunk_size, chunk_overlap)`, so
//! identical inputs always yield identical boundaries and [`ChunkId`]s.
//!
//! # Algorithm
//!
//! 1. Index the text by `char` (offsets are character counts, never bytes,
//!    so multi-byte UTF-8 is never split).
//! 2. Emit the window `[start, min(start + chunk_size, len))`.
//! 3. Stop as soon as a window reaches the end of the text. The last chunk
//!    may be shorter than `chunk_size`; it is never padded.
//! 4. Otherwise advance `start` by the step and repeat.
//!
//! Empty text produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use hybrid_kb::chunk::Chunker;
//! use hybrid_kb::models::DocumentMetadata;
//!
//! let chunker = Chunker::new(4, 1).unwrap();
//! let chunks = chunker.chunk("doc", "abcdefghij", &DocumentMetadata::default());
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["abcd", "defg", "ghij"]);
//! ```

use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkId, ChunkMetadata, DocumentMetadata};

/// Deterministic character-window splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Build a chunker, rejecting `chunk_size == 0` and
    /// `chunk_overlap >= chunk_size` (the window would never advance).
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Split `text` into chunks owned by `doc_id`, merging `metadata` and
    /// the chunk offsets into each chunk's [`ChunkMetadata`].
    pub fn chunk(&self, doc_id: &str, text: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        // Byte offset of every char, plus the end of the string.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = bounds.len() - 1;

        let mut chunks = Vec::new();
        if char_len == 0 {
            return chunks;
        }

        let mut start = 0usize;
        loop {
            let end = (start + self.chunk_size).min(char_len);
            let index = chunks.len();
            chunks.push(Chunk {
                id: ChunkId::new(doc_id, index),
                doc_id: doc_id.to_string(),
                text: text[bounds[start]..bounds[end]].to_string(),
                start_offset: start,
                end_offset: end,
                index,
                metadata: ChunkMetadata::from_document(doc_id, metadata, index, start, end),
            });
            if end == char_len {
                break;
            }
            start += self.step();
        }

        chunks
    }
}
