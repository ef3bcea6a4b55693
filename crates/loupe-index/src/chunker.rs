//! Chunking seam.
//!
//! Splitting a file into addressable snippets is an external concern; the
//! pipeline consumes it through the [`Chunker`] trait and treats whatever
//! comes back as opaque embedding units. A plain line-window implementation
//! ships as the default so the crate works standalone.

use serde::{Deserialize, Serialize};

/// A contiguous excerpt of a file's text, one embedding unit.
///
/// Ephemeral: produced per file, consumed immediately by the embedding step.
/// Line numbers are 1-indexed and inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier within the file, `"{file_path}:{line_start}"`.
    pub id: String,
    /// Path of the source file, relative to the indexed root.
    pub file_path: String,
    /// The chunk text. Never empty.
    pub content: String,
    /// First line covered by this chunk.
    pub line_start: usize,
    /// Last line covered by this chunk.
    pub line_end: usize,
}

/// Splits file text into chunks. Consumed as a black box by the pipeline.
pub trait Chunker: Send + Sync {
    fn chunk(&self, file_path: &str, text: &str) -> Vec<Chunk>;
}

/// Fixed-size line windows with overlap between neighbours.
#[derive(Debug, Clone)]
pub struct LineChunker {
    /// Lines per window.
    pub max_lines: usize,
    /// Lines shared with the previous window.
    pub overlap: usize,
}

impl Default for LineChunker {
    fn default() -> Self {
        Self {
            max_lines: 60,
            overlap: 8,
        }
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, file_path: &str, text: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let window = self.max_lines.max(1);
        let step = window.saturating_sub(self.overlap).max(1);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < lines.len() {
            let end = (start + window).min(lines.len());
            let content = lines[start..end].join("\n");

            // Whitespace-only windows would violate the provider's
            // non-empty input invariant.
            if !content.trim().is_empty() {
                let line_start = start + 1;
                chunks.push(Chunk {
                    id: format!("{file_path}:{line_start}"),
                    file_path: file_path.to_string(),
                    content,
                    line_start,
                    line_end: end,
                });
            }

            if end == lines.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}
