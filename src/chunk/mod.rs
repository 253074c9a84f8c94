//! Text chunking
//!
//! Splits extracted text into overlapping windows of code points. Chunk
//! boundaries are always code-point aligned, never byte offsets, so
//! multi-byte characters are never split.

use crate::ports::Chunker;

/// Windowed splitter with overlap between consecutive chunks
#[derive(Debug, Clone)]
pub struct Splitter {
    chunk_size: usize,
    overlap: usize,
}

impl Splitter {
    /// Create a splitter. A zero chunk size falls back to 900; an overlap
    /// at or above the chunk size is clamped to a quarter of it.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = if chunk_size == 0 { 900 } else { chunk_size };
        let overlap = if overlap >= chunk_size {
            chunk_size / 4
        } else {
            overlap
        };
        Self { chunk_size, overlap }
    }
}

impl Chunker for Splitter {
    fn split(&self, text: &str) -> Vec<String> {
        let runes: Vec<char> = text.chars().collect();
        if runes.is_empty() {
            return Vec::new();
        }

        let mut step = self.chunk_size - self.overlap;
        if step == 0 {
            step = self.chunk_size;
        }

        let mut out = Vec::with_capacity(runes.len() / step + 1);
        let mut start = 0;
        while start < runes.len() {
            let end = (start + self.chunk_size).min(runes.len());
            let chunk: String = runes[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                out.push(chunk.to_string());
            }
            if end == runes.len() {
                break;
            }
            start += step;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let splitter = Splitter::new(100, 20);
        assert!(splitter.split("").is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = Splitter::new(100, 20);
        let chunks = splitter.split("hello world");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let splitter = Splitter::new(10, 4);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = splitter.split(text);

        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10);
        }
        // Step is 6, so the second window starts at 'g' and repeats the tail
        // of the first one.
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "ghijklmnop");
    }

    #[test]
    fn test_coverage_reconstructs_original() {
        let splitter = Splitter::new(12, 3);
        let text = "The quick brown fox jumps over the lazy dog near the river bank";
        let chunks = splitter.split(text);
        assert!(chunks.len() > 1);

        // Concatenating the chunks with the overlap removed reconstructs the
        // text modulo trimming at chunk boundaries.
        let runes: Vec<char> = text.chars().collect();
        let step = 12 - 3;
        for (i, chunk) in chunks.iter().enumerate() {
            let start = i * step;
            let end = (start + 12).min(runes.len());
            let window: String = runes[start..end].iter().collect();
            assert_eq!(chunk, window.trim());
        }
    }

    #[test]
    fn test_pathological_overlap_is_clamped() {
        // Overlap >= chunk size would never advance; it clamps to a quarter.
        let splitter = Splitter::new(8, 8);
        let chunks = splitter.split("abcdefghijklmnop");
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].chars().count(), 8);
        // step = 8 - 2 = 6
        assert_eq!(chunks[1], "ghijklmn");
    }

    #[test]
    fn test_multibyte_boundaries_are_code_point_aligned() {
        let splitter = Splitter::new(4, 1);
        let text = "héllø wörld ünïcode";
        let chunks = splitter.split(text);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 4);
        }
        // No panic means no byte-slicing happened.
    }

    #[test]
    fn test_whitespace_only_window_is_dropped() {
        let splitter = Splitter::new(4, 0);
        let chunks = splitter.split("abcd    efgh");
        assert_eq!(chunks, vec!["abcd".to_string(), "efgh".to_string()]);
    }
}
