//! Text chunking with structure awareness
//!
//! This module handles splitting extracted page text into chunks while:
//! - Never exceeding the configured maximum chunk size
//! - Preferring heading, then paragraph, sentence and word boundaries
//! - Providing stable, deterministic chunk boundaries
//! - Computing content hashes for each chunk

mod boundaries;

pub use boundaries::*;

use crate::config::ChunkConfig;
use blake3::Hasher;

/// A text chunk with metadata
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// The actual text content
    pub text: String,

    /// Chunk index (0-based)
    pub index: usize,

    /// Blake3 hash of the chunk text
    pub hash: String,
}

/// Split text into chunks of at most `config.max_chars` characters.
///
/// The same text and config always yield the same chunks. Within the last
/// half of each window the highest priority break point wins, latest first;
/// without one the chunk is cut hard at the limit. Consecutive chunks share
/// up to `overlap_chars` of text, snapped forward to a word start.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<TextChunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let max = config.max_chars.max(1);
    let min_len = config.min_chars.max(max / 2).min(max);
    let break_points = find_break_points(text, config.prefer_heading_boundaries);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = if start + max >= text.len() {
            text.len()
        } else {
            let hard_end = ensure_char_boundary(text, start + max);
            best_break(&break_points, start + min_len, hard_end).unwrap_or(hard_end)
        };

        // A limit smaller than one character still has to make progress
        let end = if end <= start {
            next_char_boundary(text, start)
        } else {
            end
        };

        let chunk_text = text[start..end].trim();
        if !chunk_text.is_empty() {
            chunks.push(TextChunk {
                text: chunk_text.to_string(),
                index: chunks.len(),
                hash: compute_text_hash(chunk_text),
            });
        }

        if end >= text.len() {
            break;
        }

        start = overlap_start(text, start, end, config.overlap_chars);
    }

    chunks
}

/// Highest priority break in `[from, to]`, preferring the latest on ties
fn best_break(points: &[BreakPoint], from: usize, to: usize) -> Option<usize> {
    points
        .iter()
        .filter(|p| p.position >= from && p.position <= to)
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.position.cmp(&b.position))
        })
        .map(|p| p.position)
}

/// Where the chunk after `[start, end)` begins
fn overlap_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 || end <= overlap {
        return end;
    }

    let candidate = ensure_char_boundary(text, end - overlap);
    if candidate <= start {
        return end;
    }

    // Begin the overlap on a word rather than mid-word
    let snapped = text[candidate..end]
        .find(char::is_whitespace)
        .map(|i| candidate + i + 1)
        .filter(|pos| *pos < end && text.is_char_boundary(*pos));

    snapped.unwrap_or(candidate)
}

/// Round a byte position down to the nearest UTF-8 character boundary
fn ensure_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut adjusted = pos;
    while adjusted > 0 && !text.is_char_boundary(adjusted) {
        adjusted -= 1;
    }
    adjusted
}

fn next_char_boundary(text: &str, pos: usize) -> usize {
    text[pos..]
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
        .unwrap_or(text.len())
}

/// Compute a stable hash for content
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize().to_hex().to_string()
}

/// Compute a stable hash for a string
pub fn compute_text_hash(text: &str) -> String {
    compute_content_hash(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_config(max_chars: usize, overlap_chars: usize) -> ChunkConfig {
        ChunkConfig {
            max_chars,
            overlap_chars,
            prefer_heading_boundaries: true,
            min_chars: 10,
        }
    }

    #[test]
    fn test_chunk_short_text() {
        let chunks = chunk_text("This is a short page.", &chunk_config(500, 50));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "This is a short page.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_chunk_empty_text() {
        assert!(chunk_text("  \n\n ", &chunk_config(500, 50)).is_empty());
    }

    #[test]
    fn test_chunks_never_exceed_max() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(80);
        let config = chunk_config(300, 40);
        let chunks = chunk_text(&text, &config);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= config.max_chars);
        }
    }

    #[test]
    fn test_unbroken_text_is_cut_hard() {
        let text = "x".repeat(1050);
        let chunks = chunk_text(&text, &chunk_config(100, 0));

        assert_eq!(chunks.len(), 11);
        assert!(chunks.iter().all(|c| c.text.len() <= 100));
        let total: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert_eq!(total, 1050);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "# Intro\n\nFirst paragraph here. ".repeat(40);
        let config = chunk_config(200, 30);

        let first: Vec<_> = chunk_text(&text, &config).into_iter().map(|c| c.hash).collect();
        let second: Vec<_> = chunk_text(&text, &config).into_iter().map(|c| c.hash).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_prefers_heading_boundary() {
        let text = "Alpha sentence one. Alpha sentence two.\n\n# Beta\n\nBeta body text goes here and continues for a while.";
        let chunks = chunk_text(text, &chunk_config(60, 0));

        assert_eq!(chunks[0].text, "Alpha sentence one. Alpha sentence two.");
        assert!(chunks[1].text.starts_with("# Beta"));
    }

    #[test]
    fn test_prefers_sentence_over_word() {
        let text = "The quick brown fox jumps. Over the lazy dog again and again and again.";
        let chunks = chunk_text(text, &chunk_config(40, 0));

        assert_eq!(chunks[0].text, "The quick brown fox jumps.");
    }

    #[test]
    fn test_overlap_repeats_tail_words() {
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen fourteen";
        let chunks = chunk_text(text, &chunk_config(40, 15));

        assert!(chunks.len() > 1);
        let last_word = chunks[0].text.split_whitespace().last().unwrap();
        assert!(chunks[1].text.contains(last_word));
    }

    #[test]
    fn test_large_overlap_still_progresses() {
        let text = "word ".repeat(200);
        let chunks = chunk_text(&text, &chunk_config(50, 49));

        assert!(!chunks.is_empty());
        assert!(chunks.len() < text.len());
        assert!(chunks.last().unwrap().text.ends_with("word"));
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Größenänderung für Übersichten. ".repeat(30);
        let chunks = chunk_text(&text, &chunk_config(64, 8));

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 64));
    }

    #[test]
    fn test_content_hash() {
        let hash1 = compute_text_hash("hello world");
        let hash2 = compute_text_hash("hello world");
        let hash3 = compute_text_hash("different content");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }
}
