//! Paragraph-boundary text chunker with overlap.
//!
//! Splits extracted document text into [`DocumentChunk`]s of at most
//! `chunk_size` characters. Paragraphs (`\n\n`) are packed together while
//! they fit; a paragraph longer than a chunk is cut at whitespace where
//! possible. Each new chunk starts with up to `chunk_overlap` characters
//! taken from the end of the previous one, so a sentence that straddles a
//! boundary still appears whole in at least one chunk.
//!
//! Sizes are counted in characters, not bytes, so multi-byte text never
//! gets cut inside a code point.

use sha2::{Digest, Sha256};

use crate::models::DocumentChunk;

/// Split `text` into chunks for `source`. Indices are contiguous from 0.
/// Text without any non-whitespace content yields no chunks.
pub fn chunk_text(
    source: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<DocumentChunk> {
    let size = chunk_size.max(1);
    let overlap = chunk_overlap.min(size - 1);

    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;
    // Whether `buf` holds text beyond the tail carried over from the last piece.
    let mut fresh = false;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_len = trimmed.chars().count();

        if para_len > size {
            if fresh {
                pieces.push(std::mem::take(&mut buf));
            }
            let split = hard_split(trimmed, size, overlap);
            buf = split
                .last()
                .map(|last| overlap_tail(last, overlap))
                .unwrap_or_default();
            buf_len = buf.chars().count();
            fresh = false;
            pieces.extend(split);
            continue;
        }

        let would_be = if buf_len == 0 {
            para_len
        } else {
            buf_len + 2 + para_len
        };

        if would_be > size {
            let seed = if fresh {
                let tail = overlap_tail(&buf, overlap);
                pieces.push(std::mem::take(&mut buf));
                tail
            } else {
                std::mem::take(&mut buf)
            };
            let seed_len = seed.chars().count();
            if seed_len > 0 && seed_len + 2 + para_len <= size {
                buf = seed;
                buf_len = seed_len;
            } else {
                buf_len = 0;
            }
        }

        if buf_len > 0 {
            buf.push_str("\n\n");
            buf_len += 2;
        }
        buf.push_str(trimmed);
        buf_len += para_len;
        fresh = true;
    }

    if fresh {
        pieces.push(buf);
    }

    pieces
        .iter()
        .filter(|p| !p.trim().is_empty())
        .enumerate()
        .map(|(i, p)| make_chunk(source, i as i64, p))
        .collect()
}

/// Cut an oversized paragraph into windows of at most `size` characters,
/// preferring to end each window at whitespace. Consecutive windows share
/// up to `overlap` characters and every window advances by at least one.
fn hard_split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut out = Vec::new();
    let mut start = 0usize;

    while start < n {
        let mut end = (start + size).min(n);
        if end < n {
            if let Some(pos) = (start + 1..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = pos;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        if end >= n {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
        while start < n && chars[start].is_whitespace() {
            start += 1;
        }
    }

    out
}

/// The last `overlap` characters of `text`, moved forward to a word
/// boundary when one exists inside the window.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= overlap {
        return text.to_string();
    }
    let tail: String = text.chars().skip(total - overlap).collect();
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim().to_string(),
        None => tail,
    }
}

fn make_chunk(source: &str, index: i64, text: &str) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounded(chunks: &[DocumentChunk], size: usize) {
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "index mismatch at {}", i);
            assert!(
                c.text.chars().count() <= size,
                "chunk {} has {} chars",
                i,
                c.text.chars().count()
            );
            assert!(!c.text.trim().is_empty());
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("a.pdf", "Hello, world!", 500, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].source, "a.pdf");
    }

    #[test]
    fn whitespace_only_text_has_no_chunks() {
        assert!(chunk_text("a.pdf", "", 500, 100).is_empty());
        assert!(chunk_text("a.pdf", " \n\n \t\n\n", 500, 100).is_empty());
    }

    #[test]
    fn paragraphs_under_limit_are_packed() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("a.pdf", text, 500, 100);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn many_paragraphs_respect_bounds() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {} talks about lakehouse tables.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("a.pdf", &text, 120, 30);
        assert!(chunks.len() > 1);
        assert_bounded(&chunks, 120);
        assert!(chunks.last().unwrap().text.contains("Paragraph number 49"));
    }

    #[test]
    fn long_paragraph_is_hard_split_with_overlap() {
        let words: Vec<String> = (0..200).map(|i| format!("word{}", i)).collect();
        let text = words.join(" ");
        let chunks = chunk_text("a.pdf", &text, 100, 20);
        assert!(chunks.len() > 2);
        assert_bounded(&chunks, 100);

        // neighbouring windows share text
        let first_tail = chunks[0].text.split(' ').last().unwrap();
        assert!(chunks[1].text.contains(first_tail));
        assert!(chunks.last().unwrap().text.ends_with("word199"));
    }

    #[test]
    fn word_without_spaces_is_cut_on_char_boundaries() {
        let text = "é".repeat(250);
        let chunks = chunk_text("a.pdf", &text, 100, 10);
        assert_bounded(&chunks, 100);
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn zero_overlap_covers_text_once() {
        let words: Vec<String> = (0..60).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let chunks = chunk_text("a.pdf", &text, 40, 0);
        assert_bounded(&chunks, 40);
        let rejoined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn deterministic_output() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("a.pdf", text, 12, 4);
        let c2 = chunk_text("a.pdf", text, 12, 4);
        assert_eq!(c1, c2);
        assert_bounded(&c1, 12);
    }
}
