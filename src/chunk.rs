//! Content fingerprinting and paragraph-aggregating chunking.
//!
//! `fingerprint` hashes the full raw text and is the freshness discriminant
//! for the whole pipeline: equal hash means equal bytes means no re-embed.
//!
//! `chunk_text` packs paragraphs (blocks separated by a blank line) into
//! chunks up to a character budget. When a paragraph would overflow the
//! budget, the current chunk is flushed and the next one is seeded with the
//! trailing `overlap` characters of the flushed chunk, so retrieval keeps
//! context across chunk boundaries.

use sha2::{Digest, Sha256};

/// One slice of a document body, ordered by `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// SHA-256 of the raw text bytes, lowercase hex.
pub fn fingerprint(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split body text into paragraph-aggregated chunks with character overlap.
///
/// A body with no non-empty paragraphs yields exactly one chunk containing
/// the original text — degenerate documents still get an addressable point.
/// A single paragraph larger than `max_chars` becomes its own chunk; text is
/// never split mid-paragraph.
pub fn chunk_text(body: &str, max_chars: usize, overlap: usize) -> Vec<Chunk> {
    let paras: Vec<&str> = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if paras.is_empty() {
        return vec![Chunk {
            index: 0,
            text: body.to_string(),
        }];
    }

    let mut texts: Vec<String> = Vec::new();
    let mut cur: Vec<String> = Vec::new();
    let mut cur_len = 0usize;

    for p in paras {
        let plen = p.chars().count() + if cur.is_empty() { 0 } else { 2 };
        if cur_len + plen <= max_chars {
            cur.push(p.to_string());
            cur_len += plen;
        } else {
            if !cur.is_empty() {
                texts.push(cur.join("\n\n"));
            }
            if overlap > 0 && !texts.is_empty() {
                let keep = tail_chars(texts.last().unwrap(), overlap);
                cur_len = keep.chars().count() + p.chars().count() + 2;
                cur = vec![keep, p.to_string()];
            } else {
                cur_len = p.chars().count();
                cur = vec![p.to_string()];
            }
        }
    }
    if !cur.is_empty() {
        texts.push(cur.join("\n\n"));
    }

    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { index, text })
        .collect()
}

/// Last `n` characters of `s`, respecting char boundaries.
fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = fingerprint("alpha");
        let b = fingerprint("alpha");
        let c = fingerprint("alpha!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_small_body_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1200, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_body_yields_one_chunk() {
        let chunks = chunk_text("", 1200, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn test_whitespace_body_yields_one_chunk() {
        let chunks = chunk_text("  \n\n  \n", 1200, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "  \n\n  \n");
    }

    #[test]
    fn test_paragraphs_packed_under_budget() {
        let body = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(body, 1200, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].text,
            "First paragraph.\n\nSecond paragraph.\n\nThird paragraph."
        );
    }

    #[test]
    fn test_overflow_flushes_and_indices_are_contiguous() {
        let body = (0..20)
            .map(|i| format!("Paragraph number {} with some padding text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&body, 100, 0);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.text.chars().count() <= 100, "chunk {} over budget", i);
        }
    }

    #[test]
    fn test_overlap_seeds_next_chunk() {
        let body = "aaaaaaaaaa\n\nbbbbbbbbbb\n\ncccccccccc";
        let chunks = chunk_text(body, 24, 5);
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let seed = tail_chars(&pair[0].text, 5);
            assert!(
                pair[1].text.starts_with(&seed),
                "chunk {:?} does not start with seed {:?}",
                pair[1].text,
                seed
            );
        }
    }

    #[test]
    fn test_oversized_paragraph_kept_whole() {
        let big = "x".repeat(500);
        let body = format!("small\n\n{}\n\nsmall again", big);
        let chunks = chunk_text(&body, 100, 10);
        assert!(chunks.iter().any(|c| c.text.contains(&big)));
    }

    #[test]
    fn test_reconstruction_ignoring_overlap_prefix() {
        let paras: Vec<String> = (0..15)
            .map(|i| format!("Paragraph {} content that fills some room.", i))
            .collect();
        let body = paras.join("\n\n");
        let overlap = 12;
        let chunks = chunk_text(&body, 90, overlap);

        let mut rebuilt = chunks[0].text.clone();
        for pair in chunks.windows(2) {
            let seed = tail_chars(&pair[0].text, overlap);
            let rest = pair[1]
                .text
                .strip_prefix(&seed)
                .and_then(|r| r.strip_prefix("\n\n"))
                .expect("non-first chunk must start with seed");
            rebuilt.push_str("\n\n");
            rebuilt.push_str(rest);
        }
        assert_eq!(rebuilt, body);
    }

    #[test]
    fn test_deterministic() {
        let body = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(chunk_text(body, 12, 4), chunk_text(body, 12, 4));
    }
}
