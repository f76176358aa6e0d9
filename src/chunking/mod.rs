//! Sentence-aware chunking.
//!
//! Splits document text into bounded, coherent fragments:
//!
//! 1. Split into paragraphs on blank lines
//! 2. Split paragraphs into sentences (`. ! ?` followed by whitespace or end)
//! 3. Hard-split any sentence that alone exceeds the budget at word boundaries
//! 4. Greedily pack segments up to `max_tokens`, preferring to break at
//!    paragraph boundaries once a chunk is half full
//! 5. Carry `overlap_sentences` trailing segments into the next chunk
//! 6. Fold an undersized trailing chunk into its predecessor when it fits
//!
//! Chunk content is always an exact slice of the input, so `start_offset` /
//! `end_offset` can be used to highlight the source text.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::text::{estimate_tokens, extract_keywords};
use crate::types::{Chunk, ChunkId, ChunkMetadata, Document};

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid sentence regex"));

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("valid paragraph regex"));

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("valid word regex"));

/// A contiguous byte range of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: usize,
    end: usize,
    /// First segment of a paragraph.
    paragraph_start: bool,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
    min_tokens: usize,
    overlap_sentences: usize,
    max_keywords: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(&ChunkingConfig::default())
    }
}

impl Chunker {
    #[must_use]
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_tokens: config.max_tokens.max(1),
            min_tokens: config.min_tokens,
            overlap_sentences: config.overlap_sentences,
            max_keywords: config.max_keywords,
        }
    }

    #[must_use]
    pub const fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Chunk a document. Blank text yields an empty list.
    #[must_use]
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        let ranges = self.pack(text);
        let chunk_count = ranges.len();

        let chunks: Vec<Chunk> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let content = &text[start..end];
                Chunk {
                    id: ChunkId::for_document(&document.id, index),
                    document_id: document.id.clone(),
                    content: content.to_string(),
                    token_count: estimate_tokens(content).max(1),
                    start_offset: start,
                    end_offset: end,
                    keywords: extract_keywords(content, self.max_keywords),
                    metadata: ChunkMetadata {
                        document_title: document.title.clone(),
                        document_kind: document.kind.clone(),
                        chunk_index: index,
                        chunk_count,
                        extra: document.extra.clone(),
                    },
                }
            })
            .collect();

        debug!(
            document_id = %document.id,
            chunks = chunks.len(),
            max_tokens = self.max_tokens,
            "Chunked document"
        );
        chunks
    }

    /// Byte ranges of the packed chunks.
    fn pack(&self, text: &str) -> Vec<(usize, usize)> {
        let segments = self.segments(text);
        if segments.is_empty() {
            return Vec::new();
        }

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut current: Vec<Segment> = Vec::new();

        for segment in segments {
            if let Some(first) = current.first() {
                let candidate = estimate_tokens(&text[first.start..segment.end]);
                let current_tokens =
                    estimate_tokens(&text[first.start..current[current.len() - 1].end]);
                let over_budget = candidate > self.max_tokens;
                let paragraph_break =
                    segment.paragraph_start && current_tokens * 2 >= self.max_tokens;

                if over_budget || paragraph_break {
                    ranges.push((first.start, current[current.len() - 1].end));
                    current = self.overlap_tail(text, &current, segment);
                }
            }
            current.push(segment);
        }

        if let Some(first) = current.first() {
            ranges.push((first.start, current[current.len() - 1].end));
        }

        self.merge_small_tail(text, &mut ranges);
        ranges
    }

    /// Trailing segments of the flushed chunk to repeat at the start of the next.
    fn overlap_tail(&self, text: &str, flushed: &[Segment], next: Segment) -> Vec<Segment> {
        if self.overlap_sentences == 0 || flushed.len() <= self.overlap_sentences {
            return Vec::new();
        }
        let tail = &flushed[flushed.len() - self.overlap_sentences..];
        if estimate_tokens(&text[tail[0].start..next.end]) > self.max_tokens {
            return Vec::new();
        }
        tail.to_vec()
    }

    fn merge_small_tail(&self, text: &str, ranges: &mut Vec<(usize, usize)>) {
        if ranges.len() < 2 {
            return;
        }
        let (last_start, last_end) = ranges[ranges.len() - 1];
        if estimate_tokens(&text[last_start..last_end]) >= self.min_tokens {
            return;
        }
        let prev_start = ranges[ranges.len() - 2].0;
        if estimate_tokens(&text[prev_start..last_end]) <= self.max_tokens {
            ranges.pop();
            let len = ranges.len();
            ranges[len - 1].1 = last_end;
        }
    }

    /// Sentence segments with oversize sentences split at word boundaries.
    fn segments(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        for (para_start, para_end) in paragraphs(text) {
            let mut first = true;
            for (start, end) in sentences(text, para_start, para_end) {
                if estimate_tokens(&text[start..end]) <= self.max_tokens {
                    segments.push(Segment {
                        start,
                        end,
                        paragraph_start: first,
                    });
                } else {
                    for (piece_start, piece_end) in self.split_words(text, start, end) {
                        segments.push(Segment {
                            start: piece_start,
                            end: piece_end,
                            paragraph_start: first,
                        });
                        first = false;
                    }
                }
                first = false;
            }
        }
        segments
    }

    fn split_words(&self, text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut pieces = Vec::new();
        let mut piece: Option<(usize, usize)> = None;
        for word in WORD.find_iter(&text[start..end]) {
            let (w_start, w_end) = (start + word.start(), start + word.end());
            piece = match piece {
                None => Some((w_start, w_end)),
                Some((p_start, p_end)) => {
                    if estimate_tokens(&text[p_start..w_end]) > self.max_tokens {
                        pieces.push((p_start, p_end));
                        Some((w_start, w_end))
                    } else {
                        Some((p_start, w_end))
                    }
                }
            };
        }
        if let Some(last) = piece {
            pieces.push(last);
        }
        pieces
    }
}

/// Non-blank paragraph byte ranges, trimmed.
fn paragraphs(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut last = 0;
    for sep in PARAGRAPH_BREAK.find_iter(text) {
        push_trimmed(text, last, sep.start(), &mut out);
        last = sep.end();
    }
    push_trimmed(text, last, text.len(), &mut out);
    out
}

/// Sentence byte ranges within `[start, end)`, trimmed.
fn sentences(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut last = start;
    for mat in SENTENCE_END.find_iter(&text[start..end]) {
        let sentence_end = start + mat.end();
        push_trimmed(text, last, sentence_end, &mut out);
        last = sentence_end;
    }
    push_trimmed(text, last, end, &mut out);
    out
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let trimmed_start = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        let s = start + trimmed_start;
        out.push((s, s + trimmed.len()));
    }
}
