
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;
use tracing::debug;

use crate::config::ConfigError;

/// A chunk of source text ready for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text, an exact substring of the source
    pub content: String,
    /// Character offset of the chunk within the source text
    pub offset: usize,
    /// Number of leading characters shared with the previous chunk
    pub overlap: usize,
}

/// Configuration for recursive character splitting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Maximum number of characters carried over from one chunk into the next
    pub chunk_overlap: usize,
    /// Separators tried in order, largest unit first. An empty separator
    /// splits into single characters.
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 40,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                " ".to_string(),
                String::new(),
            ],
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100_000).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }
        if self.separators.is_empty() {
            return Err(ConfigError::NoSeparators);
        }
        Ok(())
    }
}

/// Splits text recursively on a hierarchy of separators, merging the pieces
/// back into overlapping chunks of bounded length
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: ChunkingConfig,
}

impl TextSplitter {
    #[inline]
    pub fn new(config: ChunkingConfig) -> crate::Result<Self> {
        config
            .validate()
            .map_err(|e| crate::RagError::Config(e.to_string()))?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split text into chunk strings
    #[inline]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_chunks(text)
            .into_iter()
            .map(|chunk| chunk.content)
            .collect()
    }

    /// Split text into chunks carrying their position and overlap
    #[inline]
    pub fn split_chunks(&self, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut spans = Vec::new();
        self.split_span(text, 0..text.len(), &self.config.separators, &mut spans);

        let mut chunks = Vec::with_capacity(spans.len());
        let mut byte_cursor = 0;
        let mut char_cursor = 0;
        let mut previous_end = 0;

        for span in spans {
            // Spans never move backwards, so offsets can be counted incrementally
            if span.start > byte_cursor {
                char_cursor += char_len(text, byte_cursor..span.start);
                byte_cursor = span.start;
            }

            let overlap = if previous_end > span.start {
                char_len(text, span.start..previous_end)
            } else {
                0
            };
            previous_end = span.end;

            chunks.push(TextChunk {
                content: slice(text, span).to_string(),
                offset: char_cursor,
                overlap,
            });
        }

        debug!(
            "Split {} bytes into {} chunks (size {}, overlap {})",
            text.len(),
            chunks.len(),
            self.config.chunk_size,
            self.config.chunk_overlap
        );

        chunks
    }

    fn split_span(
        &self,
        text: &str,
        span: Range<usize>,
        separators: &[String],
        out: &mut Vec<Range<usize>>,
    ) {
        let segment = slice(text, span.clone());

        let mut separator = separators.last().map_or("", String::as_str);
        let mut finer: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if segment.contains(candidate.as_str()) {
                separator = candidate.as_str();
                finer = separators.get(i + 1..).unwrap_or_default();
                break;
            }
        }

        let mut small_pieces = Vec::new();
        for piece in split_keeping_separator(segment, separator) {
            let piece = (piece.start + span.start)..(piece.end + span.start);
            if char_len(text, piece.clone()) < self.config.chunk_size {
                small_pieces.push(piece);
                continue;
            }

            if !small_pieces.is_empty() {
                self.merge_pieces(text, &small_pieces, out);
                small_pieces.clear();
            }
            if finer.is_empty() {
                out.push(piece);
            } else {
                self.split_span(text, piece, finer, out);
            }
        }

        if !small_pieces.is_empty() {
            self.merge_pieces(text, &small_pieces, out);
        }
    }

    /// Greedily join adjacent pieces up to the chunk size, keeping a tail of
    /// at most `chunk_overlap` characters as the start of the next chunk
    fn merge_pieces(&self, text: &str, pieces: &[Range<usize>], out: &mut Vec<Range<usize>>) {
        let size = self.config.chunk_size;
        let mut current: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(text, piece.clone());

            if total + len > size {
                if let (Some(first), Some(last)) = (current.front(), current.back()) {
                    out.push(first.0.start..last.0.end);
                }
                while total > self.config.chunk_overlap || (total + len > size && total > 0) {
                    match current.pop_front() {
                        Some((_, popped)) => total -= popped,
                        None => break,
                    }
                }
            }

            current.push_back((piece.clone(), len));
            total += len;
        }

        if let (Some(first), Some(last)) = (current.front(), current.back()) {
            out.push(first.0.start..last.0.end);
        }
    }
}

impl Default for TextSplitter {
    #[inline]
    fn default() -> Self {
        Self {
            config: ChunkingConfig::default(),
        }
    }
}

/// Chunk text with the default 500/40 settings
#[inline]
pub fn chunk_text(text: &str) -> Vec<String> {
    TextSplitter::default().split_text(text)
}

/// Split `segment` into byte ranges, each ending with the run of separators
/// that terminated it
fn split_keeping_separator(segment: &str, separator: &str) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return segment
            .char_indices()
            .map(|(i, c)| i..i + c.len_utf8())
            .collect();
    }

    let mut pieces: Vec<Range<usize>> = Vec::new();
    let mut start = 0;
    for (index, matched) in segment.match_indices(separator) {
        let end = index + matched.len();
        if index == start && !pieces.is_empty() {
            // Repeated separator, extend the previous piece
            if let Some(previous) = pieces.last_mut() {
                *previous = previous.start..end;
            }
        } else if end > start {
            pieces.push(start..end);
        }
        start = end;
    }
    if start < segment.len() {
        pieces.push(start..segment.len());
    }
    pieces
}

#[expect(
    clippy::string_slice,
    reason = "spans are built from char_indices and match_indices, so they sit on char boundaries"
)]
fn slice(text: &str, span: Range<usize>) -> &str {
    &text[span]
}

fn char_len(text: &str, span: Range<usize>) -> usize {
    slice(text, span).chars().count()
}
