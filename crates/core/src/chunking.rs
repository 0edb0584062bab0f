use crate::error::{IngestError, Result};
use crate::models::{Chunk, IngestionOptions, PageRecord};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap_chars: usize,
    pub separators: Vec<String>,
}

impl ChunkingConfig {
    pub fn new(
        chunk_size: usize,
        overlap_chars: usize,
        separators: Vec<String>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if overlap_chars > chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap_chars} is larger than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap_chars,
            separators,
        })
    }

    /// Sizes chunks from the whole document: a tenth of its length, never
    /// below the configured floor.
    pub fn adaptive(pages: &[PageRecord], options: &IngestionOptions) -> Result<Self> {
        let total = total_chars(pages);
        let size = adaptive_chunk_size(total, options.chunk_size_divisor, options.min_chunk_chars);
        Self::new(size, options.chunk_overlap_chars, options.separators.clone())
    }
}

pub fn total_chars(pages: &[PageRecord]) -> usize {
    pages.iter().map(|page| page.text.chars().count()).sum()
}

pub fn adaptive_chunk_size(total_chars: usize, divisor: usize, floor: usize) -> usize {
    (total_chars / divisor.max(1)).max(floor)
}

/// Splits every page independently; chunks inherit their page's metadata and
/// keep document order.
pub fn split_pages(pages: &[PageRecord], config: &ChunkingConfig) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            split_text(&page.text, config)
                .into_iter()
                .map(|text| Chunk::new(text, page.metadata.clone()))
        })
        .collect()
}

/// Recursive character splitting: split on the coarsest separator present,
/// merge small pieces back up to `chunk_size`, and recurse into pieces that
/// are still too long with the finer separators.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    split_recursive(text, &config.separators, config)
}

fn split_recursive(text: &str, separators: &[String], config: &ChunkingConfig) -> Vec<String> {
    let (separator, finer) = pick_separator(text, separators);
    let pieces = split_keeping_separator(text, separator);

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) < config.chunk_size {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, config));
            pending.clear();
        }

        if finer.is_empty() {
            chunks.push(piece.to_string());
        } else {
            chunks.extend(split_recursive(piece, finer, config));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, config));
    }

    chunks
}

fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (&'a str, &'a [String]) {
    for (index, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return ("", &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator.as_str(), &separators[index + 1..]);
        }
    }
    (separators.last().map(String::as_str).unwrap_or(""), &[])
}

/// Each piece after the first starts with the separator that preceded it.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        pieces.push(&text[start..index]);
        start = index;
    }
    pieces.push(&text[start..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Greedily packs pieces into chunks of at most `chunk_size` characters. When
/// a chunk is emitted, leading pieces are dropped until at most
/// `overlap_chars` remain *and* the next piece fits; the second condition is
/// what terminates the loop when the overlap is as large as the chunk.
fn merge_pieces(pieces: &[&str], config: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let length = char_len(piece);

        if total + length > config.chunk_size {
            if total > config.chunk_size {
                warn!(
                    chunk_chars = total,
                    chunk_size = config.chunk_size,
                    "created a chunk longer than the configured size"
                );
            }

            if !window.is_empty() {
                push_joined(&mut chunks, &window);

                while total > config.overlap_chars
                    || (total + length > config.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
        }

        window.push_back(piece);
        total += length;
    }

    push_joined(&mut chunks, &window);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
