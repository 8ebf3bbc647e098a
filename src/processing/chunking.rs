//! Sliding-window text chunking.
//!
//! The splitter is a fixed-size character window: every chunk holds at most `chunk_size`
//! characters and consecutive chunks share exactly `chunk_overlap` characters, so the same
//! input and settings always reproduce byte-identical boundaries. Windows are computed on
//! character boundaries, never mid-codepoint.

use super::types::ChunkingError;

/// Split text into overlapping fixed-size chunks.
///
/// Returns zero chunks for blank input; input shorter than `chunk_size` yields a single
/// chunk equal to the whole text.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<String>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if chunk_overlap >= chunk_size {
        return Err(ChunkingError::OverlapTooLarge {
            chunk_size,
            chunk_overlap,
        });
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    // boundaries[i] is the byte offset where character i starts.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
    boundaries.push(text.len());
    let char_count = boundaries.len() - 1;

    let step = chunk_size - chunk_overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_count {
            break;
        }
        start += step;
    }

    Ok(chunks)
}
