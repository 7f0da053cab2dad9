//! Sentence-aware text chunker with overlap.
//!
//! Splits each document into [`Chunk`]s of at most `chunk_size` characters.
//! Boundaries are chosen in order of preference: paragraph breaks (`\n\n`),
//! sentence ends (`.`, `!`, `?` followed by whitespace), whitespace, and
//! finally a hard character cut. Each chunk after the first starts roughly
//! `chunk_overlap` characters before the end of its predecessor, snapped
//! forward to a word start.
//!
//! Chunks carry character offsets into the parent text, so consecutive
//! chunks of one document reconstruct the original (modulo whitespace
//! trimmed at chunk edges). Chunk ids are derived from the document id,
//! chunk index, and text, so re-chunking the same input is reproducible.

use sha2::{Digest, Sha256};

use crate::error::{QaError, Result};
use crate::models::{Chunk, Document};

/// Character-budgeted splitter. Construct with [`SentenceSplitter::new`].
#[derive(Debug, Clone, Copy)]
pub struct SentenceSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SentenceSplitter {
    /// # Errors
    ///
    /// [`QaError::Config`] if `chunk_size == 0` or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(QaError::config("chunk_size must be > 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(QaError::config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
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

    /// Split one document. Whitespace-only documents produce no chunks.
    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        let chars: Vec<char> = document.text.chars().collect();
        if chars.iter().all(|c| c.is_whitespace()) {
            return Vec::new();
        }

        let mut splits = Vec::new();
        split_range(&chars, 0, chars.len(), Level::Paragraph, self.chunk_size, &mut splits);

        merge_splits(&chars, &splits, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .filter_map(|(start, end)| trim_range(&chars, start, end))
            .enumerate()
            .map(|(index, (start, end))| {
                let text: String = chars[start..end].iter().collect();
                make_chunk(document, index, text, start, end)
            })
            .collect()
    }

    /// Split every document, preserving document order.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|doc| self.split_document(doc))
            .collect()
    }
}

/// Chunk a batch of documents. An empty batch yields an empty result.
pub fn chunk_documents(
    documents: &[Document],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>> {
    let splitter = SentenceSplitter::new(chunk_size, chunk_overlap)?;
    Ok(splitter.split_documents(documents))
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Paragraph,
    Sentence,
    Word,
    Hard,
}

impl Level {
    fn next(self) -> Level {
        match self {
            Level::Paragraph => Level::Sentence,
            Level::Sentence => Level::Word,
            Level::Word | Level::Hard => Level::Hard,
        }
    }
}

/// Recursively cut `[start, end)` into contiguous ranges of at most `max` chars.
fn split_range(
    chars: &[char],
    start: usize,
    end: usize,
    level: Level,
    max: usize,
    out: &mut Vec<(usize, usize)>,
) {
    if end - start <= max {
        out.push((start, end));
        return;
    }

    let cuts = match level {
        Level::Paragraph => paragraph_cuts(chars, start, end),
        Level::Sentence => sentence_cuts(chars, start, end),
        Level::Word => word_cuts(chars, start, end),
        Level::Hard => (start + max..end).step_by(max).collect(),
    };

    if cuts.is_empty() {
        split_range(chars, start, end, level.next(), max, out);
        return;
    }

    let mut piece_start = start;
    for cut in cuts.into_iter().chain(std::iter::once(end)) {
        split_range(chars, piece_start, cut, level.next(), max, out);
        piece_start = cut;
    }
}

/// End index of the whitespace run starting at `i`.
fn whitespace_run_end(chars: &[char], i: usize, end: usize) -> usize {
    let mut j = i;
    while j < end && chars[j].is_whitespace() {
        j += 1;
    }
    j
}

fn paragraph_cuts(chars: &[char], start: usize, end: usize) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut i = start;
    while i < end {
        if chars[i] == '\n' {
            let j = whitespace_run_end(chars, i, end);
            let newlines = chars[i..j].iter().filter(|c| **c == '\n').count();
            if newlines >= 2 && j < end {
                cuts.push(j);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    cuts
}

fn sentence_cuts(chars: &[char], start: usize, end: usize) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut i = start;
    while i < end {
        if matches!(chars[i], '.' | '!' | '?') && i + 1 < end && chars[i + 1].is_whitespace() {
            let j = whitespace_run_end(chars, i + 1, end);
            if j < end {
                cuts.push(j);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    cuts
}

fn word_cuts(chars: &[char], start: usize, end: usize) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut i = start;
    while i < end {
        if chars[i].is_whitespace() {
            let j = whitespace_run_end(chars, i, end);
            if j < end && i > start {
                cuts.push(j);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    cuts
}

/// First word start in `[from, limit)`, or `limit` if there is none.
fn snap_to_word_start(chars: &[char], from: usize, limit: usize) -> usize {
    (from..limit)
        .find(|&p| p > 0 && chars[p - 1].is_whitespace() && !chars[p].is_whitespace())
        .unwrap_or(limit)
}

/// Greedily pack splits into chunk ranges of at most `max` chars.
fn merge_splits(
    chars: &[char],
    splits: &[(usize, usize)],
    max: usize,
    overlap: usize,
) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let Some(&(first_start, _)) = splits.first() else {
        return ranges;
    };

    let mut chunk_start = first_start;
    let mut chunk_end = first_start;
    let mut has_new = false;
    let mut idx = 0;

    while idx < splits.len() {
        let (split_start, split_end) = splits[idx];
        if split_end - chunk_start <= max {
            chunk_end = split_end;
            has_new = true;
            idx += 1;
            continue;
        }

        if !has_new {
            // The carried-over overlap leaves no room for the next split; shrink it.
            let min_start = split_end.saturating_sub(max).max(chunk_start);
            chunk_start = snap_to_word_start(chars, min_start, split_start);
            continue;
        }

        ranges.push((chunk_start, chunk_end));
        chunk_start = if overlap == 0 {
            chunk_end
        } else {
            let target = chunk_end.saturating_sub(overlap).max(chunk_start);
            snap_to_word_start(chars, target, chunk_end)
        };
        has_new = false;
    }

    if has_new {
        ranges.push((chunk_start, chunk_end));
    }
    ranges
}

fn trim_range(chars: &[char], mut start: usize, mut end: usize) -> Option<(usize, usize)> {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start < end).then_some((start, end))
}

fn make_chunk(document: &Document, index: usize, text: String, start: usize, end: usize) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));

    let mut id_hasher = Sha256::new();
    id_hasher.update(document.id.as_bytes());
    id_hasher.update((index as u64).to_le_bytes());
    id_hasher.update(hash.as_bytes());
    let id = format!("{:x}", id_hasher.finalize())[..32].to_string();

    Chunk {
        id,
        document_id: document.id.clone(),
        chunk_index: index,
        text,
        metadata: document.metadata.clone(),
        start_char: start,
        end_char: end,
        hash,
    }
}
