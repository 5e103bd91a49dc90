use crate::error::IngestError;
use crate::extractor::ExtractedText;
use crate::models::{Chunk, DocumentRecord};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub overlap: usize,
}

pub fn window_offsets(char_len: usize, config: ChunkingConfig) -> Result<Vec<Window>, IngestError> {
    config.validate()?;

    let mut windows = Vec::new();
    let mut start: usize = 0;
    let mut previous_end: usize = 0;

    while start < char_len {
        let end = (start + config.chunk_size).min(char_len);
        windows.push(Window {
            start,
            end,
            overlap: previous_end.saturating_sub(start),
        });
        if end == char_len {
            break;
        }
        previous_end = end;
        start = start.saturating_add(config.step());
    }

    Ok(windows)
}

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn build_chunks(
    document: &DocumentRecord,
    extracted: &ExtractedText,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let chars: Vec<char> = extracted.text.chars().collect();
    let windows = window_offsets(chars.len(), config)?;

    let chunks = windows
        .into_iter()
        .enumerate()
        .map(|(index, window)| {
            let text: String = chars[window.start..window.end].iter().collect();
            let sequence = index as u64;
            Chunk {
                chunk_id: make_chunk_id(&document.document_id, sequence, &text),
                document_id: document.document_id.clone(),
                source: document.filename.clone(),
                page: extracted.page_at(window.start),
                sequence,
                char_start: window.start,
                char_end: window.end,
                overlap: window.overlap,
                text,
            }
        })
        .collect();

    Ok(chunks)
}

fn make_chunk_id(document_id: &str, sequence: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
