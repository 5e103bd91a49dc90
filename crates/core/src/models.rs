use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
    Markdown,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Result<Self, IngestError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        Self::from_extension(extension).ok_or_else(|| IngestError::UnsupportedFormat {
            extension: extension.to_string(),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "txt",
            Self::Markdown => "md",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    pub byte_size: u64,
    pub format: DocumentFormat,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

// Offsets count characters, not bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub page: Option<u32>,
    pub sequence: u64,
    pub char_start: usize,
    pub char_end: usize,
    pub overlap: usize,
    pub text: String,
}

impl Chunk {
    pub fn preview(&self) -> String {
        if self.text.chars().count() > PREVIEW_CHARS {
            let head: String = self.text.chars().take(PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.text.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SummaryType {
    Comprehensive,
    KeyPoints,
    Methodology,
    Findings,
}

impl SummaryType {
    pub const ALL: [SummaryType; 4] = [
        SummaryType::Comprehensive,
        SummaryType::KeyPoints,
        SummaryType::Methodology,
        SummaryType::Findings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comprehensive => "comprehensive",
            Self::KeyPoints => "key_points",
            Self::Methodology => "methodology",
            Self::Findings => "findings",
        }
    }
}

impl fmt::Display for SummaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown summary type {value:?}; expected one of comprehensive, key_points, methodology, findings"
                )
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryRequest {
    Summary {
        summary_type: SummaryType,
        focus_areas: Vec<String>,
    },
    Question {
        question: String,
    },
    Custom {
        purpose: String,
        details: Vec<String>,
        output_format: String,
        query: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAttribution {
    pub chunk_id: String,
    pub sequence: u64,
    pub page: Option<u32>,
    pub score: f64,
    pub preview: String,
}

impl From<&ScoredChunk> for SourceAttribution {
    fn from(value: &ScoredChunk) -> Self {
        Self {
            chunk_id: value.chunk.chunk_id.clone(),
            sequence: value.chunk.sequence,
            page: value.chunk.page,
            score: value.score,
            preview: value.chunk.preview(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResult {
    pub run_id: Uuid,
    pub document_id: String,
    pub request: SummaryRequest,
    pub text: String,
    pub sources: Vec<SourceAttribution>,
    pub usage: TokenUsage,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightFailure {
    pub summary_type: SummaryType,
    pub stage: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insights {
    pub document_id: String,
    pub summaries: Vec<SummaryResult>,
    pub failures: Vec<InsightFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub collection: String,
    pub document: Option<DocumentRecord>,
    pub record_count: u64,
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub document: DocumentRecord,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}
