use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file format: {extension:?} (accepted: pdf, docx, txt, md)")]
    UnsupportedFormat { extension: String },

    #[error("file is {size} bytes, above the {limit} byte upload limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("failed to parse {format} document: {details}")]
    Parse { format: String, details: String },

    #[error("document contains no extractable text: {0}")]
    EmptyDocument(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

impl IngestError {
    pub(crate) fn parse(format: impl ToString, details: impl ToString) -> Self {
        Self::Parse {
            format: format.to_string(),
            details: details.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("embedding service {provider} failed: {details}")]
    EmbeddingService { provider: String, details: String },

    #[error("no index found for collection {0}")]
    IndexNotFound(String),

    #[error("collection {0} already exists and cannot be rewritten")]
    CollectionExists(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("llm provider {provider} failed: {details}")]
    Provider { provider: String, details: String },

    #[error("llm request timed out after {0} seconds")]
    Timeout(u64),

    #[error("llm returned an empty completion")]
    EmptyCompletion,

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracing endpoint rejected {what}: {status}")]
    Rejected { what: &'static str, status: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("url parse error for {field}: {source}")]
    Url {
        field: &'static str,
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Retrieval(#[from] SearchError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SummarizerError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Ingest(_) => "ingestion",
            Self::Retrieval(_) => "retrieval",
            Self::Generation(_) => "generation",
            Self::InvalidRequest(_) => "request",
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
