pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod prompts;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, window_offsets, ChunkingConfig};
pub use config::{
    EmbeddingBackend, GenerationSettings, MonitoringSettings, ProviderSettings, StorageSettings,
    SummarizerConfig, VectorBackend,
};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ConfigError, GenerationError, IngestError, MonitorError, SearchError, SummarizerError,
};
pub use extractor::{extract_text, ExtractedText, PageText, TextExtractor};
pub use ingest::{StorageStats, UploadPolicy, UploadStore};
pub use llm::{Generation, GenerationRequest, LanguageModel, OpenAiChatModel};
pub use models::{
    Chunk, CollectionInfo, DocumentFormat, DocumentRecord, EmbeddingRecord, IngestReport,
    InsightFailure, Insights, ScoredChunk, SourceAttribution, SummaryRequest, SummaryResult,
    SummaryType, TokenUsage, Upload,
};
pub use monitor::{Feedback, LangSmithTracer, Monitor, NoopTracer, RunRecord, RunTracer};
pub use orchestrator::Summarizer;
pub use store::VectorStore;
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::VectorIndex;
