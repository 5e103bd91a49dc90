//! Immutable runtime configuration.
//!
//! The binary builds one [`SummarizerConfig`] at startup (from flags and the
//! environment) and hands clones of the relevant sections to each component.
//! Nothing in the core reads the process environment.

use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LANGSMITH_ENDPOINT: &str = "https://api.smith.langchain.com";
pub const MEBIBYTE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAi,
    Hashed,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "hashed" | "local" => Ok(Self::Hashed),
            other => Err(format!("unknown embedding provider {other:?} (openai, hashed)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Local,
    Qdrant,
}

impl FromStr for VectorBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(format!("unknown vector backend {other:?} (local, qdrant)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub request_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_backend: EmbeddingBackend::OpenAi,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_batch_size: 64,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2048,
            top_k: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub vector_backend: VectorBackend,
    pub vector_dir: PathBuf,
    pub qdrant_url: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            vector_backend: VectorBackend::Local,
            vector_dir: PathBuf::from("./data/vector_db"),
            qdrant_url: "http://localhost:6333".to_string(),
            upload_dir: PathBuf::from("./data/uploads"),
            max_upload_bytes: 10 * MEBIBYTE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub project: String,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_LANGSMITH_ENDPOINT.to_string(),
            api_key: None,
            project: "study-notes-summarizer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummarizerConfig {
    pub chunking: ChunkingConfig,
    pub providers: ProviderSettings,
    pub generation: GenerationSettings,
    pub storage: StorageSettings,
    pub monitoring: MonitoringSettings,
}

impl SummarizerConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        self.chunking
            .validate()
            .map_err(|error| ConfigError::Invalid {
                field: "CHUNK_SIZE/CHUNK_OVERLAP",
                reason: error.to_string(),
            })?;

        if self.generation.top_k == 0 {
            return Err(ConfigError::Invalid {
                field: "RETRIEVAL_TOP_K",
                reason: "must be at least 1".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::Invalid {
                field: "TEMPERATURE",
                reason: format!("{} is outside 0.0..=2.0", self.generation.temperature),
            });
        }

        if self.generation.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                field: "MAX_TOKENS",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.providers.embedding_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "EMBEDDING_BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "MAX_FILE_SIZE_MB",
                reason: "must be at least 1".to_string(),
            });
        }

        parse_url("OPENAI_BASE_URL", &self.providers.base_url)?;
        if self.storage.vector_backend == VectorBackend::Qdrant {
            parse_url("QDRANT_URL", &self.storage.qdrant_url)?;
        }

        if self.monitoring.enabled {
            parse_url("LANGCHAIN_ENDPOINT", &self.monitoring.endpoint)?;
            if self.monitoring.api_key.is_none() {
                return Err(ConfigError::Missing("LANGCHAIN_API_KEY"));
            }
        }

        Ok(self)
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::Url { field, source })
}
