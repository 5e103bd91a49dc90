mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use study_notes_core::config::{DEFAULT_LANGSMITH_ENDPOINT, DEFAULT_OPENAI_BASE_URL, MEBIBYTE};
use study_notes_core::{
    CharacterNgramEmbedder, ChunkingConfig, Embedder, EmbeddingBackend, GenerationSettings,
    LocalVectorStore, Monitor, MonitoringSettings, OpenAiChatModel, OpenAiEmbedder,
    ProviderSettings, QdrantStore, StorageSettings, Summarizer, SummarizerConfig, SummaryResult,
    SummaryType, Upload, VectorBackend, VectorIndex, VectorStore,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::server::{run_server, AppState, ServerConfig};

// Upper bound on how long a command waits for monitoring reports before exiting.
const REPORT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "study-notes",
    version,
    about = "Upload papers, then summarize or question them with retrieval-augmented prompts"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Args, Debug)]
struct Settings {
    /// API key for the OpenAI-compatible chat and embedding endpoints
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Chat model used for summaries and answers
    #[arg(long, env = "MODEL_NAME", default_value = "gpt-3.5-turbo")]
    model_name: String,

    #[arg(long, env = "TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    #[arg(long, env = "MAX_TOKENS", default_value_t = 2048)]
    max_tokens: u32,

    /// openai or hashed
    #[arg(long, env = "EMBEDDING_PROVIDER", default_value = "openai")]
    embedding_provider: EmbeddingBackend,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_BATCH_SIZE", default_value_t = 64)]
    embedding_batch_size: usize,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    request_timeout_secs: u64,

    /// Chunk length in characters
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Number of chunks retrieved per request
    #[arg(long, env = "RETRIEVAL_TOP_K", default_value_t = 6)]
    retrieval_top_k: usize,

    /// local or qdrant
    #[arg(long, env = "VECTOR_BACKEND", default_value = "local")]
    vector_backend: VectorBackend,

    #[arg(long, env = "VECTOR_DB_PATH", default_value = "./data/vector_db")]
    vector_db_path: PathBuf,

    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    #[arg(long, env = "UPLOAD_DIRECTORY", default_value = "./data/uploads")]
    upload_directory: PathBuf,

    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 10)]
    max_file_size_mb: u64,

    /// Report runs and feedback to LangSmith
    #[arg(long, env = "LANGCHAIN_TRACING_V2", default_value_t = false, action = ArgAction::Set)]
    langchain_tracing_v2: bool,

    #[arg(long, env = "LANGCHAIN_ENDPOINT", default_value = DEFAULT_LANGSMITH_ENDPOINT)]
    langchain_endpoint: String,

    #[arg(long, env = "LANGCHAIN_API_KEY", hide_env_values = true)]
    langchain_api_key: Option<String>,

    #[arg(long, env = "LANGCHAIN_PROJECT", default_value = "study-notes-summarizer")]
    langchain_project: String,

    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1")]
    bind_address: String,

    #[arg(long, env = "PORT", default_value_t = 8501)]
    port: u16,
}

impl Settings {
    fn to_config(&self) -> anyhow::Result<SummarizerConfig> {
        let config = SummarizerConfig {
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            },
            providers: ProviderSettings {
                api_key: self.openai_api_key.clone().filter(|key| !key.is_empty()),
                base_url: self.openai_base_url.clone(),
                chat_model: self.model_name.clone(),
                embedding_backend: self.embedding_provider,
                embedding_model: self.embedding_model.clone(),
                embedding_batch_size: self.embedding_batch_size,
                request_timeout: Duration::from_secs(self.request_timeout_secs),
            },
            generation: GenerationSettings {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                top_k: self.retrieval_top_k,
            },
            storage: StorageSettings {
                vector_backend: self.vector_backend,
                vector_dir: self.vector_db_path.clone(),
                qdrant_url: self.qdrant_url.clone(),
                upload_dir: self.upload_directory.clone(),
                max_upload_bytes: self.max_file_size_mb.saturating_mul(MEBIBYTE),
            },
            monitoring: MonitoringSettings {
                enabled: self.langchain_tracing_v2,
                endpoint: self.langchain_endpoint.clone(),
                api_key: self.langchain_api_key.clone().filter(|key| !key.is_empty()),
                project: self.langchain_project.clone(),
            },
        };
        Ok(config.validate()?)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Serve the web UI and JSON API.
    Serve,
    /// Parse, chunk and index a local file; prints the document id.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Summarize an indexed document.
    Summarize {
        #[arg(long)]
        document: String,
        /// comprehensive, key_points, methodology or findings
        #[arg(long, default_value = "comprehensive")]
        summary_type: SummaryType,
        /// Aspect to emphasize; repeat for several.
        #[arg(long = "focus")]
        focus: Vec<String>,
    },
    /// Ask a question about an indexed document.
    Ask {
        #[arg(long)]
        document: String,
        #[arg(long)]
        question: String,
    },
    /// Answer a hand-written purpose / details / output-format prompt.
    Custom {
        #[arg(long)]
        document: String,
        #[arg(long)]
        purpose: String,
        /// Instruction line; repeat for several.
        #[arg(long = "detail")]
        details: Vec<String>,
        #[arg(long)]
        output_format: String,
        /// Retrieval query; defaults to the purpose and details.
        #[arg(long)]
        query: Option<String>,
    },
    /// Key points, methodology and findings in one go.
    Insights {
        #[arg(long)]
        document: String,
    },
    /// Show what is indexed for a document.
    Info {
        #[arg(long)]
        document: String,
    },
    /// Delete a document's index.
    Clear {
        #[arg(long)]
        document: String,
    },
    /// Remove stale files from the upload directory.
    PurgeUploads {
        #[arg(long, default_value_t = 7)]
        days: u64,
    },
}

fn build_summarizer(config: &SummarizerConfig) -> anyhow::Result<Summarizer> {
    let providers = &config.providers;
    let timeout = providers.request_timeout;

    let embedder: Arc<dyn Embedder> = match providers.embedding_backend {
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(
            &providers.base_url,
            providers.api_key.clone(),
            providers.embedding_model.clone(),
            timeout,
        )?),
        EmbeddingBackend::Hashed => Arc::new(CharacterNgramEmbedder::default()),
    };

    let index: Arc<dyn VectorIndex> = match config.storage.vector_backend {
        VectorBackend::Local => Arc::new(LocalVectorStore::new(&config.storage.vector_dir)),
        VectorBackend::Qdrant => Arc::new(QdrantStore::new(&config.storage.qdrant_url, timeout)?),
    };

    let llm = Arc::new(OpenAiChatModel::new(
        &providers.base_url,
        providers.api_key.clone(),
        providers.chat_model.clone(),
        timeout,
    )?);
    let monitor = Monitor::from_settings(&config.monitoring, timeout)?;

    info!(
        embedder = embedder.provider(),
        index = index.backend(),
        model = %providers.chat_model,
        tracer = monitor.tracer_name(),
        "pipeline configured"
    );

    let store = VectorStore::new(embedder, index, providers.embedding_batch_size);
    Ok(Summarizer::new(config, store, llm, monitor))
}

fn print_result(result: &SummaryResult) {
    println!("{}", result.text);
    println!();
    for source in &result.sources {
        match source.page {
            Some(page) => println!(
                "[excerpt {} page {}] score={:.4} {}",
                source.sequence, page, source.score, source.preview
            ),
            None => println!(
                "[excerpt {}] score={:.4} {}",
                source.sequence, source.score, source.preview
            ),
        }
    }
    println!(
        "run_id={} tokens={} (prompt {}, completion {})",
        result.run_id,
        result.usage.total_tokens,
        result.usage.prompt_tokens,
        result.usage.completion_tokens
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_timer(fmt::time::UtcTime::rfc_3339()))
        .init();

    let cli = Cli::parse();
    let config = cli.settings.to_config()?;
    let summarizer = Arc::new(build_summarizer(&config)?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "study-notes boot"
    );

    let outcome = run_command(cli.command, &cli.settings, &config, &summarizer).await;
    summarizer.flush_reports(REPORT_FLUSH_TIMEOUT).await;
    outcome
}

async fn run_command(
    command: Command,
    settings: &Settings,
    config: &SummarizerConfig,
    summarizer: &Arc<Summarizer>,
) -> anyhow::Result<()> {
    match command {
        Command::Serve => {
            let state = AppState {
                summarizer: Arc::clone(summarizer),
                max_upload_bytes: config.storage.max_upload_bytes,
            };
            run_server(
                state,
                ServerConfig {
                    host: settings.bind_address.clone(),
                    port: settings.port,
                },
            )
            .await?;
        }
        Command::Ingest { file } => {
            let filename = file
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .with_context(|| format!("{} has no usable file name", file.display()))?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;

            let report = summarizer.ingest(Upload { filename, bytes }).await?;
            println!(
                "document_id={} chunks={} file={} run_id={}",
                report.document.document_id,
                report.chunk_count,
                report.document.filename,
                report.run_id
            );
        }
        Command::Summarize {
            document,
            summary_type,
            focus,
        } => {
            let result = summarizer.summarize(&document, summary_type, &focus).await?;
            print_result(&result);
        }
        Command::Ask { document, question } => {
            let result = summarizer.ask(&document, &question).await?;
            print_result(&result);
        }
        Command::Custom {
            document,
            purpose,
            details,
            output_format,
            query,
        } => {
            let result = summarizer
                .custom(&document, &purpose, &details, &output_format, query.as_deref())
                .await?;
            print_result(&result);
        }
        Command::Insights { document } => {
            let insights = summarizer.insights(&document).await?;
            for summary in &insights.summaries {
                print_result(summary);
                println!();
            }
            for failure in &insights.failures {
                println!(
                    "{} failed during {}: {}",
                    failure.summary_type, failure.stage, failure.error
                );
            }
        }
        Command::Info { document } => {
            let info = summarizer.collection_info(&document).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Clear { document } => {
            if summarizer.clear(&document).await? {
                println!("cleared {document}");
            } else {
                println!("nothing indexed for {document}");
            }
        }
        Command::PurgeUploads { days } => {
            let uploads = summarizer.uploads();
            let deleted = uploads.purge_older_than(Duration::from_secs(days * 24 * 60 * 60))?;
            let stats = uploads.stats()?;
            println!(
                "deleted {deleted} file(s); {} remaining, {} bytes in {}",
                stats.file_count,
                stats.total_bytes,
                stats.directory.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_a_validated_config() {
        let cli = Cli::try_parse_from([
            "study-notes",
            "--chunk-size",
            "500",
            "--chunk-overlap",
            "50",
            "--embedding-provider",
            "hashed",
            "--max-file-size-mb",
            "2",
            "--langchain-tracing-v2",
            "false",
            "summarize",
            "--document",
            "doc",
            "--summary-type",
            "key-points",
            "--focus",
            "datasets",
            "--focus",
            "metrics",
        ])
        .unwrap();

        let config = cli.settings.to_config().unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.providers.embedding_backend, EmbeddingBackend::Hashed);
        assert_eq!(config.storage.max_upload_bytes, 2 * MEBIBYTE);
        assert!(!config.monitoring.enabled);

        match cli.command {
            Command::Summarize {
                summary_type,
                focus,
                ..
            } => {
                assert_eq!(summary_type, SummaryType::KeyPoints);
                assert_eq!(focus, vec!["datasets", "metrics"]);
            }
            _ => panic!("expected summarize"),
        }
    }

    #[test]
    fn custom_command_collects_repeated_details() {
        let cli = Cli::try_parse_from([
            "study-notes",
            "custom",
            "--document",
            "doc",
            "--purpose",
            "List the datasets.",
            "--detail",
            "One per line",
            "--detail",
            "Include sizes",
            "--output-format",
            "- [dataset]",
        ])
        .unwrap();

        match cli.command {
            Command::Custom { details, query, .. } => {
                assert_eq!(details, vec!["One per line", "Include sizes"]);
                assert_eq!(query, None);
            }
            _ => panic!("expected custom"),
        }
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let cli = Cli::try_parse_from([
            "study-notes",
            "--chunk-size",
            "100",
            "--chunk-overlap",
            "100",
            "serve",
        ])
        .unwrap();
        assert!(cli.settings.to_config().is_err());
    }

    #[test]
    fn hashed_embeddings_build_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SummarizerConfig::default();
        config.providers.embedding_backend = EmbeddingBackend::Hashed;
        config.storage.vector_dir = dir.path().join("vectors");
        config.storage.upload_dir = dir.path().join("uploads");

        let summarizer = build_summarizer(&config).unwrap();
        assert_eq!(summarizer.model(), "gpt-3.5-turbo");
    }
}
