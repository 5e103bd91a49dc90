use crate::chunking::{build_chunks, ChunkingConfig};
use crate::config::{GenerationSettings, SummarizerConfig};
use crate::extractor::extract_text;
use crate::ingest::{StoredUpload, UploadPolicy, UploadStore};
use crate::llm::{GenerationRequest, LanguageModel};
use crate::monitor::{Feedback, Monitor, RunRecord};
use crate::prompts::{canonical_query, custom_prompt, custom_query, question_prompt, summary_prompt};
use crate::store::VectorStore;
use crate::{
    CollectionInfo, DocumentFormat, DocumentRecord, IngestError, IngestReport, InsightFailure,
    Insights, SourceAttribution, SummarizerError, SummaryRequest, SummaryResult, SummaryType,
    Upload,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const INSIGHT_TYPES: [SummaryType; 3] = [
    SummaryType::KeyPoints,
    SummaryType::Methodology,
    SummaryType::Findings,
];

#[derive(Clone)]
pub struct Summarizer {
    chunking: ChunkingConfig,
    generation: GenerationSettings,
    policy: UploadPolicy,
    uploads: UploadStore,
    store: VectorStore,
    llm: Arc<dyn LanguageModel>,
    monitor: Monitor,
}

impl Summarizer {
    pub fn new(
        config: &SummarizerConfig,
        store: VectorStore,
        llm: Arc<dyn LanguageModel>,
        monitor: Monitor,
    ) -> Self {
        Self {
            chunking: config.chunking,
            generation: config.generation,
            policy: UploadPolicy::new(config.storage.max_upload_bytes),
            uploads: UploadStore::new(config.storage.upload_dir.clone()),
            store,
            llm,
            monitor,
        }
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// Validates, parses, chunks and indexes an upload. The stored copy is
    /// removed afterwards whatever the outcome.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestReport, SummarizerError> {
        let run = RunRecord::start("ingest")
            .with_metadata("filename", upload.filename.clone())
            .with_metadata("byte_size", upload.bytes.len() as u64);
        let run_id = run.run_id;

        let outcome = self.ingest_upload(&upload, run_id).await;
        let run = match &outcome {
            Ok(report) => run
                .with_metadata("document_id", report.document.document_id.clone())
                .with_metadata("chunk_count", report.chunk_count as u64)
                .succeed(Default::default()),
            Err(error) => run.with_metadata("stage", error.stage()).fail(error),
        };
        self.monitor.record_run(run);

        if let Err(error) = &outcome {
            warn!(filename = %upload.filename, stage = error.stage(), %error, "ingestion failed");
        }
        outcome
    }

    async fn ingest_upload(
        &self,
        upload: &Upload,
        run_id: Uuid,
    ) -> Result<IngestReport, SummarizerError> {
        let format = self.policy.check(upload)?;
        let document_id = Uuid::new_v4().to_string();
        let stored = self.uploads.save(upload, &document_id).await?;

        let result = self
            .process_stored(upload, format, &stored, document_id, run_id)
            .await;
        self.uploads.remove(&stored).await;
        result
    }

    async fn process_stored(
        &self,
        upload: &Upload,
        format: DocumentFormat,
        stored: &StoredUpload,
        document_id: String,
        run_id: Uuid,
    ) -> Result<IngestReport, SummarizerError> {
        let document = DocumentRecord {
            document_id,
            filename: upload.filename.clone(),
            byte_size: upload.bytes.len() as u64,
            format,
            checksum: stored.checksum.clone(),
            uploaded_at: Utc::now(),
        };

        let bytes = tokio::fs::read(&stored.path)
            .await
            .map_err(IngestError::from)?;
        let extracted = extract_text(&bytes, format, &document.filename)?;
        let chunks = build_chunks(&document, &extracted, self.chunking)?;
        let chunk_count = self.store.index(&document, &chunks).await?;

        info!(
            document_id = %document.document_id,
            filename = %document.filename,
            format = %format,
            pages = extracted.page_count(),
            chunk_count,
            "document ingested"
        );

        Ok(IngestReport {
            run_id,
            document,
            chunk_count,
        })
    }

    pub async fn summarize(
        &self,
        document_id: &str,
        summary_type: SummaryType,
        focus_areas: &[String],
    ) -> Result<SummaryResult, SummarizerError> {
        self.answer(
            document_id,
            SummaryRequest::Summary {
                summary_type,
                focus_areas: focus_areas.to_vec(),
            },
        )
        .await
    }

    pub async fn ask(
        &self,
        document_id: &str,
        question: &str,
    ) -> Result<SummaryResult, SummarizerError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SummarizerError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        self.answer(
            document_id,
            SummaryRequest::Question {
                question: question.to_string(),
            },
        )
        .await
    }

    pub async fn custom(
        &self,
        document_id: &str,
        purpose: &str,
        details: &[String],
        output_format: &str,
        query: Option<&str>,
    ) -> Result<SummaryResult, SummarizerError> {
        let purpose = purpose.trim();
        let output_format = output_format.trim();
        if purpose.is_empty() {
            return Err(SummarizerError::InvalidRequest(
                "purpose must not be empty".to_string(),
            ));
        }
        if output_format.is_empty() {
            return Err(SummarizerError::InvalidRequest(
                "output format must not be empty".to_string(),
            ));
        }
        self.answer(
            document_id,
            SummaryRequest::Custom {
                purpose: purpose.to_string(),
                details: details.to_vec(),
                output_format: output_format.to_string(),
                query: query
                    .map(str::trim)
                    .filter(|query| !query.is_empty())
                    .map(str::to_string),
            },
        )
        .await
    }

    pub async fn insights(&self, document_id: &str) -> Result<Insights, SummarizerError> {
        self.store.collection_info(document_id).await?;

        let mut insights = Insights {
            document_id: document_id.to_string(),
            summaries: Vec::new(),
            failures: Vec::new(),
        };
        for summary_type in INSIGHT_TYPES {
            match self.summarize(document_id, summary_type, &[]).await {
                Ok(summary) => insights.summaries.push(summary),
                Err(error) => {
                    warn!(document_id, %summary_type, %error, "insight generation failed");
                    insights.failures.push(InsightFailure {
                        summary_type,
                        stage: error.stage().to_string(),
                        error: error.to_string(),
                    });
                }
            }
        }
        Ok(insights)
    }

    pub async fn collection_info(&self, document_id: &str) -> Result<CollectionInfo, SummarizerError> {
        Ok(self.store.collection_info(document_id).await?)
    }

    pub async fn clear(&self, document_id: &str) -> Result<bool, SummarizerError> {
        let deleted = self.store.delete(document_id).await?;
        info!(document_id, deleted, "cleared document");
        Ok(deleted)
    }

    pub fn feedback(
        &self,
        run_id: Uuid,
        score: f64,
        comment: Option<String>,
    ) -> Result<(), SummarizerError> {
        let feedback =
            Feedback::new(run_id, score, comment).map_err(SummarizerError::InvalidRequest)?;
        self.monitor.record_feedback(feedback);
        Ok(())
    }

    pub async fn flush_reports(&self, timeout: Duration) -> bool {
        self.monitor.flush(timeout).await
    }

    async fn answer(
        &self,
        document_id: &str,
        request: SummaryRequest,
    ) -> Result<SummaryResult, SummarizerError> {
        let (operation, query) = match &request {
            SummaryRequest::Summary {
                summary_type,
                focus_areas,
            } => (
                format!("summarize:{summary_type}"),
                canonical_query(*summary_type, focus_areas),
            ),
            SummaryRequest::Question { question } => ("ask".to_string(), question.clone()),
            SummaryRequest::Custom {
                purpose,
                details,
                query,
                ..
            } => (
                "custom".to_string(),
                query
                    .clone()
                    .unwrap_or_else(|| custom_query(purpose, details)),
            ),
        };

        let run = RunRecord::start(operation)
            .with_metadata("document_id", document_id)
            .with_metadata("top_k", self.generation.top_k as u64)
            .with_metadata("model", self.llm.model());
        let run_id = run.run_id;

        let outcome = self.retrieve_and_generate(document_id, request, &query, run_id).await;
        let run = match &outcome {
            Ok(result) => run
                .with_metadata("source_count", result.sources.len() as u64)
                .succeed(result.usage),
            Err(error) => run.with_metadata("stage", error.stage()).fail(error),
        };
        self.monitor.record_run(run);
        outcome
    }

    async fn retrieve_and_generate(
        &self,
        document_id: &str,
        request: SummaryRequest,
        query: &str,
        run_id: Uuid,
    ) -> Result<SummaryResult, SummarizerError> {
        let passages = self
            .store
            .query(document_id, query, self.generation.top_k)
            .await?;

        let prompt = match &request {
            SummaryRequest::Summary {
                summary_type,
                focus_areas,
            } => summary_prompt(*summary_type, &passages, focus_areas),
            SummaryRequest::Question { question } => question_prompt(question, &passages),
            SummaryRequest::Custom {
                purpose,
                details,
                output_format,
                ..
            } => custom_prompt(purpose, details, output_format, &passages),
        };

        let generation = self
            .llm
            .generate(&GenerationRequest::new(
                prompt,
                self.generation.temperature,
                self.generation.max_tokens,
            ))
            .await?;

        info!(
            document_id,
            top_k = self.generation.top_k,
            sources = passages.len(),
            total_tokens = generation.usage.total_tokens,
            "generated response"
        );

        Ok(SummaryResult {
            run_id,
            document_id: document_id.to_string(),
            request,
            text: generation.text,
            sources: passages.iter().map(SourceAttribution::from).collect(),
            usage: generation.usage,
            generated_at: Utc::now(),
        })
    }
}
