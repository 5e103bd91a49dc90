use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use study_notes_core::{
    CollectionInfo, GenerationError, IngestError, IngestReport, Insights, SearchError,
    Summarizer, SummarizerError, SummaryResult, SummaryType, Upload,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub summarizer: Arc<Summarizer>,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

pub fn app_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/documents", post(upload_document))
        .route(
            "/api/documents/{id}",
            get(document_info).delete(delete_document),
        )
        .route("/api/documents/{id}/summary", post(summarize))
        .route("/api/documents/{id}/insights", post(insights))
        .route("/api/documents/{id}/ask", post(ask))
        .route("/api/documents/{id}/custom", post(custom))
        .route("/api/runs/{run_id}/feedback", post(feedback))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("study-notes listening on http://{}", addr);

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                error!(%error, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await?;
    Ok(())
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    stage: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            stage,
            message: message.into(),
        }
    }

    // A body over the router limit never reaches `UploadPolicy`, so name the limit here.
    fn multipart(error: MultipartError, limit: u64) -> Self {
        let status = error.status();
        let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
            format!("upload is above the {limit} byte upload limit")
        } else {
            error.body_text()
        };
        Self {
            status,
            stage: "ingestion",
            message,
        }
    }
}

fn status_for(error: &SummarizerError) -> StatusCode {
    match error {
        SummarizerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SummarizerError::Ingest(error) => match error {
            IngestError::UnsupportedFormat { .. } | IngestError::InvalidChunkConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            IngestError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::Parse { .. } | IngestError::EmptyDocument(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            IngestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        SummarizerError::Retrieval(error) => match error {
            SearchError::IndexNotFound(_) => StatusCode::NOT_FOUND,
            SearchError::CollectionExists(_) => StatusCode::CONFLICT,
            SearchError::Request(_) => StatusCode::BAD_REQUEST,
            SearchError::Http(error) if error.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            SearchError::EmbeddingService { .. }
            | SearchError::BackendResponse { .. }
            | SearchError::Http(_) => StatusCode::BAD_GATEWAY,
            SearchError::Url(_) | SearchError::Serialization(_) | SearchError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
        SummarizerError::Generation(error) => match error {
            GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GenerationError::Provider { .. } | GenerationError::EmptyCompletion => {
                StatusCode::BAD_GATEWAY
            }
            GenerationError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl From<SummarizerError> for ApiError {
    fn from(error: SummarizerError) -> Self {
        Self {
            status: status_for(&error),
            stage: error.stage(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "stage": self.stage, "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SummaryBody {
    summary_type: SummaryType,
    #[serde(default)]
    focus_areas: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AskBody {
    question: String,
}

#[derive(Debug, Deserialize)]
struct CustomBody {
    purpose: String,
    #[serde(default)]
    details: Vec<String>,
    output_format: String,
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedbackBody {
    score: f64,
    #[serde(default)]
    comment: Option<String>,
}

async fn index() -> impl IntoResponse {
    Html(include_str!("../ui/index.html"))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "study-notes",
        "model": state.summarizer.model(),
    }))
}

async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, ApiError> {
    let limit = state.max_upload_bytes;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::multipart(error, limit))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("ingestion", "file field has no filename"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::multipart(error, limit))?;

        let report = state
            .summarizer
            .ingest(Upload {
                filename,
                bytes: bytes.to_vec(),
            })
            .await?;
        return Ok(Json(report));
    }
    Err(ApiError::bad_request(
        "ingestion",
        "multipart field \"file\" is missing",
    ))
}

async fn document_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CollectionInfo>, ApiError> {
    Ok(Json(state.summarizer.collection_info(&id).await?))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.summarizer.clear(&id).await?;
    Ok(Json(json!({ "document_id": id, "deleted": deleted })))
}

async fn summarize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SummaryBody>,
) -> Result<Json<SummaryResult>, ApiError> {
    Ok(Json(
        state
            .summarizer
            .summarize(&id, body.summary_type, &body.focus_areas)
            .await?,
    ))
}

async fn insights(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Insights>, ApiError> {
    Ok(Json(state.summarizer.insights(&id).await?))
}

async fn ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AskBody>,
) -> Result<Json<SummaryResult>, ApiError> {
    Ok(Json(state.summarizer.ask(&id, &body.question).await?))
}

async fn custom(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CustomBody>,
) -> Result<Json<SummaryResult>, ApiError> {
    Ok(Json(
        state
            .summarizer
            .custom(
                &id,
                &body.purpose,
                &body.details,
                &body.output_format,
                body.query.as_deref(),
            )
            .await?,
    ))
}

async fn feedback(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(body): Json<FeedbackBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.summarizer.feedback(run_id, body.score, body.comment)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "status": "accepted" })),
    ))
}
