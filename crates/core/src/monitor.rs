//! Best-effort run and feedback reporting.
//!
//! Reports go out on spawned tasks; a failed report is logged and dropped,
//! it never reaches the caller. Short-lived processes call [`Monitor::flush`]
//! before exiting so pending reports are not lost with the runtime.

use crate::config::MonitoringSettings;
use crate::error::MonitorError;
use crate::TokenUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_with::{serde_as, DurationMilliSeconds};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub latency: Duration,
    pub usage: TokenUsage,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
}

impl RunRecord {
    pub fn start(operation: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            operation: operation.into(),
            started_at: now,
            ended_at: now,
            latency: Duration::ZERO,
            usage: TokenUsage::default(),
            success: false,
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn succeed(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self.success = true;
        self.error = None;
        self.stop()
    }

    pub fn fail(mut self, error: &impl Display) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self.stop()
    }

    fn stop(mut self) -> Self {
        self.ended_at = Utc::now();
        self.latency = (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or_default();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub run_id: Uuid,
    pub score: f64,
    pub comment: Option<String>,
}

impl Feedback {
    pub fn new(run_id: Uuid, score: f64, comment: Option<String>) -> Result<Self, String> {
        if !(0.0..=1.0).contains(&score) {
            return Err(format!("feedback score {score} is outside 0.0..=1.0"));
        }
        Ok(Self {
            run_id,
            score,
            comment: comment.filter(|text| !text.trim().is_empty()),
        })
    }
}

#[async_trait]
pub trait RunTracer: Send + Sync {
    fn name(&self) -> &str;

    async fn report_run(&self, run: &RunRecord) -> Result<(), MonitorError>;

    async fn report_feedback(&self, feedback: &Feedback) -> Result<(), MonitorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

#[async_trait]
impl RunTracer for NoopTracer {
    fn name(&self) -> &str {
        "noop"
    }

    async fn report_run(&self, _run: &RunRecord) -> Result<(), MonitorError> {
        Ok(())
    }

    async fn report_feedback(&self, _feedback: &Feedback) -> Result<(), MonitorError> {
        Ok(())
    }
}

pub struct LangSmithTracer {
    client: Client,
    runs_url: Url,
    feedback_url: Url,
    api_key: String,
    project: String,
}

impl LangSmithTracer {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        project: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MonitorError> {
        let base = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))?;
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            runs_url: base.join("runs")?,
            feedback_url: base.join("feedback")?,
            api_key: api_key.into(),
            project: project.into(),
        })
    }

    fn run_payload(&self, run: &RunRecord) -> Value {
        json!({
            "id": run.run_id,
            "name": run.operation,
            "run_type": "chain",
            "start_time": run.started_at,
            "end_time": run.ended_at,
            "session_name": self.project,
            "inputs": run.metadata,
            "outputs": {
                "success": run.success,
                "latency_ms": run.latency.as_millis() as u64,
                "usage": run.usage,
            },
            "error": run.error,
            "extra": { "metadata": { "token_usage": run.usage } },
        })
    }

    async fn post(&self, what: &'static str, url: &Url, body: &Value) -> Result<(), MonitorError> {
        let response = self
            .client
            .post(url.clone())
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MonitorError::Rejected {
                what,
                status: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RunTracer for LangSmithTracer {
    fn name(&self) -> &str {
        "langsmith"
    }

    async fn report_run(&self, run: &RunRecord) -> Result<(), MonitorError> {
        self.post("run", &self.runs_url, &self.run_payload(run)).await
    }

    async fn report_feedback(&self, feedback: &Feedback) -> Result<(), MonitorError> {
        let body = json!({
            "run_id": feedback.run_id,
            "key": "user_rating",
            "score": feedback.score,
            "comment": feedback.comment,
        });
        self.post("feedback", &self.feedback_url, &body).await
    }
}

#[derive(Clone)]
pub struct Monitor {
    tracer: Arc<dyn RunTracer>,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl Monitor {
    pub fn new(tracer: Arc<dyn RunTracer>) -> Self {
        Self {
            tracer,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopTracer))
    }

    pub fn from_settings(
        settings: &MonitoringSettings,
        timeout: Duration,
    ) -> Result<Self, MonitorError> {
        match (settings.enabled, settings.api_key.as_deref()) {
            (true, Some(api_key)) => Ok(Self::new(Arc::new(LangSmithTracer::new(
                &settings.endpoint,
                api_key,
                settings.project.clone(),
                timeout,
            )?))),
            _ => Ok(Self::disabled()),
        }
    }

    pub fn tracer_name(&self) -> &str {
        self.tracer.name()
    }

    pub fn record_run(&self, run: RunRecord) {
        let tracer = Arc::clone(&self.tracer);
        self.spawn(async move {
            match tracer.report_run(&run).await {
                Ok(()) => debug!(run_id = %run.run_id, tracer = tracer.name(), "reported run"),
                Err(error) => warn!(
                    run_id = %run.run_id,
                    tracer = tracer.name(),
                    %error,
                    "failed to report run"
                ),
            }
        });
    }

    pub fn record_feedback(&self, feedback: Feedback) {
        let tracer = Arc::clone(&self.tracer);
        self.spawn(async move {
            match tracer.report_feedback(&feedback).await {
                Ok(()) => debug!(run_id = %feedback.run_id, "reported feedback"),
                Err(error) => warn!(
                    run_id = %feedback.run_id,
                    tracer = tracer.name(),
                    %error,
                    "failed to report feedback"
                ),
            }
        });
    }

    /// Waits up to `timeout` for every report sent so far. Returns `false` if
    /// some were still pending; those are abandoned.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let mut pending = match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if pending.is_empty() {
            return true;
        }

        let outstanding = pending.len();
        let drained = tokio::time::timeout(timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        match drained {
            Ok(()) => {
                debug!(reports = outstanding, "flushed monitoring reports");
                true
            }
            Err(_) => {
                warn!(
                    abandoned = pending.len(),
                    timeout_ms = timeout.as_millis() as u64,
                    "monitoring reports still pending at flush timeout"
                );
                false
            }
        }
    }

    fn spawn(&self, report: impl Future<Output = ()> + Send + 'static) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Reap finished reports so a long-running server does not accumulate them.
        while pending.try_join_next().is_some() {}
        pending.spawn(report);
    }
}
