//! Processes one claimed intake end to end.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use pulse_core::{
    ContentStore, CreateMemoryRequest, Error, Intake, IntakeRepository, IntakeStatus,
    PipelineConfig, Result, RetryDecision, RetryPolicy, StatusUpdate,
};
use pulse_db::download_verified;
use pulse_graph::{KnowledgeGraphBuilder, TopicSummarizer};

use crate::extraction::ExtractionEngine;
use crate::services::ServiceProvider;

/// Shutdown notification checked between pipeline steps.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Sender and signal pair; sending `true` cancels.
    pub fn channel() -> (watch::Sender<bool>, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// What happened to an intake.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Memory written, intake `done`.
    Completed { memory_id: Uuid },
    /// Back to `ready` with backoff.
    RetryScheduled {
        attempts: i32,
        next_retry_at: DateTime<Utc>,
        error: String,
    },
    /// Attempts exhausted, intake `failed_max_attempts`.
    Failed { attempts: i32, error: String },
    /// Stopped by shutdown and returned to `ready`.
    Interrupted,
    /// The outcome could not be recorded; the intake is left `processing`
    /// for the stale-lease janitor.
    Unrecorded { error: String },
}

enum Step {
    Done(Uuid),
    Cancelled,
}

/// Runs download, extraction, graph merge, topic summaries and completion
/// for one claimed intake.
///
/// Every step failure is turned into a retry decision; nothing escapes to
/// the scheduler.
pub struct IntakeProcessor {
    intakes: Arc<dyn IntakeRepository>,
    content: Arc<dyn ContentStore>,
    services: Arc<dyn ServiceProvider>,
    config: PipelineConfig,
    retry: RetryPolicy,
}

impl IntakeProcessor {
    pub fn new(
        intakes: Arc<dyn IntakeRepository>,
        content: Arc<dyn ContentStore>,
        services: Arc<dyn ServiceProvider>,
    ) -> Self {
        Self {
            intakes,
            content,
            services,
            config: PipelineConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Process an intake that this worker has already claimed.
    #[instrument(skip(self, intake, cancel), fields(subsystem = "jobs", component = "processor", op = "process", intake_id = %intake.id, org_id = %intake.org_id, attempt = intake.attempts))]
    pub async fn process(&self, intake: &Intake, cancel: &CancelSignal) -> ProcessOutcome {
        let start = Instant::now();
        match self.run_pipeline(intake, cancel).await {
            Ok(Step::Done(memory_id)) => {
                info!(
                    memory_id = %memory_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Intake processed"
                );
                ProcessOutcome::Completed { memory_id }
            }
            Ok(Step::Cancelled) => self.release(intake).await,
            Err(e) => {
                warn!(
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Intake processing failed"
                );
                self.record_failure(intake, &e.to_string()).await
            }
        }
    }

    /// Record a failed attempt and report the resulting decision.
    pub async fn record_failure(&self, intake: &Intake, error: &str) -> ProcessOutcome {
        match self
            .intakes
            .schedule_retry(
                intake.id,
                intake.attempts,
                error,
                self.retry.max_attempts,
                self.retry.base_delay_secs,
            )
            .await
        {
            Ok(RetryDecision::Retry {
                attempts,
                delay_secs,
                next_retry_at,
            }) => {
                info!(
                    intake_id = %intake.id,
                    attempts,
                    delay_secs,
                    next_retry_at = %next_retry_at,
                    "Intake retry scheduled"
                );
                ProcessOutcome::RetryScheduled {
                    attempts,
                    next_retry_at,
                    error: error.to_string(),
                }
            }
            Ok(RetryDecision::Exhausted { attempts, error }) => {
                error!(
                    intake_id = %intake.id,
                    attempts,
                    error = %error,
                    "Intake failed permanently"
                );
                ProcessOutcome::Failed { attempts, error }
            }
            Err(e) => {
                error!(intake_id = %intake.id, error = %e, "Failed to record intake failure");
                ProcessOutcome::Unrecorded {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Return an interrupted intake to `ready` without spending an attempt.
    pub async fn release(&self, intake: &Intake) -> ProcessOutcome {
        let update = StatusUpdate {
            next_retry_at: Some(Utc::now()),
            ..Default::default()
        };
        match self
            .intakes
            .update_status(intake.id, IntakeStatus::Ready, update)
            .await
        {
            Ok(()) => {
                info!(intake_id = %intake.id, "Intake interrupted by shutdown, returned to ready");
                ProcessOutcome::Interrupted
            }
            Err(e) => {
                error!(intake_id = %intake.id, error = %e, "Failed to release interrupted intake");
                ProcessOutcome::Unrecorded {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_pipeline(&self, intake: &Intake, cancel: &CancelSignal) -> Result<Step> {
        let services = self.services.services_for(&intake.org_id).await?;

        let bytes = download_verified(self.content.as_ref(), intake).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::InvalidInput(format!("content is not valid UTF-8: {}", e)))?;
        if cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        let extraction = ExtractionEngine::new(services.llm.clone(), self.config.clone())
            .extract(&text)
            .await?;
        if cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        let mut builder = KnowledgeGraphBuilder::new(services.graph.clone())
            .with_overflow_threshold(self.config.topic_overflow_threshold);
        let merged = builder.merge_entities(&extraction.entities).await?;
        let linked = builder.merge_relationships(&extraction.relationships).await?;
        if cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        let report = TopicSummarizer::new(
            services.graph.clone(),
            services.llm.clone(),
            services.vectors.clone(),
        )
        .with_temperature(self.config.summary_temperature)
        .summarize_topics(&builder.touched_topics())
        .await;
        if !report.failed.is_empty() {
            warn!(
                failed = report.failed.len(),
                summarized = report.summarized.len(),
                "Some topic summaries failed"
            );
        }

        let mut metadata = extraction.metadata;
        if let Some(obj) = metadata.as_object_mut() {
            if let Some(stats) = obj
                .get_mut("processing_stats")
                .and_then(|s| s.as_object_mut())
            {
                stats.insert("content_length".into(), json!(text.len()));
                stats.insert("processing_attempts".into(), json!(intake.attempts + 1));
                stats.insert("storage_path".into(), json!(intake.storage_path));
                stats.insert("checksum".into(), json!(intake.checksum));
                stats.insert("relationships_skipped".into(), json!(linked.skipped));
            }
            obj.insert("topic_overflow".into(), json!(merged.topic_overflow));
            obj.insert("overflowed_topics".into(), json!(merged.overflowed_topics));
            obj.insert("topics_summarized".into(), json!(report.summarized));
            obj.insert("records_indexed".into(), json!(report.records_indexed));
        }

        let memory_id = self
            .intakes
            .complete(
                intake.id,
                CreateMemoryRequest {
                    intake_id: intake.id,
                    org_id: intake.org_id.clone(),
                    title: extraction.title,
                    summary: extraction.summary,
                    metadata,
                },
            )
            .await?;
        Ok(Step::Done(memory_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_signal_fires_once_sent() {
        let (tx, signal) = CancelSignal::channel();
        assert!(!signal.is_cancelled());
        tx.send(true).unwrap();
        assert!(signal.is_cancelled());
        assert!(signal.clone().is_cancelled());
    }

    #[test]
    fn never_signal_stays_clear() {
        assert!(!CancelSignal::never().is_cancelled());
    }
}
