//! Intake worker: polling loop, bounded concurrency and graceful shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use pulse_core::{defaults, Error, Intake, IntakeRepository, IntakeStats, IntakeStatus, Result};

use crate::processor::{CancelSignal, IntakeProcessor, ProcessOutcome};

const STALE_LEASE_ERROR: &str = "stale processing lease expired";

// `interval` panics on a zero period.
const MIN_TICK: Duration = Duration::from_millis(10);

fn env_secs(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

/// Configuration for the intake worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether to process intakes at all.
    pub enabled: bool,
    /// Sleep between polls when nothing was dispatched.
    pub poll_interval: Duration,
    /// Maximum number of intakes processed at once.
    pub max_concurrent_jobs: usize,
    /// How often queue statistics are logged.
    pub stats_log_interval: Duration,
    /// Age after which a `processing` intake is considered abandoned.
    /// `None` disables the janitor.
    pub stale_after: Option<Duration>,
    /// How often the janitor looks for abandoned intakes.
    pub janitor_interval: Duration,
    /// Upper bound on one processor run.
    pub job_timeout: Duration,
    /// How long running jobs get to finish after shutdown.
    pub shutdown_grace: Duration,
    /// Re-check interval while at capacity.
    pub capacity_wait: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(defaults::WORKER_POLL_INTERVAL_SECS),
            max_concurrent_jobs: defaults::WORKER_MAX_CONCURRENT,
            stats_log_interval: Duration::from_secs(defaults::WORKER_STATS_LOG_INTERVAL_SECS),
            stale_after: None,
            janitor_interval: Duration::from_secs(defaults::WORKER_JANITOR_INTERVAL_SECS),
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(defaults::WORKER_SHUTDOWN_GRACE_SECS),
            capacity_wait: Duration::from_secs(defaults::WORKER_CAPACITY_WAIT_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable intake processing |
    /// | `WORKER_POLL_INTERVAL_SECS` | `30` | Polling interval when idle |
    /// | `WORKER_MAX_CONCURRENT_JOBS` | `3` | Max concurrent intakes |
    /// | `WORKER_STATS_LOG_INTERVAL_SECS` | `300` | Statistics log interval |
    /// | `WORKER_STALE_AFTER_SECS` | unset | Janitor staleness threshold |
    /// | `WORKER_JOB_TIMEOUT_SECS` | `300` | Per-intake timeout |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("WORKER_MAX_CONCURRENT_JOBS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.max_concurrent_jobs)
            .max(1);

        Self {
            enabled,
            max_concurrent_jobs,
            poll_interval: env_secs("WORKER_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            stats_log_interval: env_secs("WORKER_STATS_LOG_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.stats_log_interval),
            stale_after: env_secs("WORKER_STALE_AFTER_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            ..defaults
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_stats_log_interval(mut self, interval: Duration) -> Self {
        self.stats_log_interval = interval;
        self
    }

    /// Enable the janitor. See [`WorkerConfig::stale_cutoff`] for the age
    /// actually applied.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_capacity_wait(mut self, wait: Duration) -> Self {
        self.capacity_wait = wait;
        self
    }

    /// Age at which the janitor requeues a `processing` intake.
    ///
    /// Never less than `job_timeout + capacity_wait`, so a job still running
    /// within its timeout is not requeued.
    pub fn stale_cutoff(&self) -> Option<Duration> {
        self.stale_after
            .map(|stale| stale.max(self.job_timeout + self.capacity_wait))
    }
}

/// Event emitted by the intake worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// An intake was claimed and handed to the processor.
    IntakeClaimed { intake_id: Uuid, org_id: String },
    /// An intake produced its memory.
    IntakeCompleted { intake_id: Uuid, memory_id: Uuid },
    /// A failed intake was requeued with backoff.
    RetryScheduled {
        intake_id: Uuid,
        attempts: i32,
        next_retry_at: DateTime<Utc>,
        error: String,
    },
    /// An intake ran out of attempts.
    FailedPermanently {
        intake_id: Uuid,
        attempts: i32,
        error: String,
    },
    /// An intake was interrupted by shutdown and returned to `ready`.
    IntakeInterrupted { intake_id: Uuid },
    /// Worker stopped.
    WorkerStopped,
}

/// Point-in-time worker report.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub running: bool,
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub active_jobs: usize,
    pub stats: IntakeStats,
}

/// State shared by the run loop, spawned jobs and the handle.
struct WorkerShared {
    intakes: Arc<dyn IntakeRepository>,
    processor: IntakeProcessor,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    cancel_tx: watch::Sender<bool>,
    cancel: CancelSignal,
    running: AtomicBool,
    active: AtomicUsize,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Current worker state with queue statistics.
    pub async fn status(&self) -> Result<WorkerStatus> {
        let stats = self.shared.intakes.stats().await?;
        Ok(WorkerStatus {
            running: self.shared.running.load(Ordering::SeqCst),
            poll_interval: self.shared.config.poll_interval,
            max_concurrent_jobs: self.shared.config.max_concurrent_jobs,
            active_jobs: self.shared.active.load(Ordering::SeqCst),
            stats,
        })
    }

    /// Process one `ready` intake immediately, outside the polling loop.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "worker", op = "process_intake"))]
    pub async fn process_intake(&self, id: Uuid, org_id: &str) -> Result<ProcessOutcome> {
        let intake = self
            .shared
            .intakes
            .get(id, org_id)
            .await?
            .ok_or(Error::IntakeNotFound(id))?;
        if intake.status != IntakeStatus::Ready {
            return Err(Error::InvalidInput(format!(
                "intake {} is {}, only ready intakes can be processed",
                id, intake.status
            )));
        }
        if !self.shared.intakes.claim(id, org_id).await? {
            return Err(Error::ClaimConflict(id));
        }
        Ok(self.shared.execute(intake).await)
    }
}

impl WorkerShared {
    fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run the processor for a claimed intake under the job timeout.
    async fn execute(&self, intake: Intake) -> ProcessOutcome {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.emit(WorkerEvent::IntakeClaimed {
            intake_id: intake.id,
            org_id: intake.org_id.clone(),
        });

        let outcome = match timeout(
            self.config.job_timeout,
            self.processor.process(&intake, &self.cancel),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                let message = format!("Job exceeded timeout of {:?}", self.config.job_timeout);
                warn!(intake_id = %intake.id, "{}", message);
                self.processor.record_failure(&intake, &message).await
            }
        };

        self.report(intake.id, &outcome);
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn report(&self, intake_id: Uuid, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Completed { memory_id } => self.emit(WorkerEvent::IntakeCompleted {
                intake_id,
                memory_id: *memory_id,
            }),
            ProcessOutcome::RetryScheduled {
                attempts,
                next_retry_at,
                error,
            } => self.emit(WorkerEvent::RetryScheduled {
                intake_id,
                attempts: *attempts,
                next_retry_at: *next_retry_at,
                error: error.clone(),
            }),
            ProcessOutcome::Failed { attempts, error } => {
                self.emit(WorkerEvent::FailedPermanently {
                    intake_id,
                    attempts: *attempts,
                    error: error.clone(),
                })
            }
            ProcessOutcome::Interrupted => {
                self.emit(WorkerEvent::IntakeInterrupted { intake_id })
            }
            ProcessOutcome::Unrecorded { .. } => {}
        }
    }

    /// Claim up to `limit` due intakes and spawn them. Returns how many
    /// were dispatched.
    async fn dispatch(self: &Arc<Self>, tasks: &mut JoinSet<()>, limit: usize) -> usize {
        let candidates = match self.intakes.get_ready(limit as i64).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to poll ready intakes");
                return 0;
            }
        };

        let mut dispatched = 0;
        for intake in candidates {
            match self.intakes.claim(intake.id, &intake.org_id).await {
                Ok(true) => {
                    dispatched += 1;
                    let shared = self.clone();
                    tasks.spawn(async move {
                        shared.execute(intake).await;
                    });
                }
                Ok(false) => debug!(intake_id = %intake.id, "Claim lost, skipping"),
                Err(e) => error!(intake_id = %intake.id, error = %e, "Failed to claim intake"),
            }
        }
        if dispatched > 0 {
            debug!(dispatched, active_jobs = tasks.len(), "Dispatched intakes");
        }
        dispatched
    }

    /// Requeue intakes left in `processing` by a worker that went away.
    async fn requeue_stale(&self) {
        let Some(stale_after) = self.config.stale_cutoff() else {
            return;
        };
        let before = Utc::now() - chrono::Duration::seconds(stale_after.as_secs() as i64);
        let stale = match self.intakes.list_stale(before).await {
            Ok(stale) => stale,
            Err(e) => {
                error!(error = %e, "Failed to list stale intakes");
                return;
            }
        };
        for intake in stale {
            warn!(
                intake_id = %intake.id,
                org_id = %intake.org_id,
                updated_at = %intake.updated_at,
                "Requeueing stale intake"
            );
            let outcome = self.processor.record_failure(&intake, STALE_LEASE_ERROR).await;
            self.report(intake.id, &outcome);
        }
    }

    async fn log_stats(&self, active_jobs: usize) {
        match self.intakes.stats().await {
            Ok(stats) => info!(
                active_jobs,
                ready = stats.ready,
                processing = stats.processing,
                done = stats.done,
                failed_max_attempts = stats.failed_max_attempts,
                recent_errors = stats.recent_errors,
                total_memories = stats.total_memories,
                "Worker stats"
            ),
            Err(e) => warn!(error = %e, "Failed to load worker stats"),
        }
    }

    /// Run the worker loop.
    ///
    /// Keeps at most `max_concurrent_jobs` intakes in flight. Polls again
    /// right away after dispatching and sleeps `poll_interval` otherwise.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Intake worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent_jobs,
            janitor = self.config.stale_after.is_some(),
            "Intake worker started"
        );
        if let (Some(configured), Some(cutoff)) =
            (self.config.stale_after, self.config.stale_cutoff())
        {
            if cutoff > configured {
                warn!(
                    configured_secs = configured.as_secs(),
                    cutoff_secs = cutoff.as_secs(),
                    "Stale threshold is below the job timeout, raising it"
                );
            }
        }
        self.running.store(true, Ordering::SeqCst);
        self.emit(WorkerEvent::WorkerStarted);

        let max_concurrent = self.config.max_concurrent_jobs;
        let janitor_enabled = self.config.stale_after.is_some();
        let stats_period = self.config.stats_log_interval.max(MIN_TICK);
        let mut stats_tick = interval_at(Instant::now() + stats_period, stats_period);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut janitor_tick =
            interval_at(Instant::now(), self.config.janitor_interval.max(MIN_TICK));
        janitor_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tasks = JoinSet::new();
        loop {
            while let Some(Some(result)) = tasks.join_next().now_or_never() {
                log_join(result);
            }

            let active = tasks.len();
            let dispatched = if active < max_concurrent {
                self.dispatch(&mut tasks, max_concurrent - active).await
            } else {
                0
            };

            let wait = if tasks.len() >= max_concurrent {
                self.config.capacity_wait
            } else if dispatched > 0 {
                Duration::ZERO
            } else {
                self.config.poll_interval
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Intake worker received shutdown signal");
                    break;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => log_join(result),
                _ = sleep(wait) => {}
                _ = stats_tick.tick() => self.log_stats(tasks.len()).await,
                _ = janitor_tick.tick(), if janitor_enabled => self.requeue_stale().await,
            }
        }

        self.drain(tasks).await;
        self.running.store(false, Ordering::SeqCst);
        self.emit(WorkerEvent::WorkerStopped);
        info!("Intake worker stopped");
    }

    /// Cancel running jobs and wait up to the grace period before aborting.
    async fn drain(&self, mut tasks: JoinSet<()>) {
        let _ = self.cancel_tx.send(true);
        if tasks.is_empty() {
            return;
        }
        info!(active_jobs = tasks.len(), "Waiting for running intakes");
        let drained = timeout(self.config.shutdown_grace, async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                abandoned = tasks.len(),
                grace_secs = self.config.shutdown_grace.as_secs(),
                "Abandoning intakes still running after shutdown grace"
            );
            tasks.abort_all();
        }
    }
}

fn log_join(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        if !e.is_cancelled() {
            error!(error = ?e, "Intake task panicked");
        }
    }
}

/// Worker that drives intakes from `ready` to `done`.
pub struct IntakeWorker {
    intakes: Arc<dyn IntakeRepository>,
    processor: IntakeProcessor,
    config: WorkerConfig,
}

impl IntakeWorker {
    pub fn new(intakes: Arc<dyn IntakeRepository>, processor: IntakeProcessor) -> Self {
        Self {
            intakes,
            processor,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let (cancel_tx, cancel) = CancelSignal::channel();

        let shared = Arc::new(WorkerShared {
            intakes: self.intakes,
            processor: self.processor,
            config: self.config,
            event_tx,
            cancel_tx,
            cancel,
            running: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        });

        tokio::spawn(shared.clone().run(shutdown_rx));

        WorkerHandle {
            shutdown_tx,
            event_rx,
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert!(config.capacity_wait <= Duration::from_secs(5));
        assert!(config.stale_after.is_none());
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(50))
            .with_max_concurrent(8)
            .with_enabled(false)
            .with_stale_after(Duration::from_secs(900))
            .with_job_timeout(Duration::from_secs(5));

        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.max_concurrent_jobs, 8);
        assert!(!config.enabled);
        assert_eq!(config.stale_after, Some(Duration::from_secs(900)));
        assert_eq!(config.job_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_stale_cutoff_never_undercuts_job_timeout() {
        let config = WorkerConfig::default()
            .with_stale_after(Duration::from_secs(60))
            .with_job_timeout(Duration::from_secs(300))
            .with_capacity_wait(Duration::from_secs(1));
        assert_eq!(config.stale_cutoff(), Some(Duration::from_secs(301)));

        let config = config.with_stale_after(Duration::from_secs(900));
        assert_eq!(config.stale_cutoff(), Some(Duration::from_secs(900)));

        assert_eq!(WorkerConfig::default().stale_cutoff(), None);
    }

    #[test]
    fn test_max_concurrent_is_at_least_one() {
        let config = WorkerConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_worker_event_equality() {
        let id = Uuid::new_v4();
        assert_eq!(
            WorkerEvent::IntakeInterrupted { intake_id: id },
            WorkerEvent::IntakeInterrupted { intake_id: id }
        );
        assert_ne!(WorkerEvent::WorkerStarted, WorkerEvent::WorkerStopped);
    }
}
