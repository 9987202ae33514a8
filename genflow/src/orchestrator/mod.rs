//! The pipeline orchestrator.
//!
//! Drives one generation run at a time: validates the job, creates the run
//! record, generates `count * variations` items, feeds every result through
//! the stage pipeline and the quality gate, and persists the outcome.

mod item;
mod prompt;
mod state;

pub use prompt::{PromptPlan, ResolvedPrompt};
pub use state::{OrchestratorState, OrchestratorStatus, RunProgress};

use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::config::JobConfig;
use crate::core::{GenflowEvent, ProgressStep, QualityReason, Run, RunStatus};
use crate::errors::{GenflowError, Result, ValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::ports::{
    ArtifactRepository, BackgroundRemover, GenerationProvider, ImageOps, MetadataClient,
    QualityGate, RunRepository, StagePorts,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default time budget for releasing owned handles on force stop.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    artifacts: Arc<dyn ArtifactRepository>,
    runs: Arc<dyn RunRepository>,
    provider: Arc<dyn GenerationProvider>,
    stage_ports: StagePorts,
    quality_gate: Option<Arc<dyn QualityGate>>,
    sink: Arc<dyn EventSink>,
    cleanup_timeout: Duration,
}

impl OrchestratorBuilder {
    /// Sets the quality gate.
    #[must_use]
    pub fn with_quality_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.quality_gate = Some(gate);
        self
    }

    /// Sets the metadata client.
    #[must_use]
    pub fn with_metadata_client(mut self, client: Arc<dyn MetadataClient>) -> Self {
        self.stage_ports = self.stage_ports.with_metadata_client(client);
        self
    }

    /// Sets the background remover.
    #[must_use]
    pub fn with_background_remover(mut self, remover: Arc<dyn BackgroundRemover>) -> Self {
        self.stage_ports = self.stage_ports.with_background_remover(remover);
        self
    }

    /// Replaces all stage ports at once.
    #[must_use]
    pub fn with_stage_ports(mut self, ports: StagePorts) -> Self {
        self.stage_ports = ports;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the time budget for releasing owned handles on force stop.
    #[must_use]
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Builds the orchestrator.
    #[must_use]
    pub fn build(self) -> Orchestrator {
        Orchestrator {
            inner: Arc::new(Inner {
                artifacts: self.artifacts,
                runs: self.runs,
                provider: self.provider,
                stage_ports: self.stage_ports,
                quality_gate: self.quality_gate,
                sink: self.sink,
                cleanup_timeout: self.cleanup_timeout,
                handles: CleanupRegistry::new(),
                shared: Mutex::new(Shared::default()),
            }),
        }
    }
}

/// Stop controls of one run.
#[derive(Debug, Default)]
struct Session {
    stop: CancellationToken,
    force: CancellationToken,
    finalized: AtomicBool,
}

#[derive(Debug, Default)]
struct Shared {
    state: OrchestratorState,
    run: Option<Run>,
    last_error: Option<String>,
    progress: RunProgress,
    session: Option<Arc<Session>>,
}

struct Inner {
    artifacts: Arc<dyn ArtifactRepository>,
    runs: Arc<dyn RunRepository>,
    provider: Arc<dyn GenerationProvider>,
    stage_ports: StagePorts,
    quality_gate: Option<Arc<dyn QualityGate>>,
    sink: Arc<dyn EventSink>,
    cleanup_timeout: Duration,
    handles: CleanupRegistry,
    shared: Mutex<Shared>,
}

/// Drives generation runs.
///
/// Cloning is cheap and every clone controls the same runs, so one task can
/// `start` while another calls `stop` or `force_stop`.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("status", &self.get_status())
            .field("has_quality_gate", &self.inner.quality_gate.is_some())
            .field("stage_ports", &self.inner.stage_ports)
            .finish()
    }
}

/// Outcome of the item loop.
enum LoopEnd {
    Finished,
    Stopped,
}

impl Orchestrator {
    /// Starts building an orchestrator.
    #[must_use]
    pub fn builder(
        artifacts: Arc<dyn ArtifactRepository>,
        runs: Arc<dyn RunRepository>,
        provider: Arc<dyn GenerationProvider>,
        image_ops: Arc<dyn ImageOps>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            artifacts,
            runs,
            provider,
            stage_ports: StagePorts::new(image_ops),
            quality_gate: None,
            sink: Arc::new(NoOpEventSink),
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    /// Runs a job to completion and returns the final run record.
    ///
    /// Fails before any external call when the configuration is invalid.
    /// A run ended by `stop` or `force_stop` returns `Ok` with status
    /// `stopped`; a run aborted by an error returns that error after the
    /// run-error event. A final run record that cannot be written fails the
    /// run with a persistence error.
    pub async fn start(&self, config: JobConfig) -> Result<Run> {
        {
            let mut shared = self.inner.shared.lock();
            if shared.state.is_active() {
                return Err(ValidationError::new("A run is already active on this orchestrator").into());
            }
            shared.state = OrchestratorState::Starting;
            shared.last_error = None;
            shared.run = None;
            shared.session = None;
            shared.progress = RunProgress {
                step: Some(ProgressStep::Validating),
                ..RunProgress::default()
            };
        }
        self.inner.handles.clear();

        if let Err(err) = config.validate() {
            return Err(self.fail_before_run(None, err.into()));
        }
        let plan = match PromptPlan::new(&config.generation) {
            Ok(plan) => plan,
            Err(err) => return Err(self.fail_before_run(None, err)),
        };
        for dir in [
            &config.file_paths.output_directory,
            &config.file_paths.temp_directory,
        ] {
            if let Err(err) = tokio::fs::create_dir_all(dir).await {
                return Err(self.fail_before_run(None, err.into()));
            }
        }

        let total = config.generation.total_items();
        let run = Run::start(
            total,
            config.config_id.clone(),
            config.label.clone(),
            config.redacted_snapshot(),
            config.fingerprint(),
        );
        if let Err(err) = self.inner.runs.save(&run).await {
            return Err(self.fail_before_run(Some(run.id), err));
        }

        let session = Arc::new(Session::default());
        {
            let mut shared = self.inner.shared.lock();
            shared.state = OrchestratorState::Running;
            shared.run = Some(run.clone());
            shared.session = Some(session.clone());
            shared.progress.total = total;
        }
        info!(run_id = %run.id, total_items = total, label = ?run.label, "Run started");

        let outcome = tokio::select! {
            biased;
            () = session.force.cancelled() => None,
            result = self.execute(run.id, &config, &plan, &session.stop) => Some(result),
        };

        match outcome {
            // force_stop finalized the run and emitted the terminal event.
            None => Ok(self.current_run().unwrap_or(run)),
            Some(Ok(end)) => {
                let status = match end {
                    LoopEnd::Finished => RunStatus::Completed,
                    LoopEnd::Stopped => RunStatus::Stopped,
                };
                match self.finish(&session, status, None) {
                    Some(run) => {
                        self.publish(&run).await?;
                        Ok(run)
                    }
                    None => Ok(self.current_run().unwrap_or(run)),
                }
            }
            Some(Err(err)) => {
                error!(run_id = %run.id, error = %err, "Run failed");
                if let Some(run) = self.finish(&session, RunStatus::Failed, Some(err.to_string())) {
                    // A failed final write was already reported as run-error.
                    let _ = self.publish(&run).await;
                }
                Err(err)
            }
        }
    }

    /// Requests a cooperative stop.
    ///
    /// The current external call is awaited; the run ends at the next item
    /// or stage boundary with status `stopped`. Returns false when no run is
    /// active.
    pub fn stop(&self) -> bool {
        match self.session() {
            Some(session) => {
                info!("Stop requested");
                session.stop.cancel("stop requested");
                true
            }
            None => false,
        }
    }

    /// Stops immediately.
    ///
    /// Drops the in-flight external call, releases every registered owned
    /// handle, finalizes the run as `stopped` and emits the terminal event
    /// before returning. Returns false when no run is active.
    pub async fn force_stop(&self) -> Result<bool> {
        let Some(session) = self.session() else {
            return Ok(false);
        };
        warn!("Force stop requested");

        session.stop.cancel("force stop requested");
        let Some(run) = self.finish(&session, RunStatus::Stopped, None) else {
            return Ok(false);
        };
        session.force.cancel("force stop requested");

        let failures = self.inner.handles.run_all(self.inner.cleanup_timeout).await;
        for (name, message) in &failures {
            warn!(handle = %name, error = %message, "Owned handle cleanup failed");
        }

        self.publish(&run).await?;
        Ok(true)
    }

    /// Lifecycle state, current run and last error.
    pub fn get_status(&self) -> OrchestratorStatus {
        let shared = self.inner.shared.lock();
        OrchestratorStatus {
            state: shared.state,
            run_id: shared.run.as_ref().map(|r| r.id),
            last_error: shared.last_error.clone(),
        }
    }

    /// Step and counters of the current run.
    pub fn get_progress(&self) -> RunProgress {
        self.inner.shared.lock().progress.clone()
    }

    /// Registers an owned handle released by `force_stop`.
    ///
    /// Providers register child processes or timers here for the duration
    /// of a call and unregister them when the call returns.
    pub fn register_handle<F>(&self, name: impl Into<String>, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.handles.register(name, cleanup);
    }

    /// Registers a spawned task aborted by `force_stop`.
    pub fn register_task(&self, name: impl Into<String>, handle: tokio::task::AbortHandle) {
        self.inner.handles.register_task(name, handle);
    }

    /// Removes an owned handle without running it.
    pub fn unregister_handle(&self, name: &str) -> bool {
        self.inner.handles.unregister(name)
    }

    fn session(&self) -> Option<Arc<Session>> {
        let shared = self.inner.shared.lock();
        if shared.state.is_active() {
            shared.session.clone()
        } else {
            None
        }
    }

    fn current_run(&self) -> Option<Run> {
        self.inner.shared.lock().run.clone()
    }

    fn fail_before_run(&self, run_id: Option<Uuid>, err: GenflowError) -> GenflowError {
        warn!(error = %err, "Run could not start");
        {
            let mut shared = self.inner.shared.lock();
            shared.state = OrchestratorState::Failed;
            shared.last_error = Some(err.to_string());
        }
        self.inner.sink.try_emit(GenflowEvent::RunError {
            run_id,
            error: err.to_string(),
        });
        err
    }

    /// Marks the run terminal exactly once.
    ///
    /// Returns the finished record to the single caller that won.
    fn finish(&self, session: &Session, status: RunStatus, error: Option<String>) -> Option<Run> {
        let mut shared = self.inner.shared.lock();
        if session.finalized.swap(true, Ordering::SeqCst) {
            return None;
        }

        let run = shared.run.as_mut()?;
        run.finish(status, error.clone());
        let run = run.clone();
        shared.state = OrchestratorState::from(status);
        shared.last_error = error;
        shared.progress.step = None;
        Some(run)
    }

    /// Persists the final record and emits the terminal event.
    ///
    /// When the record cannot be written the run is reported as failed with
    /// `persistence_failed` and the write error is returned.
    async fn publish(&self, run: &Run) -> Result<()> {
        if let Err(err) = self.inner.runs.update(run).await {
            error!(run_id = %run.id, error = %err, "Failed to persist final run record");
            let message = format!("{}: {err}", QualityReason::PersistenceFailed);
            {
                let mut shared = self.inner.shared.lock();
                shared.state = OrchestratorState::Failed;
                shared.last_error = Some(message.clone());
                if let Some(current) = shared.run.as_mut() {
                    current.status = RunStatus::Failed;
                    current.error = Some(message.clone());
                }
            }
            self.inner.sink.try_emit(GenflowEvent::RunError {
                run_id: Some(run.id),
                error: message,
            });
            return Err(err);
        }

        info!(
            run_id = %run.id,
            status = %run.status,
            successful = run.successful_items,
            failed = run.failed_items,
            total = run.total_items,
            "Run finished"
        );

        let event = match (&run.status, &run.error) {
            (RunStatus::Failed, error) => GenflowEvent::RunError {
                run_id: Some(run.id),
                error: error.clone().unwrap_or_else(|| "run failed".to_string()),
            },
            _ => GenflowEvent::RunCompleted {
                run_id: run.id,
                status: run.status,
                successful_items: run.successful_items,
                failed_items: run.failed_items,
                total_items: run.total_items,
            },
        };
        self.inner.sink.try_emit(event);
        Ok(())
    }

    fn progress(&self, run_id: Uuid, step: ProgressStep, item: u32, total: u32) {
        {
            let mut shared = self.inner.shared.lock();
            shared.progress.step = Some(step);
            shared.progress.item = item;
        }
        self.inner.sink.try_emit(GenflowEvent::Progress {
            run_id,
            step,
            count: item,
            total,
        });
    }

    /// Counts one resolved item; ignored once the run is finalized.
    fn record_item(&self, success: bool) -> Option<Run> {
        let mut shared = self.inner.shared.lock();
        let finalized = shared
            .session
            .as_ref()
            .map_or(true, |s| s.finalized.load(Ordering::SeqCst));
        if finalized {
            return None;
        }

        let run = shared.run.as_mut()?;
        if success {
            run.record_success();
        } else {
            run.record_failure();
        }
        let run = run.clone();
        shared.progress.successful = run.successful_items;
        shared.progress.failed = run.failed_items;
        Some(run)
    }

    async fn persist_statistics(&self, run: &Run) -> Result<()> {
        self.inner.runs.update(run).await?;
        self.inner
            .runs
            .update_statistics(run.id, run.successful_items, run.failed_items)
            .await
    }
}

#[cfg(test)]
mod tests;
