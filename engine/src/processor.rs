//! The run processor.
//!
//! Drains queued runs under bounded concurrency: claim (atomic
//! queued→running), execute the conversation loop, run evaluators, persist
//! the terminal state, and notify observers. A processor instance owns its
//! own semaphore, so multiple instances (tests, an embedded API processor
//! and a CLI `watch`) never interfere — the store's compare-and-set claim
//! keeps them from double-processing.

use crate::evaluator::EvaluatorRegistry;
use crate::run::{Run, RunOutput, RunResult, RunStatus};
use crate::runner::{Disposition, ScenarioRunner};
use crate::store::{Catalog, RunStore, StoreError};
use chrono::Utc;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Run not found: {id}")]
    RunNotFound { id: Uuid },

    #[error("Run {id} is {status}; only error runs can be retried")]
    NotRetryable { id: Uuid, status: RunStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Interval between continuous polls.
    pub poll_interval: Duration,
    /// Concurrency bound on simultaneously executing runs.
    pub max_concurrent: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_concurrent: 3,
        }
    }
}

/// Lifecycle hooks invoked synchronously around each run. Implementations
/// must not assume they can affect scheduling: a panicking observer is
/// caught and logged, and run bookkeeping proceeds.
pub trait RunObserver: Send + Sync {
    fn on_run_start(&self, _run: &Run) {}

    fn on_run_complete(&self, _run: &Run, _result: &RunResult) {}

    fn on_run_error(&self, _run: &Run, _error: &str) {}
}

struct ProcessorInner {
    store: Arc<dyn RunStore>,
    catalog: Arc<dyn Catalog>,
    runner: Arc<ScenarioRunner>,
    registry: Arc<EvaluatorRegistry>,
    observers: Vec<Arc<dyn RunObserver>>,
    semaphore: Arc<Semaphore>,
    config: ProcessorConfig,
}

pub struct RunProcessor {
    inner: Arc<ProcessorInner>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct RunProcessorBuilder {
    store: Arc<dyn RunStore>,
    catalog: Arc<dyn Catalog>,
    runner: Arc<ScenarioRunner>,
    registry: EvaluatorRegistry,
    observers: Vec<Arc<dyn RunObserver>>,
    config: ProcessorConfig,
}

impl RunProcessorBuilder {
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval;
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn registry(mut self, registry: EvaluatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> RunProcessor {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let (shutdown_tx, _) = watch::channel(false);

        RunProcessor {
            inner: Arc::new(ProcessorInner {
                store: self.store,
                catalog: self.catalog,
                runner: self.runner,
                registry: Arc::new(self.registry),
                observers: self.observers,
                semaphore,
                config: self.config,
            }),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }
}

impl RunProcessor {
    pub fn builder(
        store: Arc<dyn RunStore>,
        catalog: Arc<dyn Catalog>,
        runner: Arc<ScenarioRunner>,
    ) -> RunProcessorBuilder {
        RunProcessorBuilder {
            store,
            catalog,
            runner,
            registry: EvaluatorRegistry::with_builtins(),
            observers: Vec::new(),
            config: ProcessorConfig::default(),
        }
    }

    /// Claim up to `max_concurrent` queued runs, execute them concurrently,
    /// and wait for all of them to settle. Returns the number of runs
    /// executed.
    pub async fn process_once(&self) -> ProcessorResult<usize> {
        let ids = self.inner.store.queued_ids().await?;
        let mut join_set = JoinSet::new();
        let mut claimed = 0usize;

        for id in ids {
            if claimed >= self.inner.config.max_concurrent {
                break;
            }
            // A lost claim means another processor got there first: no-op.
            if let Some(run) = self.inner.store.claim(id).await? {
                claimed += 1;
                let inner = self.inner.clone();
                join_set.spawn(async move { inner.execute(run).await });
            }
        }

        while join_set.join_next().await.is_some() {}
        Ok(claimed)
    }

    /// Start the continuous poll loop. Idempotent: calling `start` while
    /// running is a no-op.
    pub async fn start(&self) {
        let mut handle_guard = self.loop_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        self.shutdown_tx.send_replace(false);
        let inner = self.inner.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!(
                max_concurrent = inner.config.max_concurrent,
                poll_interval_ms = inner.config.poll_interval.as_millis() as u64,
                "Run processor started"
            );
            let mut ticker = tokio::time::interval(inner.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut in_flight: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        while in_flight.try_join_next().is_some() {}
                        inner.claim_available(&mut in_flight).await;
                    }
                }
            }

            // Graceful drain: no new claims, in-flight runs finish.
            while in_flight.join_next().await.is_some() {}
            info!("Run processor stopped");
        });

        *handle_guard = Some(handle);
    }

    /// Stop the poll loop. In-flight runs are never cancelled; this waits
    /// for them to finish.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Processor loop task failed: {}", e);
            }
        }
    }

    /// Re-queue a run that ended in a system fault. Judged completions are
    /// results, not faults, and are rejected.
    pub async fn retry(&self, id: Uuid, clear_messages: bool) -> ProcessorResult<Run> {
        let mut run = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or(ProcessorError::RunNotFound { id })?;

        if run.status != RunStatus::Error {
            return Err(ProcessorError::NotRetryable {
                id,
                status: run.status,
            });
        }

        run.status = RunStatus::Queued;
        run.error = None;
        run.result = None;
        run.started_at = None;
        run.finished_at = None;
        if clear_messages {
            run.messages.clear();
            run.output = RunOutput::default();
        }

        self.inner.store.update(run.clone()).await?;
        info!(run_id = %run.id, clear_messages, "Run re-queued");
        Ok(run)
    }
}

impl ProcessorInner {
    /// One poll tick: claim queued runs while semaphore permits remain.
    async fn claim_available(self: &Arc<Self>, in_flight: &mut JoinSet<()>) {
        let ids = match self.store.queued_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Polling for queued runs failed: {}", e);
                return;
            }
        };

        for id in ids {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            match self.store.claim(id).await {
                Ok(Some(run)) => {
                    let inner = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        inner.execute(run).await;
                    });
                }
                Ok(None) => {
                    debug!(run_id = %id, "Run already claimed elsewhere");
                }
                Err(e) => {
                    warn!(run_id = %id, "Claim failed: {}", e);
                }
            }
        }
    }

    async fn execute(&self, mut run: Run) {
        info!(run_id = %run.id, scenario = %run.scenario_id, "Executing run");
        self.notify(|observer| observer.on_run_start(&run));

        match self.execute_conversation(&mut run).await {
            Ok(result) => {
                run.status = RunStatus::Completed;
                run.result = Some(result.clone());
                run.finished_at = Some(Utc::now());
                if let Err(e) = self.store.update(run.clone()).await {
                    error!(run_id = %run.id, "Failed to persist completed run: {}", e);
                }
                info!(run_id = %run.id, success = result.success, "Run completed");
                self.notify(|observer| observer.on_run_complete(&run, &result));
            }
            Err(fault) => {
                run.status = RunStatus::Error;
                run.error = Some(fault.clone());
                run.finished_at = Some(Utc::now());
                if let Err(e) = self.store.update(run.clone()).await {
                    error!(run_id = %run.id, "Failed to persist errored run: {}", e);
                }
                warn!(run_id = %run.id, "Run errored: {}", fault);
                self.notify(|observer| observer.on_run_error(&run, &fault));
            }
        }
    }

    async fn execute_conversation(&self, run: &mut Run) -> Result<RunResult, String> {
        // Definition snapshots, taken once at claim time. Concurrent edits
        // never affect a run already in flight.
        let scenario = self
            .catalog
            .scenario(&run.scenario_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("scenario not found: {}", run.scenario_id))?;

        let persona = match &run.persona_id {
            Some(id) => Some(
                self.catalog
                    .persona(id)
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("persona not found: {}", id))?,
            ),
            None => None,
        };

        let connector_id = run
            .connector_id
            .as_deref()
            .ok_or_else(|| "run has no connector".to_string())?;
        let connector = self
            .catalog
            .connector(connector_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("connector not found: {}", connector_id))?;

        let existing = std::mem::take(&mut run.messages);
        let outcome = self
            .runner
            .run(&scenario, persona.as_ref(), &connector, existing)
            .await;

        run.messages = outcome.messages;
        run.output = outcome.output;

        match outcome.disposition {
            Disposition::Completed(result) => {
                let entries = self
                    .registry
                    .run(&scenario.evaluators, &run.messages, &run.output)
                    .await;
                run.output.evaluator_results = entries;
                Ok(result)
            }
            // Evaluators do not run for a faulted conversation.
            Disposition::Faulted(fault) => Err(fault),
        }
    }

    fn notify(&self, f: impl Fn(&dyn RunObserver)) {
        for observer in &self.observers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
                warn!("Run observer panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.max_concurrent, 3);
    }

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let err = ProcessorError::NotRetryable {
            id,
            status: RunStatus::Completed,
        };
        assert!(err.to_string().contains("completed"));
        assert!(err.to_string().contains("only error runs"));
    }
}
