//! Parallel chunk execution and the final merge.
//!
//! Chunks are processed independently by a bounded set of workers. Each
//! chunk yields a partial [`Output`]; partial outputs are merged in chunk-id
//! order once every chunk has succeeded, so the merged result does not
//! depend on scheduling.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::failure_tolerance::{FailureCollector, FailureMode, FailureRecord};
use super::processor::Analysis;
use super::retry::{should_retry, RetryConfig, RetryDecision};
use super::source::EventSource;
use crate::core::{ChunkId, ChunkSpec};
use crate::errors::{ChunksFailedError, DataError, EventflowError, MergeError};
use crate::events::{EventSink, NoOpEventSink, RunEvent};
use crate::observability::{chunk_span, SpanTimer};
use crate::output::Output;

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Chunks processed concurrently.
    pub max_workers: usize,
    /// Retry policy for transient load failures.
    pub retry: RetryConfig,
    /// Reaction to failed chunks.
    pub failure_mode: FailureMode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            retry: RetryConfig::default(),
            failure_mode: FailureMode::FailFast,
        }
    }
}

impl RunnerConfig {
    /// Sets the worker count. Zero is treated as one.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }
}

/// Where a chunk is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Waiting for a worker.
    Pending,
    /// Being loaded or processed.
    Running,
    /// Waiting before another attempt.
    Retrying,
    /// Partial output produced.
    Done,
    /// Given up.
    Failed,
    /// Never scheduled because the run stopped early.
    Skipped,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// Fingerprint of the analysis configuration.
    pub config_fingerprint: String,
    /// The merged output.
    pub output: Output,
    /// Final status of every scheduled chunk.
    pub statuses: BTreeMap<ChunkId, ChunkStatus>,
}

impl RunReport {
    /// Wall time of the run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

type ChunkOutcome = (ChunkId, Result<Output, FailureRecord>);

/// Executes an [`Analysis`] over a list of chunks.
pub struct Runner {
    analysis: Arc<Analysis>,
    config: RunnerConfig,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("analysis", &self.analysis.fingerprint())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner with default settings.
    #[must_use]
    pub fn new(analysis: impl Into<Arc<Analysis>>) -> Self {
        Self {
            analysis: analysis.into(),
            config: RunnerConfig::default(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the runner configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The analysis being run.
    #[must_use]
    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    /// Processes every chunk accepted by the dataset filter and merges the results.
    ///
    /// # Errors
    ///
    /// - [`EventflowError::Configuration`] if the source schema lacks an input,
    ///   before any chunk is read.
    /// - [`EventflowError::Merge`] if a chunk is listed twice.
    /// - [`EventflowError::ChunksFailed`] naming every failed chunk; nothing is
    ///   merged in that case.
    pub async fn run(
        &self,
        source: Arc<dyn EventSource>,
        chunks: Vec<ChunkSpec>,
    ) -> Result<RunReport, EventflowError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = SpanTimer::start(run_id.to_string());

        self.analysis.validate_schema(&source.schema())?;

        let total = chunks.len();
        let mut selected: Vec<ChunkSpec> = chunks
            .into_iter()
            .filter(|c| self.analysis.dataset_filter().accepts(c))
            .collect();
        selected.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = selected.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(MergeError::DuplicateChunk {
                chunk: pair[0].id.clone(),
            }
            .into());
        }
        if selected.len() < total {
            debug!(skipped = total - selected.len(), "Chunks rejected by dataset filter");
        }

        info!(%run_id, chunks = selected.len(), workers = self.config.max_workers, "Run started");
        self.sink
            .emit(&RunEvent::RunStarted {
                run_id,
                chunks: selected.len(),
            })
            .await;

        let ledger: Arc<DashMap<ChunkId, ChunkStatus>> =
            Arc::new(selected.iter().map(|c| (c.id.clone(), ChunkStatus::Pending)).collect());
        let mut queue: VecDeque<ChunkSpec> = selected.into();
        let mut active: FuturesUnordered<tokio::task::JoinHandle<ChunkOutcome>> = FuturesUnordered::new();
        let mut collector = FailureCollector::new(self.config.failure_mode);
        let mut partials: BTreeMap<ChunkId, Output> = BTreeMap::new();
        let workers = self.config.max_workers.max(1);

        loop {
            while active.len() < workers && !collector.should_stop() {
                let Some(chunk) = queue.pop_front() else {
                    break;
                };
                active.push(self.spawn_chunk(chunk, Arc::clone(&source), Arc::clone(&ledger)));
            }

            let Some(joined) = active.next().await else {
                break;
            };
            let (id, result) = joined.map_err(|e| EventflowError::Internal(format!("Chunk task join error: {e}")))?;
            match result {
                Ok(output) => {
                    collector.record_completion(id.clone());
                    partials.insert(id, output);
                }
                Err(record) => collector.record_failure(record),
            }
        }

        for chunk in queue {
            ledger.insert(chunk.id, ChunkStatus::Skipped);
        }
        let statuses: BTreeMap<ChunkId, ChunkStatus> =
            ledger.iter().map(|e| (e.key().clone(), *e.value())).collect();

        let failed = collector.failures().len();
        self.sink
            .emit(&RunEvent::RunCompleted {
                run_id,
                completed: collector.completed(),
                failed,
                duration_ms: timer.elapsed_ms(),
            })
            .await;

        if failed > 0 {
            warn!(%run_id, failed, "Run failed; partial outputs discarded");
            return Err(ChunksFailedError {
                failures: collector.into_failures(),
            }
            .into());
        }

        let output = Output::merge_all(partials.into_values())?;
        info!(
            %run_id,
            chunks = output.chunks().len(),
            histograms = output.histograms().len(),
            duration_ms = timer.finish(),
            "Run completed"
        );
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            config_fingerprint: self.analysis.fingerprint().to_string(),
            output,
            statuses,
        })
    }

    fn spawn_chunk(
        &self,
        chunk: ChunkSpec,
        source: Arc<dyn EventSource>,
        ledger: Arc<DashMap<ChunkId, ChunkStatus>>,
    ) -> tokio::task::JoinHandle<ChunkOutcome> {
        let analysis = Arc::clone(&self.analysis);
        let sink = Arc::clone(&self.sink);
        let retry = self.config.retry.clone();
        let span = chunk_span(&chunk.id);

        tokio::spawn(
            async move {
                let id = chunk.id.clone();
                let result = run_chunk(analysis, source, chunk, &retry, sink.as_ref(), &ledger).await;
                let status = if result.is_ok() { ChunkStatus::Done } else { ChunkStatus::Failed };
                ledger.insert(id.clone(), status);
                (id, result)
            }
            .instrument(span),
        )
    }
}

/// Loads and processes one chunk, retrying transient failures.
async fn run_chunk(
    analysis: Arc<Analysis>,
    source: Arc<dyn EventSource>,
    chunk: ChunkSpec,
    retry: &RetryConfig,
    sink: &dyn EventSink,
    ledger: &DashMap<ChunkId, ChunkStatus>,
) -> Result<Output, FailureRecord> {
    let label = chunk.id.to_string();
    let mut attempt = 0;
    loop {
        attempt += 1;
        ledger.insert(chunk.id.clone(), ChunkStatus::Running);
        sink.emit(&RunEvent::ChunkStarted {
            chunk: label.clone(),
            attempt,
        })
        .await;

        let timer = SpanTimer::start(label.clone());
        let error = match process_once(&analysis, source.as_ref(), &chunk).await {
            Ok((output, events)) => {
                sink.emit(&RunEvent::ChunkCompleted {
                    chunk: label,
                    events,
                    duration_ms: timer.finish(),
                })
                .await;
                return Ok(output);
            }
            Err(e) => e,
        };

        match should_retry(retry, attempt, error.retryable) {
            RetryDecision::Retry(delay) => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                ledger.insert(chunk.id.clone(), ChunkStatus::Retrying);
                warn!(attempt, delay_ms, error = %error, "Retrying chunk");
                sink.emit(&RunEvent::ChunkRetrying {
                    chunk: label.clone(),
                    attempt,
                    delay_ms,
                    error: error.to_string(),
                })
                .await;
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                warn!(attempts = attempt, error = %error, "Chunk failed");
                sink.emit(&RunEvent::ChunkFailed {
                    chunk: label,
                    attempts: attempt,
                    error: error.to_string(),
                })
                .await;
                return Err(FailureRecord::new(chunk.id.clone(), error).with_attempts(attempt));
            }
        }
    }
}

async fn process_once(
    analysis: &Arc<Analysis>,
    source: &dyn EventSource,
    chunk: &ChunkSpec,
) -> Result<(Output, usize), DataError> {
    let batch = source
        .load(chunk)
        .await
        .map_err(|e| e.with_chunk(chunk.id.clone()))?;
    let events = batch.n_events();
    let analysis = Arc::clone(analysis);
    let spec = chunk.clone();
    let output = tokio::task::spawn_blocking(move || analysis.process_chunk(&spec, &batch))
        .await
        .map_err(|e| DataError::malformed(format!("chunk worker aborted: {e}")).with_chunk(chunk.id.clone()))??;
    Ok((output, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DataErrorKind;
    use crate::pipeline::source::MockEventSource;
    use crate::testing::{scenario_batch, scenario_chunk, tutorial_analysis};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_retry(attempts: usize) -> RunnerConfig {
        RunnerConfig::default().with_max_workers(2).with_retry(
            RetryConfig::new()
                .with_max_attempts(attempts)
                .with_base_delay_ms(1)
                .with_jitter(crate::pipeline::JitterStrategy::None),
        )
    }

    fn mock_source(fail_first: usize) -> (MockEventSource, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockEventSource::new();
        source
            .expect_schema()
            .returning(|| scenario_batch().map(|b| b.schema()).unwrap_or_default());
        source.expect_load().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < fail_first {
                Err(DataError::io("XRootD timeout"))
            } else {
                scenario_batch()
            }
        });
        (source, calls)
    }

    #[test]
    fn test_runner_config_defaults() {
        let config = RunnerConfig::default();
        assert!(config.max_workers >= 1);
        assert_eq!(config.failure_mode, FailureMode::FailFast);
        assert_eq!(RunnerConfig::default().with_max_workers(0).max_workers, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (source, calls) = mock_source(1);
        let runner = Runner::new(tutorial_analysis().unwrap()).with_config(quick_retry(3));
        let report = runner
            .run(Arc::new(source), vec![scenario_chunk("a.root", 0, 10)])
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.statuses.values().next(), Some(&ChunkStatus::Done));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_run() {
        let (source, calls) = mock_source(usize::MAX);
        let runner = Runner::new(tutorial_analysis().unwrap()).with_config(quick_retry(2));
        let err = runner
            .run(Arc::new(source), vec![scenario_chunk("a.root", 0, 10)])
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let EventflowError::ChunksFailed(failed) = err else {
            panic!("expected ChunksFailed");
        };
        assert_eq!(failed.failures[0].attempts, 2);
        assert!(matches!(failed.failures[0].error.kind, DataErrorKind::Io(_)));
        assert_eq!(failed.chunk_ids()[0].file, "a.root");
    }

    #[tokio::test]
    async fn test_duplicate_chunk_rejected() {
        let (source, _) = mock_source(0);
        let runner = Runner::new(tutorial_analysis().unwrap());
        let chunk = scenario_chunk("a.root", 0, 10);
        let err = runner
            .run(Arc::new(source), vec![chunk.clone(), chunk])
            .await
            .unwrap_err();
        assert!(matches!(err, EventflowError::Merge(MergeError::DuplicateChunk { .. })));
    }
}
