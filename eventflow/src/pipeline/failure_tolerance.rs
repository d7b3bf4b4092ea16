//! Chunk failure bookkeeping.
//!
//! A run never merges a partial result silently: every chunk that could not
//! be processed is recorded, and the collector decides whether the remaining
//! chunks are still worth scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::ChunkId;
use crate::errors::DataError;

/// How the runner reacts to the first failed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop scheduling new chunks after the first failure (default).
    #[default]
    FailFast,
    /// Process every chunk, then report all failures together.
    CollectAll,
}

/// A chunk that failed after its last attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    /// The chunk.
    pub chunk: ChunkId,
    /// The last error.
    pub error: DataError,
    /// Attempts made, including the first.
    pub attempts: usize,
    /// When the chunk was given up.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a record stamped now.
    #[must_use]
    pub fn new(chunk: ChunkId, error: DataError) -> Self {
        Self {
            chunk,
            error,
            attempts: 1,
            timestamp: Utc::now(),
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Short name of the error kind.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        self.error.kind_name()
    }

    /// Whether the last error was transient.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.error.retryable
    }
}

/// Collects chunk outcomes during a run.
#[derive(Debug, Default)]
pub struct FailureCollector {
    mode: FailureMode,
    failures: Vec<FailureRecord>,
    completed: BTreeSet<ChunkId>,
}

impl FailureCollector {
    /// Creates a collector.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Failure mode.
    #[must_use]
    pub fn mode(&self) -> FailureMode {
        self.mode
    }

    /// Records a failed chunk.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.failures.push(record);
    }

    /// Records a processed chunk.
    pub fn record_completion(&mut self, chunk: ChunkId) {
        self.completed.insert(chunk);
    }

    /// Returns true if the chunk failed.
    #[must_use]
    pub fn has_failed(&self, chunk: &ChunkId) -> bool {
        self.failures.iter().any(|f| &f.chunk == chunk)
    }

    /// Returns true if no further chunks should be scheduled.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        match self.mode {
            FailureMode::FailFast => !self.failures.is_empty(),
            FailureMode::CollectAll => false,
        }
    }

    /// Number of processed chunks.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.len()
    }

    /// Failures in chunk order.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Takes the failures, sorted by chunk.
    #[must_use]
    pub fn into_failures(mut self) -> Vec<FailureRecord> {
        self.failures.sort_by(|a, b| a.chunk.cmp(&b.chunk));
        self.failures
    }
}
