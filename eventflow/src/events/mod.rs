//! Run lifecycle events.
//!
//! The runner reports chunk scheduling, retries and completion through an
//! [`EventSink`]. Events are observational only; dropping them never changes
//! the merged output.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One lifecycle event. Chunks are identified by their display form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Chunks were scheduled.
    RunStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Scheduled chunks.
        chunks: usize,
    },
    /// A chunk attempt began.
    ChunkStarted {
        /// Chunk.
        chunk: String,
        /// Attempt number, from 1.
        attempt: usize,
    },
    /// A transient failure will be retried.
    ChunkRetrying {
        /// Chunk.
        chunk: String,
        /// Failed attempt number.
        attempt: usize,
        /// Delay before the next attempt.
        delay_ms: u64,
        /// The error.
        error: String,
    },
    /// A chunk produced its partial output.
    ChunkCompleted {
        /// Chunk.
        chunk: String,
        /// Events read.
        events: usize,
        /// Processing time.
        duration_ms: f64,
    },
    /// A chunk was given up.
    ChunkFailed {
        /// Chunk.
        chunk: String,
        /// Attempts made.
        attempts: usize,
        /// The last error.
        error: String,
    },
    /// Every scheduled chunk finished.
    RunCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Processed chunks.
        completed: usize,
        /// Failed chunks.
        failed: usize,
        /// Wall time.
        duration_ms: f64,
    },
}

impl RunEvent {
    /// Dotted event type, e.g. `chunk.completed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::ChunkStarted { .. } => "chunk.started",
            Self::ChunkRetrying { .. } => "chunk.retrying",
            Self::ChunkCompleted { .. } => "chunk.completed",
            Self::ChunkFailed { .. } => "chunk.failed",
            Self::RunCompleted { .. } => "run.completed",
        }
    }

    /// JSON payload.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
