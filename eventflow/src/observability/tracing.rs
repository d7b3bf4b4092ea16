//! Span helpers for chunk processing.

use std::time::Instant;
use tracing::Span;

use crate::core::ChunkId;

/// Wall-clock timer attached to a named unit of work.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

/// A `chunk` span carrying the chunk's sample, file and entry range.
#[must_use]
pub fn chunk_span(chunk: &ChunkId) -> Span {
    tracing::info_span!(
        "chunk",
        sample = %chunk.sample,
        file = %chunk.file,
        entry_start = chunk.entry_start,
        entry_stop = chunk.entry_stop,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("TTTo2L2Nu:a.root[0..10]");
        assert_eq!(timer.name(), "TTTo2L2Nu:a.root[0..10]");
        assert!(timer.elapsed_ms() >= 0.0);
        assert!(timer.finish() >= 0.0);
    }

    #[test]
    fn test_chunk_span_without_subscriber() {
        let span = chunk_span(&ChunkId::new("TTTo2L2Nu", "a.root", 0, 10));
        let _guard = span.enter();
    }
}
