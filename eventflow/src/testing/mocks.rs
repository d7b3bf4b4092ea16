//! Mock event sources for runner tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::core::{BatchSchema, ChunkId, ChunkSpec, EventBatch};
use crate::errors::DataError;
use crate::pipeline::{EventSource, InMemorySource};

/// Wraps a source and fails selected loads.
///
/// Chunks of files marked with [`failing_times`](Self::failing_times) fail
/// with a retryable read error that many times before loading normally;
/// chunks of files marked [`broken`](Self::broken) always fail with a
/// non-retryable error.
#[derive(Debug)]
pub struct FlakySource {
    inner: InMemorySource,
    transient: BTreeMap<String, usize>,
    broken: BTreeSet<String>,
    delay: Option<Duration>,
    loads: Mutex<BTreeMap<ChunkId, usize>>,
}

impl FlakySource {
    /// Wraps `inner` without injecting failures.
    #[must_use]
    pub fn new(inner: InMemorySource) -> Self {
        Self {
            inner,
            transient: BTreeMap::new(),
            broken: BTreeSet::new(),
            delay: None,
            loads: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fails each chunk of `file` `times` times before succeeding.
    #[must_use]
    pub fn failing_times(mut self, file: impl Into<String>, times: usize) -> Self {
        self.transient.insert(file.into(), times);
        self
    }

    /// Fails every chunk of `file` permanently.
    #[must_use]
    pub fn broken(mut self, file: impl Into<String>) -> Self {
        self.broken.insert(file.into());
        self
    }

    /// Sleeps before every load.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Load attempts made for `chunk`.
    #[must_use]
    pub fn loads(&self, chunk: &ChunkId) -> usize {
        self.loads.lock().get(chunk).copied().unwrap_or(0)
    }

    /// Load attempts across every chunk.
    #[must_use]
    pub fn total_loads(&self) -> usize {
        self.loads.lock().values().sum()
    }
}

#[async_trait]
impl EventSource for FlakySource {
    fn schema(&self) -> BatchSchema {
        self.inner.schema()
    }

    async fn load(&self, chunk: &ChunkSpec) -> Result<EventBatch, DataError> {
        let attempt = {
            let mut loads = self.loads.lock();
            let count = loads.entry(chunk.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.contains(&chunk.id.file) {
            return Err(DataError::malformed(format!("corrupt basket in '{}'", chunk.id.file)));
        }
        if self.transient.get(&chunk.id.file).is_some_and(|times| attempt <= *times) {
            return Err(DataError::io(format!("timeout reading '{}'", chunk.id.file)));
        }
        self.inner.load(chunk).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scenario_batch, scenario_chunk, SCENARIO_SAMPLE};

    fn source() -> FlakySource {
        let inner = InMemorySource::new().with_file(SCENARIO_SAMPLE, "a.root", scenario_batch().unwrap());
        FlakySource::new(inner).failing_times("a.root", 2)
    }

    #[test]
    fn test_transient_failures_then_success() {
        let source = source();
        let chunk = scenario_chunk("a.root", 0, 5);

        let first = tokio_test::block_on(source.load(&chunk)).unwrap_err();
        assert!(first.retryable);
        assert!(tokio_test::block_on(source.load(&chunk)).is_err());
        let batch = tokio_test::block_on(source.load(&chunk)).unwrap();

        assert_eq!(batch.n_events(), 5);
        assert_eq!(source.loads(&chunk.id), 3);
    }

    #[test]
    fn test_broken_file_is_not_retryable() {
        let source = source().broken("a.root");
        let chunk = scenario_chunk("a.root", 0, 10);

        let error = tokio_test::block_on(source.load(&chunk)).unwrap_err();
        assert!(!error.retryable);
        assert_eq!(source.total_loads(), 1);
    }
}
