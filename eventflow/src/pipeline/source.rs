//! Where chunks come from.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::core::{BatchSchema, ChunkSpec, EventBatch};
use crate::errors::DataError;

/// Loads the events of one chunk.
///
/// Implementations must be shareable across workers. A failed load should
/// set [`DataError::retryable`] for transient conditions only.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Columns and collections every loaded batch provides.
    fn schema(&self) -> BatchSchema;

    /// Reads the entries of `chunk`.
    async fn load(&self, chunk: &ChunkSpec) -> Result<EventBatch, DataError>;
}

/// A source backed by whole files held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    files: BTreeMap<(String, String), EventBatch>,
}

impl InMemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the events of `file` for `sample`.
    #[must_use]
    pub fn with_file(mut self, sample: impl Into<String>, file: impl Into<String>, batch: EventBatch) -> Self {
        self.files.insert((sample.into(), file.into()), batch);
        self
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if no files are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl EventSource for InMemorySource {
    /// Intersection of every file's schema.
    fn schema(&self) -> BatchSchema {
        let mut schemas = self.files.values().map(EventBatch::schema);
        let Some(mut common) = schemas.next() else {
            return BatchSchema::default();
        };
        for schema in schemas {
            common.intersect(&schema);
        }
        common
    }

    async fn load(&self, chunk: &ChunkSpec) -> Result<EventBatch, DataError> {
        let id = &chunk.id;
        let batch = self
            .files
            .get(&(id.sample.clone(), id.file.clone()))
            .ok_or_else(|| DataError::malformed(format!("no file '{}' for sample '{}'", id.file, id.sample)))?;
        let start = usize::try_from(id.entry_start).map_err(|e| DataError::malformed(e.to_string()))?;
        let stop = usize::try_from(id.entry_stop).map_err(|e| DataError::malformed(e.to_string()))?;
        batch.slice(start, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnData;

    fn batch(n: usize) -> EventBatch {
        EventBatch::new(n)
            .with_column("x", ColumnData::Float((0..n).map(|i| i as f64).collect()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_slices_file() {
        let source = InMemorySource::new().with_file("s", "f.root", batch(10));
        let loaded = source.load(&ChunkSpec::new("s", "f.root", 4, 7)).await.unwrap();
        assert_eq!(loaded.n_events(), 3);
        assert_eq!(loaded.column("x").unwrap().value(0), 4.0);
    }

    #[tokio::test]
    async fn test_load_errors() {
        let source = InMemorySource::new().with_file("s", "f.root", batch(10));
        let missing = source.load(&ChunkSpec::new("s", "g.root", 0, 1)).await.unwrap_err();
        assert!(!missing.retryable);
        assert!(source.load(&ChunkSpec::new("s", "f.root", 5, 20)).await.is_err());
    }

    #[test]
    fn test_schema_is_common_subset() {
        let wide = batch(2).with_column("y", ColumnData::Bool(vec![true, false])).unwrap();
        let source = InMemorySource::new()
            .with_file("s", "a.root", wide)
            .with_file("s", "b.root", batch(3));
        let schema = source.schema();
        assert!(schema.provides("x"));
        assert!(!schema.provides("y"));
    }
}
