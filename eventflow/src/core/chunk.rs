//! Chunk identifiers and descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies an independently processable slice of the input dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    /// Sample (dataset) name.
    pub sample: String,
    /// File the events come from.
    pub file: String,
    /// First entry (inclusive).
    pub entry_start: u64,
    /// Last entry (exclusive).
    pub entry_stop: u64,
}

impl ChunkId {
    /// Creates a new chunk identifier.
    #[must_use]
    pub fn new(sample: impl Into<String>, file: impl Into<String>, entry_start: u64, entry_stop: u64) -> Self {
        Self {
            sample: sample.into(),
            file: file.into(),
            entry_start,
            entry_stop,
        }
    }

    /// Number of entries covered.
    #[must_use]
    pub fn n_entries(&self) -> u64 {
        self.entry_stop.saturating_sub(self.entry_start)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}[{}..{}]",
            self.sample, self.file, self.entry_start, self.entry_stop
        )
    }
}

/// A chunk plus the sample-level facts needed to process it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// The chunk identifier.
    pub id: ChunkId,
    /// Data-taking year.
    #[serde(default)]
    pub year: String,
    /// Whether the sample is collision data.
    #[serde(default)]
    pub is_data: bool,
    /// Numeric sample metadata (cross-section, luminosity, sum of weights).
    #[serde(default)]
    pub metadata: BTreeMap<String, f64>,
}

impl ChunkSpec {
    /// Creates a simulation chunk.
    #[must_use]
    pub fn new(sample: impl Into<String>, file: impl Into<String>, entry_start: u64, entry_stop: u64) -> Self {
        Self {
            id: ChunkId::new(sample, file, entry_start, entry_stop),
            year: String::new(),
            is_data: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the year.
    #[must_use]
    pub fn with_year(mut self, year: impl Into<String>) -> Self {
        self.year = year.into();
        self
    }

    /// Marks the chunk as collision data.
    #[must_use]
    pub fn as_data(mut self) -> Self {
        self.is_data = true;
        self
    }

    /// Adds a metadata value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The sample name.
    #[must_use]
    pub fn sample(&self) -> &str {
        &self.id.sample
    }

    /// Splits the chunk at absolute entry `at` into two sub-chunks.
    ///
    /// Returns `None` if `at` is not strictly inside the entry range.
    #[must_use]
    pub fn split_at(&self, at: u64) -> Option<(Self, Self)> {
        if at <= self.id.entry_start || at >= self.id.entry_stop {
            return None;
        }
        let mut head = self.clone();
        head.id.entry_stop = at;
        let mut tail = self.clone();
        tail.id.entry_start = at;
        Some((head, tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_display() {
        let id = ChunkId::new("DATA_SingleMuon", "a.root", 10, 20);
        assert_eq!(id.to_string(), "DATA_SingleMuon:a.root[10..20]");
        assert_eq!(id.n_entries(), 10);
    }

    #[test]
    fn test_split_chunk() {
        let chunk = ChunkSpec::new("TTTo2L2Nu", "a.root", 0, 10)
            .with_year("2018")
            .with_metadata("xsec", 88.3);
        let (head, tail) = chunk.split_at(4).unwrap();
        assert_eq!(head.id.entry_stop, 4);
        assert_eq!(tail.id.entry_start, 4);
        assert_eq!(tail.metadata.get("xsec"), Some(&88.3));
        assert!(chunk.split_at(0).is_none());
        assert!(chunk.split_at(10).is_none());
    }
}
