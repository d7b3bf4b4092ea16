//! The mergeable result of processing chunks.
//!
//! [`Output`] is a monoid: [`Output::default`] is the identity and
//! [`Output::merge`] adds histograms, sums, cut-flows and warnings key by
//! key. Column parts are keyed by chunk id so the merge order never changes
//! their layout. A chunk may contribute only once.

use crate::core::ChunkId;
use crate::errors::MergeError;
use crate::histogram::{ColumnAccumulator, ColumnPart, Hist};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifies one histogram or column export.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccumulatorKey {
    /// Sample name.
    pub sample: String,
    /// Variation label (`nominal`, `<name>Up`, `<name>Down`).
    pub variation: String,
    /// Category name.
    pub category: String,
    /// Histogram or column name.
    pub name: String,
}

impl AccumulatorKey {
    /// Creates a key.
    #[must_use]
    pub fn new(sample: &str, variation: &str, category: &str, name: &str) -> Self {
        Self {
            sample: sample.to_string(),
            variation: variation.to_string(),
            category: category.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for AccumulatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.sample, self.variation, self.category, self.name)
    }
}

/// Cut-flow stage before any selection.
pub const STAGE_INITIAL: &str = "initial";
/// Cut-flow stage after the skim.
pub const STAGE_SKIM: &str = "skim";
/// Cut-flow stage after skim and preselection.
pub const STAGE_PRESELECTION: &str = "presel";

/// Merged results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    histograms: BTreeMap<AccumulatorKey, Hist>,
    columns: BTreeMap<AccumulatorKey, ColumnAccumulator>,
    sum_genweights: BTreeMap<String, f64>,
    /// `(sample, stage)` -> events
    cutflow: BTreeMap<(String, String), u64>,
    /// `(sample, component)` -> clipped values
    numeric_warnings: BTreeMap<(String, String), u64>,
    chunks: BTreeSet<ChunkId>,
}

impl Output {
    /// Empty output attributed to `chunk`.
    #[must_use]
    pub fn for_chunk(chunk: ChunkId) -> Self {
        let mut out = Self::default();
        out.chunks.insert(chunk);
        out
    }

    /// Chunks that contributed.
    #[must_use]
    pub fn chunks(&self) -> &BTreeSet<ChunkId> {
        &self.chunks
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Every histogram.
    #[must_use]
    pub fn histograms(&self) -> &BTreeMap<AccumulatorKey, Hist> {
        &self.histograms
    }

    /// One histogram.
    #[must_use]
    pub fn histogram(&self, sample: &str, variation: &str, category: &str, name: &str) -> Option<&Hist> {
        self.histograms
            .get(&AccumulatorKey::new(sample, variation, category, name))
    }

    /// Every column export.
    #[must_use]
    pub fn columns(&self) -> &BTreeMap<AccumulatorKey, ColumnAccumulator> {
        &self.columns
    }

    /// One column export.
    #[must_use]
    pub fn column(&self, sample: &str, variation: &str, category: &str, name: &str) -> Option<&ColumnAccumulator> {
        self.columns
            .get(&AccumulatorKey::new(sample, variation, category, name))
    }

    /// Pre-selection sum of generator weights per sample.
    #[must_use]
    pub fn sum_genweights(&self, sample: &str) -> Option<f64> {
        self.sum_genweights.get(sample).copied()
    }

    /// Events at a cut-flow stage.
    #[must_use]
    pub fn cutflow(&self, sample: &str, stage: &str) -> u64 {
        self.cutflow
            .get(&(sample.to_string(), stage.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Non-finite values clipped for a component.
    #[must_use]
    pub fn numeric_warnings(&self, sample: &str, component: &str) -> u64 {
        self.numeric_warnings
            .get(&(sample.to_string(), component.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total clipped values.
    #[must_use]
    pub fn total_numeric_warnings(&self) -> u64 {
        self.numeric_warnings.values().sum()
    }

    pub(crate) fn insert_histogram(&mut self, key: AccumulatorKey, hist: Hist) {
        self.histograms.insert(key, hist);
    }

    pub(crate) fn insert_column(&mut self, key: AccumulatorKey, chunk: ChunkId, part: ColumnPart) {
        self.columns.insert(key, ColumnAccumulator::single(chunk, part));
    }

    pub(crate) fn add_sum_genweights(&mut self, sample: &str, value: f64) {
        *self.sum_genweights.entry(sample.to_string()).or_default() += value;
    }

    pub(crate) fn add_cutflow(&mut self, sample: &str, stage: &str, events: u64) {
        *self
            .cutflow
            .entry((sample.to_string(), stage.to_string()))
            .or_default() += events;
    }

    pub(crate) fn add_numeric_warnings(&mut self, sample: &str, component: &str, count: u64) {
        *self
            .numeric_warnings
            .entry((sample.to_string(), component.to_string()))
            .or_default() += count;
    }

    /// Adds `other` into `self`.
    ///
    /// Nothing is modified when an error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk is present on both sides or two
    /// histograms under the same key have different binning.
    pub fn merge(&mut self, other: Self) -> Result<(), MergeError> {
        if let Some(chunk) = other.chunks.intersection(&self.chunks).next() {
            return Err(MergeError::DuplicateChunk { chunk: chunk.clone() });
        }
        for (key, hist) in &other.histograms {
            if self.histograms.get(key).is_some_and(|h| !h.same_binning(hist)) {
                return Err(MergeError::IncompatibleBinning { key: key.to_string() });
            }
        }

        for (key, hist) in other.histograms {
            match self.histograms.get_mut(&key) {
                Some(existing) => existing.accumulate(&hist),
                None => {
                    self.histograms.insert(key, hist);
                }
            }
        }
        for (key, columns) in other.columns {
            match self.columns.get_mut(&key) {
                // chunk sets are disjoint, checked above
                Some(existing) => existing.merge(columns)?,
                None => {
                    self.columns.insert(key, columns);
                }
            }
        }
        for (sample, value) in other.sum_genweights {
            *self.sum_genweights.entry(sample).or_default() += value;
        }
        for (key, events) in other.cutflow {
            *self.cutflow.entry(key).or_default() += events;
        }
        for (key, count) in other.numeric_warnings {
            *self.numeric_warnings.entry(key).or_default() += count;
        }
        self.chunks.extend(other.chunks);
        Ok(())
    }

    /// Folds many outputs, starting from the identity.
    ///
    /// # Errors
    ///
    /// Returns the first merge error.
    pub fn merge_all(outputs: impl IntoIterator<Item = Self>) -> Result<Self, MergeError> {
        outputs.into_iter().try_fold(Self::default(), |mut acc, out| {
            acc.merge(out)?;
            Ok(acc)
        })
    }

    /// SHA-256 of the logical content, hex encoded.
    ///
    /// Floats are hashed by their exact bit patterns.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let mut text = |s: &str| {
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        };
        let mut buffer: Vec<u8> = Vec::new();

        for (key, hist) in &self.histograms {
            text(&key.to_string());
            for edges in hist.edges() {
                push_floats(&mut buffer, edges);
            }
            push_floats(&mut buffer, hist.sumw());
            push_floats(&mut buffer, hist.sumw2());
            buffer.extend(hist.entries().to_le_bytes());
            buffer.extend(hist.nan_entries().to_le_bytes());
            text(&hex::encode(&buffer));
            buffer.clear();
        }
        for (key, columns) in &self.columns {
            text(&key.to_string());
            for (chunk, part) in columns.parts() {
                text(&chunk.to_string());
                for count in &part.counts {
                    buffer.extend((*count as u64).to_le_bytes());
                }
                for (field, values) in &part.fields {
                    buffer.extend(field.as_bytes());
                    push_floats(&mut buffer, values);
                }
                push_floats(&mut buffer, &part.weights);
                text(&hex::encode(&buffer));
                buffer.clear();
            }
        }
        for (sample, value) in &self.sum_genweights {
            text(sample);
            text(&value.to_bits().to_string());
        }
        for ((sample, stage), events) in &self.cutflow {
            text(&format!("cutflow/{sample}/{stage}={events}"));
        }
        for ((sample, component), count) in &self.numeric_warnings {
            text(&format!("warning/{sample}/{component}={count}"));
        }
        for chunk in &self.chunks {
            text(&chunk.to_string());
        }
        hex::encode(hasher.finalize())
    }

    /// Nested JSON layout `sample -> variation -> category -> name`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut histograms = Map::new();
        for (key, hist) in &self.histograms {
            insert_nested(&mut histograms, key, json!({
                "edges": hist.edges(),
                "sumw": hist.sumw(),
                "sumw2": hist.sumw2(),
                "entries": hist.entries(),
                "nan_entries": hist.nan_entries(),
            }));
        }

        let mut columns = Map::new();
        for (key, acc) in &self.columns {
            let fields: Map<String, Value> = acc
                .parts()
                .values()
                .flat_map(|p| p.fields.keys())
                .map(|f| (f.clone(), json!(acc.field(f))))
                .collect();
            let counts: Vec<usize> = acc.parts().values().flat_map(|p| p.counts.iter().copied()).collect();
            insert_nested(&mut columns, key, json!({
                "chunks": acc.parts().keys().map(ToString::to_string).collect::<Vec<_>>(),
                "counts": counts,
                "fields": fields,
                "weights": acc.weights(),
            }));
        }

        let mut cutflow = Map::new();
        for ((sample, stage), events) in &self.cutflow {
            let entry = cutflow
                .entry(stage.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                map.insert(sample.clone(), json!(events));
            }
        }

        let mut warnings = Map::new();
        for ((sample, component), count) in &self.numeric_warnings {
            let entry = warnings
                .entry(sample.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                map.insert(component.clone(), json!(count));
            }
        }

        json!({
            "histograms": histograms,
            "columns": columns,
            "sum_genweights": self.sum_genweights,
            "cutflow": cutflow,
            "numeric_warnings": warnings,
            "chunks": self.chunks.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })
    }

    /// Compares two outputs, allowing `tolerance` on floating point sums.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        let hists = self.histograms.len() == other.histograms.len()
            && self.histograms.iter().all(|(key, hist)| {
                other
                    .histograms
                    .get(key)
                    .is_some_and(|h| hist.approx_eq(h, tolerance))
            });
        let sums = self.sum_genweights.len() == other.sum_genweights.len()
            && self.sum_genweights.iter().all(|(sample, value)| {
                other
                    .sum_genweights
                    .get(sample)
                    .is_some_and(|v| (v - value).abs() <= tolerance)
            });
        hists
            && sums
            && self.cutflow == other.cutflow
            && self.numeric_warnings == other.numeric_warnings
            && self.columns.keys().eq(other.columns.keys())
            && self
                .columns
                .iter()
                .all(|(key, acc)| other.columns.get(key).is_some_and(|o| acc.n_events() == o.n_events()))
    }
}

fn push_floats(buffer: &mut Vec<u8>, values: &[f64]) {
    for v in values {
        buffer.extend(v.to_bits().to_le_bytes());
    }
}

fn insert_nested(root: &mut Map<String, Value>, key: &AccumulatorKey, leaf: Value) {
    let mut node = root;
    for part in [&key.sample, &key.variation, &key.category] {
        let entry = node
            .entry(part.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(map) = entry else {
            return;
        };
        node = map;
    }
    node.insert(key.name.clone(), leaf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(start: u64) -> ChunkId {
        ChunkId::new("TTTo2L2Nu", "a.root", start, start + 10)
    }

    fn output(start: u64, value: f64) -> Output {
        let mut out = Output::for_chunk(chunk(start));
        let mut hist = Hist::new(vec![vec![0.0, 1.0, 2.0]]);
        hist.fill(&[value], 1.5);
        out.insert_histogram(AccumulatorKey::new("TTTo2L2Nu", "nominal", "baseline", "x"), hist);
        out.add_sum_genweights("TTTo2L2Nu", 10.0);
        out.add_cutflow("TTTo2L2Nu", STAGE_SKIM, 3);
        out
    }

    #[test]
    fn test_identity() {
        let mut merged = Output::default();
        merged.merge(output(0, 0.5)).unwrap();
        assert_eq!(merged, output(0, 0.5));
        assert!(Output::default().is_empty());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let ab = Output::merge_all([output(0, 0.5), output(10, 1.5), output(20, 0.5)]).unwrap();
        let ba = Output::merge_all([output(20, 0.5), output(0, 0.5), output(10, 1.5)]).unwrap();
        assert!(ab.approx_eq(&ba, 1e-12));
        assert_eq!(ab.digest(), ba.digest());
        assert_eq!(ab.cutflow("TTTo2L2Nu", STAGE_SKIM), 9);
        assert_eq!(ab.sum_genweights("TTTo2L2Nu"), Some(30.0));
        let hist = ab.histogram("TTTo2L2Nu", "nominal", "baseline", "x").unwrap();
        assert_eq!(hist.sumw(), &[0.0, 3.0, 1.5, 0.0]);
    }

    #[test]
    fn test_duplicate_chunk_rejected() {
        let mut merged = output(0, 0.5);
        let err = merged.merge(output(0, 0.5)).unwrap_err();
        assert_eq!(err, MergeError::DuplicateChunk { chunk: chunk(0) });
        assert_eq!(merged, output(0, 0.5));
    }

    #[test]
    fn test_incompatible_binning_rejected() {
        let mut other = Output::for_chunk(chunk(10));
        other.insert_histogram(
            AccumulatorKey::new("TTTo2L2Nu", "nominal", "baseline", "x"),
            Hist::new(vec![vec![0.0, 5.0]]),
        );
        let mut merged = output(0, 0.5);
        let err = merged.merge(other).unwrap_err();
        assert!(matches!(err, MergeError::IncompatibleBinning { .. }));
    }

    #[test]
    fn test_json_layout() {
        let mut out = output(0, 0.5);
        out.add_numeric_warnings("TTTo2L2Nu", "genWeight", 2);
        let value = out.to_json();
        assert_eq!(value["histograms"]["TTTo2L2Nu"]["nominal"]["baseline"]["x"]["entries"], 1);
        assert_eq!(value["cutflow"]["skim"]["TTTo2L2Nu"], 3);
        assert_eq!(value["numeric_warnings"]["TTTo2L2Nu"]["genWeight"], 2);
        assert_eq!(value["chunks"][0], "TTTo2L2Nu:a.root[0..10]");
    }

    #[test]
    fn test_digest_changes_with_content() {
        assert_ne!(output(0, 0.5).digest(), output(0, 1.5).digest());
        assert_eq!(output(0, 0.5).digest(), output(0, 0.5).digest());
    }
}
