//! Columnar event batches and jagged object collections.
//!
//! Batches are immutable: every column and collection sits behind an `Arc`,
//! and "modifying" a batch means building a new one that shares everything
//! it did not replace.

use crate::errors::DataError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;

/// Element type of an event-level column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 64-bit floats.
    Float,
    /// 64-bit signed integers.
    Int,
    /// Booleans.
    Bool,
}

/// Typed storage for one event-level column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ColumnData {
    /// Floating point values.
    Float(Vec<f64>),
    /// Integer values.
    Int(Vec<i64>),
    /// Boolean flags.
    Bool(Vec<bool>),
}

impl ColumnData {
    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    /// Returns true if the column has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element type.
    #[must_use]
    pub fn dtype(&self) -> ColumnType {
        match self {
            Self::Float(_) => ColumnType::Float,
            Self::Int(_) => ColumnType::Int,
            Self::Bool(_) => ColumnType::Bool,
        }
    }

    /// Value of entry `i` as a float (`true` is 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, i: usize) -> f64 {
        match self {
            Self::Float(v) => v[i],
            Self::Int(v) => v[i] as f64,
            Self::Bool(v) => {
                if v[i] {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Truth value of entry `i`: booleans as-is, numbers when non-zero.
    #[must_use]
    pub fn truthy(&self, i: usize) -> bool {
        match self {
            Self::Bool(v) => v[i],
            Self::Int(v) => v[i] != 0,
            Self::Float(v) => v[i] != 0.0,
        }
    }

    /// Converts the whole column to floats.
    #[must_use]
    pub fn to_f64(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }

    /// Copies entries `start..stop`.
    #[must_use]
    pub fn slice(&self, start: usize, stop: usize) -> Self {
        match self {
            Self::Float(v) => Self::Float(v[start..stop].to_vec()),
            Self::Int(v) => Self::Int(v[start..stop].to_vec()),
            Self::Bool(v) => Self::Bool(v[start..stop].to_vec()),
        }
    }
}

/// Per-event variable-length records (jets, electrons, ...).
///
/// Stored as offsets plus one flat numeric array per field. `offsets` has
/// one more entry than there are events and always starts at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCollection {
    offsets: Vec<usize>,
    fields: BTreeMap<String, Arc<Vec<f64>>>,
}

impl ObjectCollection {
    /// Creates an empty-field collection from per-event object counts.
    #[must_use]
    pub fn from_counts(counts: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        offsets.push(0);
        let mut total = 0;
        for count in counts {
            total += count;
            offsets.push(total);
        }
        Self {
            offsets,
            fields: BTreeMap::new(),
        }
    }

    /// Creates a collection from explicit offsets.
    ///
    /// # Errors
    ///
    /// Returns an error if the offsets are empty, do not start at zero, or
    /// decrease.
    pub fn from_offsets(offsets: Vec<usize>) -> Result<Self, DataError> {
        if offsets.first() != Some(&0) {
            return Err(DataError::malformed("collection offsets must start at 0"));
        }
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(DataError::malformed("collection offsets must be non-decreasing"));
        }
        Ok(Self {
            offsets,
            fields: BTreeMap::new(),
        })
    }

    /// Adds a field; the array holds one value per object.
    ///
    /// # Errors
    ///
    /// Returns an error if the array length differs from the object count.
    pub fn with_field(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self, DataError> {
        let name = name.into();
        if values.len() != self.n_objects() {
            return Err(DataError::length_mismatch(name, self.n_objects(), values.len()));
        }
        self.fields.insert(name, Arc::new(values));
        Ok(self)
    }

    /// Returns a copy with one field replaced, sharing every other field.
    ///
    /// # Errors
    ///
    /// Returns an error if the array length differs from the object count.
    pub fn replace_field(&self, name: &str, values: Vec<f64>) -> Result<Self, DataError> {
        self.clone().with_field(name, values)
    }

    /// Number of events.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of objects across all events.
    #[must_use]
    pub fn n_objects(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Number of objects in event `event`.
    #[must_use]
    pub fn count(&self, event: usize) -> usize {
        self.offsets[event + 1] - self.offsets[event]
    }

    /// Object counts for every event.
    #[must_use]
    pub fn counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Flat index range of the objects in event `event`.
    #[must_use]
    pub fn range(&self, event: usize) -> Range<usize> {
        self.offsets[event]..self.offsets[event + 1]
    }

    /// Offsets array.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Flat values of a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&[f64]> {
        self.fields.get(name).map(|v| v.as_slice())
    }

    /// Flat values of a field, or a data error naming `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field does not exist.
    pub fn require_field(&self, collection: &str, name: &str) -> Result<&[f64], DataError> {
        self.field(name)
            .ok_or_else(|| DataError::missing_field(collection, name))
    }

    /// Field names, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Keeps the objects whose flag in `keep` is true.
    ///
    /// # Errors
    ///
    /// Returns an error if `keep` does not have one flag per object.
    pub fn filter(&self, keep: &[bool]) -> Result<Self, DataError> {
        if keep.len() != self.n_objects() {
            return Err(DataError::length_mismatch("object mask", self.n_objects(), keep.len()));
        }
        let mut offsets = Vec::with_capacity(self.offsets.len());
        offsets.push(0);
        let mut total = 0;
        for event in 0..self.n_events() {
            total += self.range(event).filter(|&j| keep[j]).count();
            offsets.push(total);
        }
        let fields = self
            .fields
            .iter()
            .map(|(name, values)| {
                let kept: Vec<f64> = values
                    .iter()
                    .zip(keep)
                    .filter_map(|(v, k)| k.then_some(*v))
                    .collect();
                (name.clone(), Arc::new(kept))
            })
            .collect();
        Ok(Self { offsets, fields })
    }

    /// Copies events `start..stop`.
    #[must_use]
    pub fn slice(&self, start: usize, stop: usize) -> Self {
        let lo = self.offsets[start];
        let hi = self.offsets[stop];
        let offsets = self.offsets[start..=stop].iter().map(|o| o - lo).collect();
        let fields = self
            .fields
            .iter()
            .map(|(name, values)| (name.clone(), Arc::new(values[lo..hi].to_vec())))
            .collect();
        Self { offsets, fields }
    }
}

/// Names of the columns and collections a batch (or a source) provides.
///
/// `fields` lists the object fields of a collection when they are known.
/// Collections produced by a later step may have no entry; their fields are
/// only checked once a chunk is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSchema {
    /// Event-level column names.
    #[serde(default)]
    pub columns: BTreeSet<String>,
    /// Collection names.
    #[serde(default)]
    pub collections: BTreeSet<String>,
    /// Collection name -> field names.
    #[serde(default)]
    pub fields: BTreeMap<String, BTreeSet<String>>,
}

impl BatchSchema {
    /// Returns true if `name` is a column or a collection.
    #[must_use]
    pub fn provides(&self, name: &str) -> bool {
        self.columns.contains(name) || self.collections.contains(name)
    }

    /// Returns true if `collection` exists and `field` is not known to be absent.
    #[must_use]
    pub fn provides_field(&self, collection: &str, field: &str) -> bool {
        self.collections.contains(collection)
            && self.fields.get(collection).map_or(true, |fields| fields.contains(field))
    }

    /// Adds a collection with unknown fields, or keeps an existing one as is.
    pub fn add_collection(&mut self, name: &str) {
        self.collections.insert(name.to_string());
    }

    /// Adds or replaces `name` with the fields of `source`, if known.
    pub fn derive_collection(&mut self, name: &str, source: &str) {
        let fields = self.fields.get(source).cloned();
        self.collections.insert(name.to_string());
        match fields {
            Some(fields) => {
                self.fields.insert(name.to_string(), fields);
            }
            None => {
                self.fields.remove(name);
            }
        }
    }

    /// Keeps only what both schemas provide.
    pub fn intersect(&mut self, other: &Self) {
        self.columns.retain(|c| other.columns.contains(c));
        self.collections.retain(|c| other.collections.contains(c));
        let collections = &self.collections;
        self.fields
            .retain(|name, _| collections.contains(name) && other.fields.contains_key(name));
        for (name, fields) in &mut self.fields {
            if let Some(theirs) = other.fields.get(name) {
                fields.retain(|f| theirs.contains(f));
            }
        }
    }
}

/// A columnar chunk of events.
#[derive(Debug, Clone)]
pub struct EventBatch {
    n_events: usize,
    columns: BTreeMap<String, Arc<ColumnData>>,
    collections: BTreeMap<String, Arc<ObjectCollection>>,
}

impl EventBatch {
    /// Creates an empty batch of `n_events` events.
    #[must_use]
    pub fn new(n_events: usize) -> Self {
        Self {
            n_events,
            columns: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }

    /// Returns a batch with the column added or replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the column length differs from the event count.
    pub fn with_column(mut self, name: impl Into<String>, data: ColumnData) -> Result<Self, DataError> {
        let name = name.into();
        if data.len() != self.n_events {
            return Err(DataError::length_mismatch(name, self.n_events, data.len()));
        }
        self.columns.insert(name, Arc::new(data));
        Ok(self)
    }

    /// Returns a batch with the collection added or replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection's event count differs.
    pub fn with_collection(
        mut self,
        name: impl Into<String>,
        collection: ObjectCollection,
    ) -> Result<Self, DataError> {
        let name = name.into();
        if collection.n_events() != self.n_events {
            return Err(DataError::length_mismatch(name, self.n_events, collection.n_events()));
        }
        self.collections.insert(name, Arc::new(collection));
        Ok(self)
    }

    /// Number of events.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Looks up a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.get(name).map(AsRef::as_ref)
    }

    /// Looks up a column, failing with a data error.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist.
    pub fn require_column(&self, name: &str) -> Result<&ColumnData, DataError> {
        self.column(name).ok_or_else(|| DataError::missing_column(name))
    }

    /// Looks up a collection.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&ObjectCollection> {
        self.collections.get(name).map(AsRef::as_ref)
    }

    /// Looks up a collection, failing with a data error.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection does not exist.
    pub fn require_collection(&self, name: &str) -> Result<&ObjectCollection, DataError> {
        self.collection(name)
            .ok_or_else(|| DataError::missing_collection(name))
    }

    /// True when both batches hold the very same collection allocation.
    #[must_use]
    pub fn shares_collection(&self, other: &Self, name: &str) -> bool {
        match (self.collections.get(name), other.collections.get(name)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Column and collection names.
    #[must_use]
    pub fn schema(&self) -> BatchSchema {
        BatchSchema {
            columns: self.columns.keys().cloned().collect(),
            collections: self.collections.keys().cloned().collect(),
            fields: self
                .collections
                .iter()
                .map(|(name, coll)| (name.clone(), coll.field_names().map(str::to_string).collect()))
                .collect(),
        }
    }

    /// Copies events `start..stop` into a new batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds.
    pub fn slice(&self, start: usize, stop: usize) -> Result<Self, DataError> {
        if start > stop || stop > self.n_events {
            return Err(DataError::malformed(format!(
                "slice {start}..{stop} out of range for {} events",
                self.n_events
            )));
        }
        Ok(Self {
            n_events: stop - start,
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), Arc::new(col.slice(start, stop))))
                .collect(),
            collections: self
                .collections
                .iter()
                .map(|(name, coll)| (name.clone(), Arc::new(coll.slice(start, stop))))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jets() -> ObjectCollection {
        ObjectCollection::from_counts(&[2, 0, 1])
            .with_field("pt", vec![50.0, 20.0, 35.0])
            .unwrap()
    }

    #[test]
    fn test_collection_counts_and_ranges() {
        let coll = jets();
        assert_eq!(coll.n_events(), 3);
        assert_eq!(coll.n_objects(), 3);
        assert_eq!(coll.counts(), vec![2, 0, 1]);
        assert_eq!(coll.range(2), 2..3);
    }

    #[test]
    fn test_field_length_checked() {
        let result = ObjectCollection::from_counts(&[1, 1]).with_field("pt", vec![1.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_objects() {
        let filtered = jets().filter(&[true, false, true]).unwrap();
        assert_eq!(filtered.counts(), vec![1, 0, 1]);
        assert_eq!(filtered.field("pt").unwrap(), &[50.0, 35.0]);
    }

    #[test]
    fn test_bad_offsets_rejected() {
        assert!(ObjectCollection::from_offsets(vec![1, 2]).is_err());
        assert!(ObjectCollection::from_offsets(vec![0, 3, 2]).is_err());
        assert!(ObjectCollection::from_offsets(vec![]).is_err());
    }

    #[test]
    fn test_with_collection_keeps_original() {
        let original = EventBatch::new(3).with_collection("Jet", jets()).unwrap();
        let scaled = jets().replace_field("pt", vec![1.0, 2.0, 3.0]).unwrap();
        let corrected = original.clone().with_collection("Jet", scaled).unwrap();

        let before = original.collection("Jet").unwrap().field("pt").unwrap();
        assert_eq!(before, &[50.0, 20.0, 35.0]);
        let after = corrected.collection("Jet").unwrap().field("pt").unwrap();
        assert_eq!(after, &[1.0, 2.0, 3.0]);
        assert!(!original.shares_collection(&corrected, "Jet"));
    }

    #[test]
    fn test_slice_batch() {
        let batch = EventBatch::new(3)
            .with_column("n", ColumnData::Int(vec![1, 2, 3]))
            .unwrap()
            .with_collection("Jet", jets())
            .unwrap();
        let tail = batch.slice(1, 3).unwrap();
        assert_eq!(tail.n_events(), 2);
        assert_eq!(tail.column("n").unwrap(), &ColumnData::Int(vec![2, 3]));
        let jet = tail.collection("Jet").unwrap();
        assert_eq!(jet.counts(), vec![0, 1]);
        assert_eq!(jet.field("pt").unwrap(), &[35.0]);
        assert!(batch.slice(2, 5).is_err());
    }

    #[test]
    fn test_column_values() {
        let col = ColumnData::Bool(vec![true, false]);
        assert_eq!(col.value(0), 1.0);
        assert!(!col.truthy(1));
        assert_eq!(col.dtype(), ColumnType::Bool);
        assert!(EventBatch::new(3)
            .with_column("x", ColumnData::Float(vec![1.0]))
            .is_err());
    }

    #[test]
    fn test_schema_tracks_fields() {
        let batch = EventBatch::new(3).with_collection("Jet", jets()).unwrap();
        let mut schema = batch.schema();
        assert!(schema.provides_field("Jet", "pt"));
        assert!(!schema.provides_field("Jet", "mass"));
        assert!(!schema.provides_field("Muon", "pt"));

        schema.derive_collection("JetGood", "Jet");
        assert!(schema.provides_field("JetGood", "pt"));
        assert!(!schema.provides_field("JetGood", "mass"));

        schema.add_collection("Jet_raw");
        assert!(schema.provides_field("Jet_raw", "anything"));
    }

    #[test]
    fn test_schema_intersection_drops_fields() {
        let with_mass = jets().with_field("mass", vec![1.0, 2.0, 3.0]).unwrap();
        let mut schema = EventBatch::new(3).with_collection("Jet", with_mass).unwrap().schema();
        schema.intersect(&EventBatch::new(3).with_collection("Jet", jets()).unwrap().schema());
        assert!(schema.provides_field("Jet", "pt"));
        assert!(!schema.provides_field("Jet", "mass"));
    }
}
