//! Filling histograms and extracting raw columns from a selected view.

use super::spec::{Axis, ColumnSpec};
use super::Hist;
use crate::core::{ChunkId, ColumnData, EventBatch, ObjectCollection};
use crate::errors::{DataError, MergeError};
use crate::selection::Mask;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

enum AxisSource<'a> {
    Event(&'a ColumnData),
    Object {
        collection: &'a ObjectCollection,
        values: &'a [f64],
        pos: Option<usize>,
    },
}

impl<'a> AxisSource<'a> {
    fn resolve(batch: &'a EventBatch, axis: &Axis) -> Result<Self, DataError> {
        if axis.is_event_level() {
            return Ok(Self::Event(batch.require_column(&axis.field)?));
        }
        let collection = batch.require_collection(&axis.coll)?;
        Ok(Self::Object {
            collection,
            values: collection.require_field(&axis.coll, &axis.field)?,
            pos: axis.pos,
        })
    }

    /// Objects this axis contributes in `event`; `None` broadcasts.
    fn multiplicity(&self, event: usize) -> Option<usize> {
        match self {
            Self::Event(_) => None,
            Self::Object {
                collection,
                pos: Some(pos),
                ..
            } => Some(usize::from(collection.count(event) > *pos)),
            Self::Object { collection, .. } => Some(collection.count(event)),
        }
    }

    fn is_positional(&self) -> bool {
        matches!(self, Self::Event(_) | Self::Object { pos: Some(_), .. })
    }

    fn value(&self, event: usize, object: usize) -> f64 {
        match self {
            Self::Event(column) => column.value(event),
            Self::Object {
                collection,
                values,
                pos,
            } => {
                let start = collection.range(event).start;
                values[start + pos.unwrap_or(object)]
            }
        }
    }
}

/// Number of entries event `event` contributes, or an error when
/// object axes disagree.
fn event_multiplicity(sources: &[AxisSource<'_>], event: usize) -> Result<usize, DataError> {
    let mut shared: Option<usize> = None;
    for source in sources {
        let Some(m) = source.multiplicity(event) else {
            continue;
        };
        if m == 0 {
            return Ok(0);
        }
        if source.is_positional() {
            continue;
        }
        match shared {
            Some(existing) if existing != m => {
                return Err(DataError::malformed(format!(
                    "histogram axes have different multiplicities in event {event} ({existing} vs {m})"
                )));
            }
            _ => shared = Some(m),
        }
    }
    Ok(shared.unwrap_or(1))
}

/// Fills `hist` with the selected events of `batch`.
///
/// Object axes fill once per object with the event weight broadcast.
/// Without `weights` every entry has weight 1.0.
///
/// # Errors
///
/// Returns an error if an axis input is missing, the mask or weights have
/// the wrong length, or object axes disagree on multiplicity.
pub fn fill_histogram(
    hist: &mut Hist,
    batch: &EventBatch,
    axes: &[Axis],
    mask: &Mask,
    weights: Option<&[f64]>,
) -> Result<(), DataError> {
    check_lengths(batch, mask, weights)?;
    let sources = axes
        .iter()
        .map(|axis| AxisSource::resolve(batch, axis))
        .collect::<Result<Vec<_>, _>>()?;

    let mut coords = vec![0.0; sources.len()];
    for event in mask.indices() {
        let weight = weights.map_or(1.0, |w| w[event]);
        for object in 0..event_multiplicity(&sources, event)? {
            for (coord, source) in coords.iter_mut().zip(&sources) {
                *coord = source.value(event, object);
            }
            hist.fill(&coords, weight);
        }
    }
    Ok(())
}

fn check_lengths(batch: &EventBatch, mask: &Mask, weights: Option<&[f64]>) -> Result<(), DataError> {
    if mask.len() != batch.n_events() {
        return Err(DataError::length_mismatch("mask", batch.n_events(), mask.len()));
    }
    if let Some(w) = weights {
        if w.len() != batch.n_events() {
            return Err(DataError::length_mismatch("weights", batch.n_events(), w.len()));
        }
    }
    Ok(())
}

/// Raw values exported from one chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnPart {
    /// Objects per selected event; empty for event-level exports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counts: Vec<usize>,
    /// Flat values per field.
    pub fields: IndexMap<String, Vec<f64>>,
    /// One weight per selected event.
    pub weights: Vec<f64>,
}

impl ColumnPart {
    /// Number of selected events.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.weights.len()
    }
}

/// Extracts the selected events' values for a column export.
///
/// # Errors
///
/// Returns an error if an input is missing or lengths disagree.
pub fn extract_columns(
    batch: &EventBatch,
    spec: &ColumnSpec,
    mask: &Mask,
    weights: Option<&[f64]>,
) -> Result<ColumnPart, DataError> {
    check_lengths(batch, mask, weights)?;
    let selected: Vec<usize> = mask.indices().collect();
    let event_weights = selected
        .iter()
        .map(|&i| weights.map_or(1.0, |w| w[i]))
        .collect();

    let mut part = ColumnPart {
        weights: event_weights,
        ..ColumnPart::default()
    };
    if spec.is_event_level() {
        for field in &spec.fields {
            let column = batch.require_column(field)?;
            part.fields
                .insert(field.clone(), selected.iter().map(|&i| column.value(i)).collect());
        }
        return Ok(part);
    }

    let collection = batch.require_collection(&spec.collection)?;
    part.counts = selected.iter().map(|&i| collection.count(i)).collect();
    for field in &spec.fields {
        let values = collection.require_field(&spec.collection, field)?;
        let flat = selected
            .iter()
            .flat_map(|&i| values[collection.range(i)].iter().copied())
            .collect();
        part.fields.insert(field.clone(), flat);
    }
    Ok(part)
}

/// Column parts of many chunks, ordered by chunk id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnAccumulator {
    parts: BTreeMap<ChunkId, ColumnPart>,
}

impl ColumnAccumulator {
    /// Accumulator holding one chunk's part.
    #[must_use]
    pub fn single(chunk: ChunkId, part: ColumnPart) -> Self {
        let mut parts = BTreeMap::new();
        parts.insert(chunk, part);
        Self { parts }
    }

    /// Parts in chunk order.
    #[must_use]
    pub fn parts(&self) -> &BTreeMap<ChunkId, ColumnPart> {
        &self.parts
    }

    /// Selected events over every part.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.parts.values().map(ColumnPart::n_events).sum()
    }

    /// Concatenated values of a field in chunk order.
    #[must_use]
    pub fn field(&self, name: &str) -> Vec<f64> {
        self.parts
            .values()
            .filter_map(|p| p.fields.get(name))
            .flatten()
            .copied()
            .collect()
    }

    /// Concatenated weights in chunk order.
    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        self.parts.values().flat_map(|p| p.weights.iter().copied()).collect()
    }

    /// Adds the parts of `other`.
    ///
    /// # Errors
    ///
    /// Returns an error if both sides hold a part for the same chunk.
    pub fn merge(&mut self, other: Self) -> Result<(), MergeError> {
        if let Some(chunk) = other.parts.keys().find(|c| self.parts.contains_key(*c)) {
            return Err(MergeError::DuplicateChunk { chunk: chunk.clone() });
        }
        self.parts.extend(other.parts);
        Ok(())
    }
}
