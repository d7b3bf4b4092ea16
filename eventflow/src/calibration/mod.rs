//! Calibrator chain.
//!
//! Calibrators correct object collections and own the shape variations of
//! those corrections. The chain runs them in declaration order for the
//! nominal pass and re-runs only the affected tail for each shape variation.

mod builtin;
mod chain;

pub use builtin::{Factor, MetPropagationCalibrator, ScaleCalibrator, ScaleVariation};
pub use chain::{CalibratedViews, CalibratorChain};

use crate::core::{ColumnData, Direction, EventBatch, ObjectCollection, Variation};
use crate::errors::DataError;
use std::fmt;

/// A shape variation declared by a calibrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredVariation {
    /// Variation name.
    pub name: String,
    /// Directions the calibrator can produce.
    pub directions: Vec<Direction>,
}

impl DeclaredVariation {
    /// A variation with both directions.
    #[must_use]
    pub fn up_down(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directions: vec![Direction::Up, Direction::Down],
        }
    }

    /// Returns true if both up and down are declared.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.directions.contains(&Direction::Up) && self.directions.contains(&Direction::Down)
    }
}

/// Collections and columns produced by one calibrator call.
#[derive(Debug, Clone, Default)]
pub struct CalibratorOutput {
    collections: Vec<(String, ObjectCollection)>,
    columns: Vec<(String, ColumnData)>,
}

impl CalibratorOutput {
    /// Creates an empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collection.
    #[must_use]
    pub fn with_collection(mut self, name: impl Into<String>, collection: ObjectCollection) -> Self {
        self.collections.push((name.into(), collection));
        self
    }

    /// Adds an event-level column.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, column: ColumnData) -> Self {
        self.columns.push((name.into(), column));
        self
    }

    /// Names of the produced collections.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|(name, _)| name.as_str())
    }

    /// Returns `batch` with every produced entry added or replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if a produced entry has the wrong event count.
    pub fn apply_to(self, batch: EventBatch) -> Result<EventBatch, DataError> {
        let batch = self
            .collections
            .into_iter()
            .try_fold(batch, |b, (name, coll)| b.with_collection(name, coll))?;
        self.columns
            .into_iter()
            .try_fold(batch, |b, (name, col)| b.with_column(name, col))
    }
}

/// A correction applied to the event batch.
///
/// `apply` receives the active variation of the pass. A calibrator applies
/// its varied correction only when it owns that variation; otherwise it runs
/// at nominal on whatever inputs it is given.
pub trait Calibrator: Send + Sync + fmt::Debug {
    /// Unique name.
    fn name(&self) -> &str;

    /// Collections read.
    fn reads(&self) -> Vec<String>;

    /// Collections written.
    fn writes(&self) -> Vec<String>;

    /// Fields read, as `(collection, field)`.
    fn required_fields(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Shape variations owned by this calibrator.
    fn variations(&self) -> Vec<DeclaredVariation> {
        Vec::new()
    }

    /// Computes the corrected collections.
    ///
    /// # Errors
    ///
    /// Returns an error if a required input is missing from the batch.
    fn apply(&self, batch: &EventBatch, variation: &Variation) -> Result<CalibratorOutput, DataError>;
}
