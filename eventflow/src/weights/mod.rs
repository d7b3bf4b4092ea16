//! Event weights.
//!
//! Weight components are evaluated once per calibrated view into a
//! [`ComponentTable`] and combined per category and variation by the
//! [`WeightEngine`], following the layered [`WeightPlan`].

mod components;
mod engine;
mod plan;

pub use components::{ColumnWeight, ConstantWeight, MetadataWeight, ObjectProductWeight, ScaleFactorWeight};
pub use engine::{ComponentTable, WeightEngine};
pub use plan::{SampleWeights, WeightLayers, WeightPlan, WeightsConfig};

use crate::core::EventBatch;
use crate::errors::DataError;
use std::collections::BTreeMap;
use std::fmt;

/// Per-event values of one component.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightValues {
    /// Nominal values.
    pub nominal: Vec<f64>,
    /// +1 sigma values.
    pub up: Option<Vec<f64>>,
    /// -1 sigma values.
    pub down: Option<Vec<f64>>,
}

impl WeightValues {
    /// Values without variations.
    #[must_use]
    pub fn nominal(values: Vec<f64>) -> Self {
        Self {
            nominal: values,
            up: None,
            down: None,
        }
    }

    /// Values with up and down variations.
    #[must_use]
    pub fn with_variations(nominal: Vec<f64>, up: Vec<f64>, down: Vec<f64>) -> Self {
        Self {
            nominal,
            up: Some(up),
            down: Some(down),
        }
    }

    /// Drops the variations.
    #[must_use]
    pub fn nominal_only(self) -> Self {
        Self::nominal(self.nominal)
    }

    fn arrays_mut(&mut self) -> impl Iterator<Item = &mut Vec<f64>> {
        std::iter::once(&mut self.nominal)
            .chain(self.up.as_mut())
            .chain(self.down.as_mut())
    }
}

/// Chunk-level facts available to weight components.
#[derive(Debug, Clone, Copy)]
pub struct WeightContext<'a> {
    /// Sample name.
    pub sample: &'a str,
    /// Data-taking year.
    pub year: &'a str,
    /// Whether the sample is collision data.
    pub is_data: bool,
    /// Sample metadata (cross-section, luminosity, ...).
    pub metadata: &'a BTreeMap<String, f64>,
}

/// A named multiplicative event weight.
pub trait WeightComponent: Send + Sync + fmt::Debug {
    /// Component name.
    fn name(&self) -> &str;

    /// Whether up/down values are provided.
    fn has_variations(&self) -> bool;

    /// Columns and collections read.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Computes the values for every event.
    ///
    /// # Errors
    ///
    /// Returns an error if an input is missing.
    fn compute(&self, batch: &EventBatch, ctx: &WeightContext<'_>) -> Result<WeightValues, DataError>;
}
