//! Event selection: skim, preselection and categories.

mod cuts;
mod engine;

pub use cuts::{AllFlags, AnyFlag, CutFn, FnCut, GoldenJson, MinColumn, MinObjects, Passthrough};
pub use engine::{Category, SelectionEngine, SelectionResult};

use crate::core::EventBatch;
use crate::errors::DataError;
use std::fmt;

/// Per-event boolean selection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mask(Vec<bool>);

impl Mask {
    /// Every event selected.
    #[must_use]
    pub fn all(n_events: usize) -> Self {
        Self(vec![true; n_events])
    }

    /// No event selected.
    #[must_use]
    pub fn none(n_events: usize) -> Self {
        Self(vec![false; n_events])
    }

    /// Number of events covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the mask covers no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of selected events.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    /// Whether event `i` is selected.
    #[must_use]
    pub fn get(&self, i: usize) -> bool {
        self.0.get(i).copied().unwrap_or(false)
    }

    /// Logical AND.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        Self(self.0.iter().zip(&other.0).map(|(a, b)| *a && *b).collect())
    }

    /// In-place logical AND.
    pub fn and_assign(&mut self, other: &Self) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a &= *b;
        }
    }

    /// Indices of the selected events.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().filter_map(|(i, &b)| b.then_some(i))
    }

    /// Raw flags.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl From<Vec<bool>> for Mask {
    fn from(flags: Vec<bool>) -> Self {
        Self(flags)
    }
}

/// Chunk-level facts available to cuts.
#[derive(Debug, Clone, Copy)]
pub struct CutContext<'a> {
    /// Sample name.
    pub sample: &'a str,
    /// Data-taking year.
    pub year: &'a str,
    /// Whether the sample is collision data.
    pub is_data: bool,
}

/// A named event predicate.
pub trait Cut: Send + Sync + fmt::Debug {
    /// Cut name.
    fn name(&self) -> &str;

    /// Columns and collections read.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Evaluates the cut on every event.
    ///
    /// # Errors
    ///
    /// Returns an error if a required column is missing.
    fn evaluate(&self, batch: &EventBatch, ctx: &CutContext<'_>) -> Result<Mask, DataError>;
}
