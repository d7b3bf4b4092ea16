//! Skim, preselection and category evaluation.

use super::{Cut, CutContext, Mask};
use crate::core::EventBatch;
use crate::errors::{ConfigurationError, DataError};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

/// A named conjunction of cuts.
#[derive(Debug, Clone)]
pub struct Category {
    /// Category name.
    pub name: String,
    /// Cuts, all required.
    pub cuts: Vec<Arc<dyn Cut>>,
}

impl Category {
    /// Creates a category.
    #[must_use]
    pub fn new(name: impl Into<String>, cuts: Vec<Arc<dyn Cut>>) -> Self {
        Self {
            name: name.into(),
            cuts,
        }
    }
}

/// Masks of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionResult {
    /// Events passing the skim.
    pub skim: Mask,
    /// Events passing skim and preselection.
    pub preselection: Mask,
    /// Events in each category, in declaration order.
    pub categories: IndexMap<String, Mask>,
}

impl SelectionResult {
    /// Mask of one category.
    #[must_use]
    pub fn category(&self, name: &str) -> Option<&Mask> {
        self.categories.get(name)
    }
}

/// Evaluates skim, preselection and category cuts.
#[derive(Debug, Clone, Default)]
pub struct SelectionEngine {
    skim: Vec<Arc<dyn Cut>>,
    preselection: Vec<Arc<dyn Cut>>,
    categories: Vec<Category>,
}

impl SelectionEngine {
    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if two categories share a name or no category is defined.
    pub fn new(
        skim: Vec<Arc<dyn Cut>>,
        preselection: Vec<Arc<dyn Cut>>,
        categories: Vec<Category>,
    ) -> Result<Self, ConfigurationError> {
        if categories.is_empty() {
            return Err(ConfigurationError::invalid("At least one category is required"));
        }
        let mut seen = HashSet::new();
        for category in &categories {
            if !seen.insert(category.name.as_str()) {
                return Err(ConfigurationError::invalid(format!(
                    "Category '{}' is defined more than once",
                    category.name
                ))
                .with_subjects(vec![category.name.clone()]));
            }
        }
        Ok(Self {
            skim,
            preselection,
            categories,
        })
    }

    /// Category names in declaration order.
    #[must_use]
    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    /// Every column or collection any cut reads.
    #[must_use]
    pub fn requires(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let cuts = self
            .skim
            .iter()
            .chain(&self.preselection)
            .chain(self.categories.iter().flat_map(|c| &c.cuts));
        for cut in cuts {
            for name in cut.requires() {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// Evaluates every cut on `batch`.
    ///
    /// All cuts run even once a running mask is empty.
    ///
    /// # Errors
    ///
    /// Returns the first data error raised by a cut.
    pub fn evaluate(&self, batch: &EventBatch, ctx: &CutContext<'_>) -> Result<SelectionResult, DataError> {
        let n = batch.n_events();
        let skim = conjunction(&self.skim, batch, ctx, Mask::all(n))?;
        let preselection = conjunction(&self.preselection, batch, ctx, skim.clone())?;

        let mut categories = IndexMap::with_capacity(self.categories.len());
        for category in &self.categories {
            let mask = conjunction(&category.cuts, batch, ctx, preselection.clone())?;
            trace!(category = %category.name, selected = mask.count(), "Category evaluated");
            categories.insert(category.name.clone(), mask);
        }

        Ok(SelectionResult {
            skim,
            preselection,
            categories,
        })
    }
}

fn conjunction(
    cuts: &[Arc<dyn Cut>],
    batch: &EventBatch,
    ctx: &CutContext<'_>,
    start: Mask,
) -> Result<Mask, DataError> {
    let mut mask = start;
    for cut in cuts {
        let result = cut.evaluate(batch, ctx)?;
        if result.len() != batch.n_events() {
            return Err(DataError::length_mismatch(
                format!("cut {}", cut.name()),
                batch.n_events(),
                result.len(),
            ));
        }
        mask.and_assign(&result);
    }
    Ok(mask)
}
