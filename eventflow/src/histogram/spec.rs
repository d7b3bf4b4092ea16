//! Declarations of histograms and exported columns.

use crate::core::Variation;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Collection name that refers to event-level columns.
pub const EVENTS: &str = "events";

fn default_coll() -> String {
    EVENTS.to_string()
}

const fn default_true() -> bool {
    true
}

/// One histogram axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Collection holding the field, or `events` for event-level columns.
    #[serde(default = "default_coll")]
    pub coll: String,
    /// Field (or column) name.
    pub field: String,
    /// Axis label.
    #[serde(default)]
    pub label: String,
    /// Number of regular bins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<usize>,
    /// Lower edge of regular binning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    /// Upper edge of regular binning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
    /// Variable bin edges, used instead of `bins`/`start`/`stop`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<f64>>,
    /// Only fill the object at this position in each event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<usize>,
}

impl Axis {
    /// Regular binning.
    #[must_use]
    pub fn regular(coll: &str, field: &str, bins: usize, start: f64, stop: f64) -> Self {
        Self {
            coll: coll.to_string(),
            field: field.to_string(),
            label: String::new(),
            bins: Some(bins),
            start: Some(start),
            stop: Some(stop),
            edges: None,
            pos: None,
        }
    }

    /// Variable binning.
    #[must_use]
    pub fn variable(coll: &str, field: &str, edges: Vec<f64>) -> Self {
        Self {
            coll: coll.to_string(),
            field: field.to_string(),
            label: String::new(),
            bins: None,
            start: None,
            stop: None,
            edges: Some(edges),
            pos: None,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Fills only the object at `pos`.
    #[must_use]
    pub const fn at_position(mut self, pos: usize) -> Self {
        self.pos = Some(pos);
        self
    }

    /// Returns true for event-level axes.
    #[must_use]
    pub fn is_event_level(&self) -> bool {
        self.coll == EVENTS
    }

    /// Name of the column or collection the axis reads.
    #[must_use]
    pub fn source(&self) -> &str {
        if self.is_event_level() {
            &self.field
        } else {
            &self.coll
        }
    }

    /// Bin edges of the axis.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the binning is unusable.
    #[allow(clippy::cast_precision_loss)]
    pub fn binning(&self) -> Result<Vec<f64>, String> {
        if let Some(edges) = &self.edges {
            if edges.len() < 2 {
                return Err(format!("axis '{}' needs at least two edges", self.field));
            }
            if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
                return Err(format!("edges of axis '{}' must be finite and strictly increasing", self.field));
            }
            return Ok(edges.clone());
        }
        match (self.bins, self.start, self.stop) {
            (Some(bins), Some(start), Some(stop))
                if bins > 0 && start.is_finite() && stop.is_finite() && start < stop =>
            {
                let width = (stop - start) / bins as f64;
                let mut edges: Vec<f64> = (0..bins).map(|i| start + width * i as f64).collect();
                edges.push(stop);
                Ok(edges)
            }
            (Some(_), Some(_), Some(_)) => Err(format!(
                "axis '{}' needs bins > 0 and start < stop",
                self.field
            )),
            _ => Err(format!(
                "axis '{}' needs either edges or bins, start and stop",
                self.field
            )),
        }
    }
}

/// Which samples, categories and variations an output is produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFilter {
    /// Restrict to these categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_categories: Option<Vec<String>>,
    /// Skip these categories.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_categories: Vec<String>,
    /// Restrict to these samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_samples: Option<Vec<String>>,
    /// Skip these samples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_samples: Vec<String>,
    /// When false only the nominal pass is filled.
    #[serde(default = "default_true")]
    pub variations: bool,
    /// Restrict the varied passes to these variation names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_variations: Option<Vec<String>>,
    /// Fill with unit weights.
    #[serde(default)]
    pub no_weights: bool,
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self {
            only_categories: None,
            exclude_categories: Vec::new(),
            only_samples: None,
            exclude_samples: Vec::new(),
            variations: true,
            only_variations: None,
            no_weights: false,
        }
    }
}

fn listed(list: Option<&Vec<String>>, name: &str) -> bool {
    list.map_or(true, |l| l.iter().any(|n| n == name))
}

impl OutputFilter {
    /// Returns true if the output is produced for `(sample, category)`.
    #[must_use]
    pub fn applies_to(&self, sample: &str, category: &str) -> bool {
        listed(self.only_samples.as_ref(), sample)
            && !self.exclude_samples.iter().any(|s| s == sample)
            && listed(self.only_categories.as_ref(), category)
            && !self.exclude_categories.iter().any(|c| c == category)
    }

    /// Returns true if the pass `variation` is produced.
    #[must_use]
    pub fn accepts_variation(&self, variation: &Variation) -> bool {
        if variation.is_nominal() {
            return true;
        }
        self.variations && listed(self.only_variations.as_ref(), &variation.name)
    }

    /// Category names mentioned by the filter.
    #[must_use]
    pub fn referenced_categories(&self) -> Vec<&str> {
        self.only_categories
            .iter()
            .flatten()
            .chain(&self.exclude_categories)
            .map(String::as_str)
            .collect()
    }

    /// Sample names mentioned by the filter.
    #[must_use]
    pub fn referenced_samples(&self) -> Vec<&str> {
        self.only_samples
            .iter()
            .flatten()
            .chain(&self.exclude_samples)
            .map(String::as_str)
            .collect()
    }
}

/// A binned output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSpec {
    /// Axes, in fill order.
    pub axes: Vec<Axis>,
    /// Scope and weighting options.
    #[serde(flatten)]
    pub filter: OutputFilter,
}

impl HistogramSpec {
    /// Histogram over the given axes, filled everywhere.
    #[must_use]
    pub fn new(axes: Vec<Axis>) -> Self {
        Self {
            axes,
            filter: OutputFilter::default(),
        }
    }

    /// Multiplicity histogram of a collection, read from its `n<coll>` column.
    #[must_use]
    pub fn count(collection: &str) -> (String, Self) {
        let name = format!("n{collection}");
        let axis = Axis::regular(EVENTS, &name, 10, 0.0, 10.0).with_label(format!("$N_{{{collection}}}$"));
        (name, Self::new(vec![axis]))
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: OutputFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Edges of every axis.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no axes or an axis is badly binned.
    pub fn edges(&self, name: &str) -> Result<Vec<Vec<f64>>, ConfigurationError> {
        if self.axes.is_empty() {
            return Err(ConfigurationError::bad_binning(name, "no axes"));
        }
        self.axes
            .iter()
            .map(|axis| axis.binning().map_err(|reason| ConfigurationError::bad_binning(name, &reason)))
            .collect()
    }

    /// Columns and collections read.
    #[must_use]
    pub fn requires(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for axis in &self.axes {
            let source = axis.source().to_string();
            if !out.contains(&source) {
                out.push(source);
            }
        }
        out
    }

    /// Object fields read by the axes, as `(collection, field)`.
    #[must_use]
    pub fn required_fields(&self) -> Vec<(String, String)> {
        self.axes
            .iter()
            .filter(|axis| !axis.is_event_level())
            .map(|axis| (axis.coll.clone(), axis.field.clone()))
            .collect()
    }
}

/// Raw per-event export of a collection's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Collection, or `events` for event-level columns.
    #[serde(default = "default_coll")]
    pub collection: String,
    /// Fields (or columns) to export.
    pub fields: Vec<String>,
    /// Scope and weighting options.
    #[serde(flatten)]
    pub filter: OutputFilter,
}

impl ColumnSpec {
    /// Export of `fields` from `collection`.
    #[must_use]
    pub fn new(collection: &str, fields: &[&str]) -> Self {
        Self {
            collection: collection.to_string(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            filter: OutputFilter::default(),
        }
    }

    /// Returns true for event-level exports.
    #[must_use]
    pub fn is_event_level(&self) -> bool {
        self.collection == EVENTS
    }

    /// Object fields exported, as `(collection, field)`. Empty for event-level exports.
    #[must_use]
    pub fn required_fields(&self) -> Vec<(String, String)> {
        if self.is_event_level() {
            return Vec::new();
        }
        self.fields
            .iter()
            .map(|field| (self.collection.clone(), field.clone()))
            .collect()
    }
}
