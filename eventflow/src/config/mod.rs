//! Declarative analysis configuration.
//!
//! [`AnalysisConfig`] is plain data, deserialized from JSON and validated by
//! the [`Configurator`] when it is turned into a frozen
//! [`Analysis`](crate::pipeline::Analysis). Cuts, calibrators and weight
//! components are either declared inline with a `type` tag or referenced by
//! name from a [`ComponentRegistry`].

mod configurator;
mod registry;

pub use configurator::Configurator;
pub use registry::{ComponentRegistry, EVENT_FLAGS};

use crate::calibration::{Calibrator, MetPropagationCalibrator, ScaleCalibrator};
use crate::core::ChunkSpec;
use crate::errors::EventflowError;
use crate::histogram::{ColumnSpec, HistogramSpec};
use crate::selection::{AllFlags, AnyFlag, Cut, GoldenJson, MinColumn, MinObjects, Passthrough};
use crate::weights::{
    ColumnWeight, ConstantWeight, MetadataWeight, ObjectProductWeight, ScaleFactorWeight, WeightComponent,
    WeightsConfig,
};
use crate::workflow::ObjectPreselection;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Default event-level column holding the generator weight.
pub const DEFAULT_GENWEIGHT: &str = "genWeight";

fn default_genweight() -> String {
    DEFAULT_GENWEIGHT.to_string()
}

/// Sample and year selection applied to the chunk list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFilter {
    /// Samples to process; every sample when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<String>>,
    /// Samples to skip.
    #[serde(default)]
    pub samples_exclude: Vec<String>,
    /// Years to process; every year when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<Vec<String>>,
}

impl DatasetFilter {
    /// Returns true if the chunk is selected.
    #[must_use]
    pub fn accepts(&self, chunk: &ChunkSpec) -> bool {
        let sample = chunk.sample();
        self.samples
            .as_ref()
            .map_or(true, |s| s.iter().any(|n| n == sample))
            && !self.samples_exclude.iter().any(|n| n == sample)
            && self
                .year
                .as_ref()
                .map_or(true, |y| y.iter().any(|n| *n == chunk.year))
    }

    /// The declared sample list, if any, minus the exclusions.
    #[must_use]
    pub fn known_samples(&self) -> Option<BTreeSet<String>> {
        self.samples.as_ref().map(|samples| {
            samples
                .iter()
                .filter(|s| !self.samples_exclude.contains(s))
                .cloned()
                .collect()
        })
    }
}

/// The `datasets` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetsConfig {
    /// Dataset manifests, resolved outside the engine.
    #[serde(default)]
    pub jsons: Vec<String>,
    /// Chunk selection.
    #[serde(default)]
    pub filter: DatasetFilter,
}

/// The `workflow` section: derived objects and the generator weight column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Object preselection.
    #[serde(flatten)]
    pub preselection: ObjectPreselection,
    /// Column summed into `sum_genweights` before the skim.
    #[serde(default = "default_genweight")]
    pub genweight: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            preselection: ObjectPreselection::new(),
            genweight: default_genweight(),
        }
    }
}

/// A cut declared inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CutSpec {
    /// Keeps every event.
    Passthrough {
        /// Cut name.
        #[serde(default)]
        name: Option<String>,
    },
    /// At least `n` objects in a collection.
    MinObjects {
        /// Cut name.
        #[serde(default)]
        name: Option<String>,
        /// Collection.
        coll: String,
        /// Minimum count.
        n: usize,
    },
    /// An event-level column at or above a threshold.
    MinColumn {
        /// Cut name.
        #[serde(default)]
        name: Option<String>,
        /// Column.
        column: String,
        /// Threshold.
        min: f64,
    },
    /// Every flag set.
    AllFlags {
        /// Cut name.
        name: String,
        /// Flag columns.
        flags: Vec<String>,
    },
    /// At least one flag set.
    AnyFlag {
        /// Cut name.
        name: String,
        /// Flag columns.
        flags: Vec<String>,
    },
    /// Certified-luminosity flag for data.
    GoldenJson {
        /// Cut name.
        #[serde(default)]
        name: Option<String>,
        /// Flag column.
        column: String,
    },
}

impl CutSpec {
    /// Name of the built cut.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Passthrough { name } => name.clone().unwrap_or_else(|| "passthrough".to_string()),
            Self::MinObjects { name, coll, n } => name.clone().unwrap_or_else(|| format!("n{coll}_min{n}")),
            Self::MinColumn { name, column, min } => {
                name.clone().unwrap_or_else(|| format!("{column}_min{min}"))
            }
            Self::AllFlags { name, .. } | Self::AnyFlag { name, .. } => name.clone(),
            Self::GoldenJson { name, .. } => name.clone().unwrap_or_else(|| "goldenJson".to_string()),
        }
    }

    /// Builds the cut.
    #[must_use]
    pub fn build(&self) -> Arc<dyn Cut> {
        let name = self.name();
        match self {
            Self::Passthrough { .. } => Arc::new(Passthrough::new(name)),
            Self::MinObjects { coll, n, .. } => Arc::new(MinObjects::new(name, coll, *n)),
            Self::MinColumn { column, min, .. } => Arc::new(MinColumn::new(name, column, *min)),
            Self::AllFlags { flags, .. } => Arc::new(AllFlags::new(name, flags.clone())),
            Self::AnyFlag { flags, .. } => Arc::new(AnyFlag::new(name, flags.clone())),
            Self::GoldenJson { column, .. } => Arc::new(GoldenJson::new(name, column)),
        }
    }
}

/// A cut referenced by name or declared inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CutRef {
    /// Registry name.
    Name(String),
    /// Inline declaration.
    Spec(CutSpec),
}

/// A calibrator declared inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalibratorSpec {
    /// Field scaling with uncertainty variations.
    Scale(ScaleCalibrator),
    /// Jet correction propagated into MET.
    MetPropagation(MetPropagationCalibrator),
}

impl CalibratorSpec {
    /// Builds the calibrator.
    #[must_use]
    pub fn build(&self) -> Arc<dyn Calibrator> {
        match self {
            Self::Scale(c) => Arc::new(c.clone()),
            Self::MetPropagation(c) => Arc::new(c.clone()),
        }
    }
}

/// A calibrator referenced by name or declared inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CalibratorRef {
    /// Registry name.
    Name(String),
    /// Inline declaration.
    Spec(CalibratorSpec),
}

/// A weight component declared inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeightSpec {
    /// Event-level column.
    Column(ColumnWeight),
    /// Sample metadata value.
    Metadata(MetadataWeight),
    /// Scale factor columns.
    ScaleFactor(ScaleFactorWeight),
    /// Constant.
    Constant(ConstantWeight),
    /// Product of per-object factors.
    ObjectProduct(ObjectProductWeight),
}

impl WeightSpec {
    /// Builds the component.
    #[must_use]
    pub fn build(&self) -> Arc<dyn WeightComponent> {
        match self {
            Self::Column(w) => Arc::new(w.clone()),
            Self::Metadata(w) => Arc::new(w.clone()),
            Self::ScaleFactor(w) => Arc::new(w.clone()),
            Self::Constant(w) => Arc::new(w.clone()),
            Self::ObjectProduct(w) => Arc::new(w.clone()),
        }
    }
}

/// A weight component referenced by name or declared inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightClassRef {
    /// Registry name.
    Name(String),
    /// Inline declaration.
    Spec(WeightSpec),
}

/// The `variations` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationsConfig {
    /// Weight variations, laid out like `weights`.
    #[serde(default)]
    pub weights: WeightsConfig,
    /// Shape variations: calibrator names or single variation names.
    #[serde(default)]
    pub shape: WeightsConfig,
}

/// A complete analysis declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Dataset selection.
    #[serde(default)]
    pub datasets: DatasetsConfig,
    /// Object preselection.
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Calibrators in execution order.
    #[serde(default)]
    pub calibrators: Vec<CalibratorRef>,
    /// Skim cuts.
    #[serde(default)]
    pub skim: Vec<CutRef>,
    /// Preselection cuts.
    #[serde(default)]
    pub preselections: Vec<CutRef>,
    /// Category name -> cuts.
    pub categories: IndexMap<String, Vec<CutRef>>,
    /// Weight layers.
    #[serde(default)]
    pub weights: WeightsConfig,
    /// Weight component declarations.
    #[serde(default)]
    pub weights_classes: Vec<WeightClassRef>,
    /// Systematic variations.
    #[serde(default)]
    pub variations: VariationsConfig,
    /// Histograms.
    #[serde(default)]
    pub variables: IndexMap<String, HistogramSpec>,
    /// Column exports.
    #[serde(default)]
    pub columns: IndexMap<String, ColumnSpec>,
}

impl AnalysisConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON or unknown shapes.
    pub fn from_json_str(text: &str) -> Result<Self, EventflowError> {
        serde_json::from_str(text).map_err(|e| EventflowError::Serialization(e.to_string()))
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a serialization error.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, EventflowError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Category names in declaration order.
    #[must_use]
    pub fn category_names(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).collect()
    }

    /// SHA-256 of the canonical JSON form, hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tutorial_config_json;
    use std::io::Write;

    #[test]
    fn test_parse_tutorial_config() {
        let config = AnalysisConfig::from_json_str(&tutorial_config_json()).unwrap();
        assert_eq!(config.category_names(), vec!["baseline", "1btag", "2btag", "2jets"]);
        assert_eq!(config.calibrators.len(), 3);
        assert!(matches!(config.skim[0], CutRef::Spec(CutSpec::MinColumn { .. })));
        assert!(matches!(config.skim[1], CutRef::Name(ref n) if n == "eventFlags"));
        assert!(config.variations.shape.names().contains("jet_calibration"));
        assert_eq!(config.workflow.genweight, "genWeight");
    }

    #[test]
    fn test_cut_spec_names() {
        let spec: CutSpec = serde_json::from_value(serde_json::json!({
            "type": "min_objects", "coll": "BJetGood", "n": 1
        }))
        .unwrap();
        assert_eq!(spec.name(), "nBJetGood_min1");
        assert_eq!(spec.build().name(), "nBJetGood_min1");
    }

    #[test]
    fn test_dataset_filter() {
        let filter = DatasetFilter {
            samples: Some(vec!["TTTo2L2Nu".into(), "DATA_SingleMuon".into()]),
            samples_exclude: vec!["DATA_SingleMuon".into()],
            year: Some(vec!["2018".into()]),
        };
        assert!(filter.accepts(&ChunkSpec::new("TTTo2L2Nu", "a.root", 0, 10).with_year("2018")));
        assert!(!filter.accepts(&ChunkSpec::new("TTTo2L2Nu", "a.root", 0, 10).with_year("2017")));
        assert!(!filter.accepts(&ChunkSpec::new("DATA_SingleMuon", "b.root", 0, 10).with_year("2018")));
        assert_eq!(filter.known_samples().unwrap().len(), 1);
    }

    #[test]
    fn test_from_json_path_and_fingerprint() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(tutorial_config_json().as_bytes()).unwrap();
        let loaded = AnalysisConfig::from_json_path(file.path()).unwrap();
        let parsed = AnalysisConfig::from_json_str(&tutorial_config_json()).unwrap();
        assert_eq!(loaded.fingerprint(), parsed.fingerprint());
        assert_eq!(loaded.fingerprint().len(), 64);
    }

    #[test]
    fn test_malformed_config() {
        let err = AnalysisConfig::from_json_str("{\"skim\": []}").unwrap_err();
        assert!(matches!(err, EventflowError::Serialization(_)));
        assert!(AnalysisConfig::from_json_path("/nonexistent/analysis.json").is_err());
    }
}
