//! Layered weight declarations.

use crate::core::Scope;
use crate::errors::ConfigurationError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inclusive and per-category weight names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightLayers {
    /// Applied in every category.
    #[serde(default)]
    pub inclusive: Vec<String>,
    /// Applied only in the named category.
    #[serde(default)]
    pub bycategory: IndexMap<String, Vec<String>>,
}

impl WeightLayers {
    fn for_category<'a>(&'a self, category: &str) -> impl Iterator<Item = &'a String> + 'a {
        self.inclusive
            .iter()
            .chain(self.bycategory.get(category).into_iter().flatten())
    }

    fn names(&self) -> impl Iterator<Item = &String> {
        self.inclusive.iter().chain(self.bycategory.values().flatten())
    }
}

/// Per-sample weights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleWeights {
    /// Added layers.
    #[serde(flatten)]
    pub layers: WeightLayers,
    /// Common weights not applied to this sample.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// The `weights` (and `variations.weights`) section of an analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsConfig {
    /// Weights for every sample.
    #[serde(default)]
    pub common: WeightLayers,
    /// Sample name -> weights.
    #[serde(default)]
    pub bysample: IndexMap<String, SampleWeights>,
}

impl WeightsConfig {
    /// Every weight name referenced.
    #[must_use]
    pub fn names(&self) -> BTreeSet<&str> {
        self.common
            .names()
            .chain(self.bysample.values().flat_map(|s| s.layers.names()))
            .map(String::as_str)
            .collect()
    }

    /// Where each referenced name applies, one entry per declaration.
    #[must_use]
    pub fn scopes(&self) -> Vec<(String, Scope)> {
        let mut out = Vec::new();
        out.extend(self.common.inclusive.iter().map(|n| (n.clone(), Scope::all())));
        for (category, names) in &self.common.bycategory {
            out.extend(names.iter().map(|n| (n.clone(), Scope::category(category))));
        }
        for (sample, weights) in &self.bysample {
            out.extend(
                weights
                    .layers
                    .inclusive
                    .iter()
                    .map(|n| (n.clone(), Scope::sample(sample))),
            );
            for (category, names) in &weights.layers.bycategory {
                out.extend(
                    names
                        .iter()
                        .map(|n| (n.clone(), Scope::sample_category(sample, category))),
                );
            }
        }
        out
    }

    /// Category names used as keys.
    #[must_use]
    pub fn referenced_categories(&self) -> BTreeSet<&str> {
        self.common
            .bycategory
            .keys()
            .chain(self.bysample.values().flat_map(|s| s.layers.bycategory.keys()))
            .map(String::as_str)
            .collect()
    }
}

/// Resolves the ordered weight list of each `(sample, category)`.
///
/// Layers multiply: common inclusive, common by category, sample inclusive,
/// sample by category. The sample's `exclude` list is removed last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightPlan {
    config: WeightsConfig,
}

impl WeightPlan {
    /// Validates the declarations against the known categories and samples.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown category or sample keys and for a weight
    /// applied twice to the same pair.
    pub fn new(
        config: WeightsConfig,
        categories: &[&str],
        known_samples: Option<&BTreeSet<String>>,
    ) -> Result<Self, ConfigurationError> {
        for category in config.referenced_categories() {
            if !categories.contains(&category) {
                return Err(ConfigurationError::undefined_reference("category", category, "weights"));
            }
        }
        if let Some(samples) = known_samples {
            for sample in config.bysample.keys() {
                if !samples.contains(sample) {
                    return Err(ConfigurationError::undefined_reference("sample", sample, "weights"));
                }
            }
        }

        let plan = Self { config };
        let samples = plan
            .config
            .bysample
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(""));
        for sample in samples {
            for category in categories {
                plan.resolve_checked(sample, category)?;
            }
        }
        Ok(plan)
    }

    /// The declarations.
    #[must_use]
    pub fn config(&self) -> &WeightsConfig {
        &self.config
    }

    fn resolve_checked(&self, sample: &str, category: &str) -> Result<Vec<&str>, ConfigurationError> {
        let per_sample = self.config.bysample.get(sample);
        let excluded: &[String] = per_sample.map(|s| s.exclude.as_slice()).unwrap_or_default();

        let mut out: Vec<&str> = Vec::new();
        let names = self
            .config
            .common
            .for_category(category)
            .chain(per_sample.into_iter().flat_map(|s| s.layers.for_category(category)));
        for name in names {
            if excluded.contains(name) {
                continue;
            }
            if out.contains(&name.as_str()) {
                return Err(ConfigurationError::duplicate_weight(name, sample, category));
            }
            out.push(name.as_str());
        }
        Ok(out)
    }

    /// Ordered weight names for `(sample, category)`.
    #[must_use]
    pub fn resolve(&self, sample: &str, category: &str) -> Vec<&str> {
        // Every sample and category combination is checked in `new`.
        self.resolve_checked(sample, category).unwrap_or_default()
    }

    /// Every name that may apply to `sample` in some category.
    #[must_use]
    pub fn names_for_sample(&self, sample: &str) -> BTreeSet<&str> {
        let per_sample = self.config.bysample.get(sample);
        self.config
            .common
            .names()
            .chain(per_sample.into_iter().flat_map(|s| s.layers.names()))
            .filter(|n| per_sample.map_or(true, |s| !s.exclude.contains(*n)))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CATEGORIES: [&str; 3] = ["baseline", "1btag", "2btag"];

    fn config() -> WeightsConfig {
        serde_json::from_value(serde_json::json!({
            "common": {
                "inclusive": ["genWeight", "lumi", "XS", "pileup"],
                "bycategory": {"1btag": ["sf_btag"], "2btag": ["sf_btag"]}
            },
            "bysample": {
                "TTTo2L2Nu": {"bycategory": {"2btag": ["sf_mu_trigger"]}},
                "DYJetsToLL": {"inclusive": ["sf_dy"], "exclude": ["pileup"]}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_layered_resolution() {
        let plan = WeightPlan::new(config(), &CATEGORIES, None).unwrap();
        assert_eq!(
            plan.resolve("TTTo2L2Nu", "baseline"),
            vec!["genWeight", "lumi", "XS", "pileup"]
        );
        assert_eq!(
            plan.resolve("TTTo2L2Nu", "1btag"),
            vec!["genWeight", "lumi", "XS", "pileup", "sf_btag"]
        );
        assert_eq!(
            plan.resolve("TTTo2L2Nu", "2btag"),
            vec!["genWeight", "lumi", "XS", "pileup", "sf_btag", "sf_mu_trigger"]
        );
        assert_eq!(
            plan.resolve("WJets", "2btag"),
            vec!["genWeight", "lumi", "XS", "pileup", "sf_btag"]
        );
    }

    #[test]
    fn test_exclude_removes_common_weight() {
        let plan = WeightPlan::new(config(), &CATEGORIES, None).unwrap();
        assert_eq!(
            plan.resolve("DYJetsToLL", "baseline"),
            vec!["genWeight", "lumi", "XS", "sf_dy"]
        );
        assert!(!plan.names_for_sample("DYJetsToLL").contains("pileup"));
        assert!(plan.names_for_sample("TTTo2L2Nu").contains("sf_mu_trigger"));
    }

    #[test]
    fn test_duplicate_weight_rejected() {
        let mut cfg = config();
        cfg.bysample
            .get_mut("TTTo2L2Nu")
            .unwrap()
            .layers
            .inclusive
            .push("pileup".to_string());
        let err = WeightPlan::new(cfg, &CATEGORIES, None).unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-009-DUPLICATE_WEIGHT"));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let err = WeightPlan::new(config(), &["baseline", "1btag"], None).unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-004-UNDEFINED_SCOPE"));
    }

    #[test]
    fn test_unknown_sample_rejected() {
        let samples: BTreeSet<String> = std::iter::once("TTTo2L2Nu".to_string()).collect();
        assert!(WeightPlan::new(config(), &CATEGORIES, Some(&samples)).is_err());
    }

    #[test]
    fn test_scopes() {
        let scopes = config().scopes();
        let btag: Vec<&Scope> = scopes
            .iter()
            .filter(|(n, _)| n == "sf_btag")
            .map(|(_, s)| s)
            .collect();
        assert_eq!(btag.len(), 2);
        assert!(btag[0].contains("anything", "1btag"));
        let trigger = scopes.iter().find(|(n, _)| n == "sf_mu_trigger").unwrap();
        assert!(trigger.1.contains("TTTo2L2Nu", "2btag"));
        assert!(!trigger.1.contains("DYJetsToLL", "2btag"));
    }
}
