//! Named cuts, calibrators and weight components available to configurations.

use crate::calibration::{Calibrator, Factor, MetPropagationCalibrator, ScaleCalibrator, ScaleVariation};
use crate::selection::{AllFlags, Cut, GoldenJson, Passthrough};
use crate::weights::{ColumnWeight, MetadataWeight, ScaleFactorWeight, WeightComponent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// MET filter flags required by the default `eventFlags` cut.
pub const EVENT_FLAGS: [&str; 6] = [
    "Flag_goodVertices",
    "Flag_globalSuperTightHalo2016Filter",
    "Flag_HBHENoiseFilter",
    "Flag_HBHENoiseIsoFilter",
    "Flag_EcalDeadCellTriggerPrimitiveFilter",
    "Flag_BadPFMuonFilter",
];

/// Scale-factor weights registered by default, read from `<name>`,
/// `<name>Up` and `<name>Down` columns.
const SCALE_FACTORS: [&str; 7] = [
    "pileup",
    "sf_ele_id",
    "sf_ele_reco",
    "sf_mu_id",
    "sf_mu_iso",
    "sf_btag",
    "sf_mu_trigger",
];

/// In-memory registry of reusable components.
///
/// Registering an existing name replaces the previous entry.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    cuts: RwLock<HashMap<String, Arc<dyn Cut>>>,
    calibrators: RwLock<HashMap<String, Arc<dyn Calibrator>>>,
    weights: RwLock<HashMap<String, Arc<dyn WeightComponent>>>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the common cuts, calibrators and weights.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register_cut(Arc::new(Passthrough::default()));
        registry.register_cut(Arc::new(AllFlags::new(
            "eventFlags",
            EVENT_FLAGS.iter().map(|f| (*f).to_string()).collect(),
        )));
        registry.register_cut(Arc::new(GoldenJson::new("goldenJson", "goldenJson")));

        registry.register_calibrator(Arc::new(
            ScaleCalibrator::new("jet_calibration", "Jet")
                .with_variation(ScaleVariation::new("JES_Total", Factor::Field("jes_unc".to_string())))
                .with_variation(ScaleVariation::new("JER", Factor::Field("jer_unc".to_string())))
                .keep_uncorrected("JetUncorrected"),
        ));
        registry.register_calibrator(Arc::new(MetPropagationCalibrator::new(
            "met_calibration",
            "MET",
            "Jet",
            "JetUncorrected",
        )));
        registry.register_calibrator(Arc::new(
            ScaleCalibrator::new("electron_scale_and_smearing", "Electron")
                .with_fields(&["pt"])
                .with_variation(ScaleVariation::new("ele_scale", Factor::Field("scale_unc".to_string())))
                .with_variation(ScaleVariation::new("ele_smear", Factor::Field("smear_unc".to_string()))),
        ));

        registry.register_weight(Arc::new(ColumnWeight::new("genWeight", "genWeight")));
        registry.register_weight(Arc::new(MetadataWeight::new("lumi", "luminosity").with_scale(1000.0)));
        registry.register_weight(Arc::new(
            MetadataWeight::new("XS", "xsec").normalized_by("sum_genweights"),
        ));
        for name in SCALE_FACTORS {
            registry.register_weight(Arc::new(ScaleFactorWeight::with_suffixes(name, name)));
        }
        registry
    }

    /// Registers a cut under its name.
    pub fn register_cut(&self, cut: Arc<dyn Cut>) {
        debug!(cut = cut.name(), "Registering cut");
        self.cuts.write().insert(cut.name().to_string(), cut);
    }

    /// Registers a calibrator under its name.
    pub fn register_calibrator(&self, calibrator: Arc<dyn Calibrator>) {
        debug!(calibrator = calibrator.name(), "Registering calibrator");
        self.calibrators
            .write()
            .insert(calibrator.name().to_string(), calibrator);
    }

    /// Registers a weight component under its name.
    pub fn register_weight(&self, weight: Arc<dyn WeightComponent>) {
        debug!(weight = weight.name(), "Registering weight component");
        self.weights.write().insert(weight.name().to_string(), weight);
    }

    /// Looks up a cut.
    #[must_use]
    pub fn cut(&self, name: &str) -> Option<Arc<dyn Cut>> {
        self.cuts.read().get(name).cloned()
    }

    /// Looks up a calibrator.
    #[must_use]
    pub fn calibrator(&self, name: &str) -> Option<Arc<dyn Calibrator>> {
        self.calibrators.read().get(name).cloned()
    }

    /// Looks up a weight component.
    #[must_use]
    pub fn weight(&self, name: &str) -> Option<Arc<dyn WeightComponent>> {
        self.weights.read().get(name).cloned()
    }

    /// Registered weight names, sorted.
    #[must_use]
    pub fn weight_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.weights.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = ComponentRegistry::with_defaults();
        assert!(registry.cut("passthrough").is_some());
        assert!(registry.cut("eventFlags").is_some());
        assert!(registry.weight("sf_btag").unwrap().has_variations());
        assert!(!registry.weight("genWeight").unwrap().has_variations());
        let jets = registry.calibrator("jet_calibration").unwrap();
        assert_eq!(jets.variations().len(), 2);
        assert!(registry.calibrator("unknown").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let registry = ComponentRegistry::new();
        registry.register_weight(Arc::new(ColumnWeight::new("genWeight", "genWeight")));
        registry.register_weight(Arc::new(ColumnWeight::new("genWeight", "LHEWeight")));
        assert_eq!(registry.weight_names(), vec!["genWeight".to_string()]);
    }
}
