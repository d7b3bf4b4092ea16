//! Built-in calibrators.

use super::{Calibrator, CalibratorOutput, DeclaredVariation};
use crate::core::{Direction, EventBatch, ObjectCollection, Variation};
use crate::errors::DataError;
use serde::{Deserialize, Serialize};

/// A per-object multiplicative factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Factor {
    /// Same value for every object.
    Constant(f64),
    /// Read from a field of the collection being corrected.
    Field(String),
}

impl Factor {
    fn per_object(&self, collection: &str, coll: &ObjectCollection) -> Result<Vec<f64>, DataError> {
        match self {
            Self::Constant(value) => Ok(vec![*value; coll.n_objects()]),
            Self::Field(field) => Ok(coll.require_field(collection, field)?.to_vec()),
        }
    }

    fn field(&self) -> Option<&str> {
        match self {
            Self::Constant(_) => None,
            Self::Field(name) => Some(name),
        }
    }
}

/// A shape variation of a [`ScaleCalibrator`]: the correction is multiplied
/// by `1 + uncertainty` (up) or `1 - uncertainty` (down).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleVariation {
    /// Variation name.
    pub name: String,
    /// Relative uncertainty.
    pub uncertainty: Factor,
}

impl ScaleVariation {
    /// Creates a scale variation.
    #[must_use]
    pub fn new(name: impl Into<String>, uncertainty: Factor) -> Self {
        Self {
            name: name.into(),
            uncertainty,
        }
    }
}

fn default_fields() -> Vec<String> {
    vec!["pt".to_string(), "mass".to_string()]
}

fn default_correction() -> Factor {
    Factor::Constant(1.0)
}

/// Multiplies fields of a collection by a correction factor.
///
/// Covers energy-scale style corrections (jets, electrons) and their
/// uncertainty variations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleCalibrator {
    /// Calibrator name.
    pub name: String,
    /// Collection corrected.
    pub collection: String,
    /// Fields scaled.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
    /// Nominal correction.
    #[serde(default = "default_correction")]
    pub correction: Factor,
    /// Owned shape variations.
    #[serde(default)]
    pub variations: Vec<ScaleVariation>,
    /// Name under which the uncorrected collection is kept.
    #[serde(default)]
    pub keep_uncorrected: Option<String>,
    /// Output collection; defaults to `collection`.
    #[serde(default)]
    pub output: Option<String>,
}

impl ScaleCalibrator {
    /// Creates a calibrator scaling `pt` and `mass` of `collection` by 1.
    #[must_use]
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            fields: default_fields(),
            correction: default_correction(),
            variations: Vec::new(),
            keep_uncorrected: None,
            output: None,
        }
    }

    /// Sets the scaled fields.
    #[must_use]
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Sets the nominal correction.
    #[must_use]
    pub fn with_correction(mut self, correction: Factor) -> Self {
        self.correction = correction;
        self
    }

    /// Adds an owned variation.
    #[must_use]
    pub fn with_variation(mut self, variation: ScaleVariation) -> Self {
        self.variations.push(variation);
        self
    }

    /// Keeps the input collection under `name`.
    #[must_use]
    pub fn keep_uncorrected(mut self, name: impl Into<String>) -> Self {
        self.keep_uncorrected = Some(name.into());
        self
    }

    /// Writes the corrected collection under `name`.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    fn output_name(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.collection)
    }
}

impl Calibrator for ScaleCalibrator {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        vec![self.collection.clone()]
    }

    fn writes(&self) -> Vec<String> {
        let mut writes = vec![self.output_name().to_string()];
        writes.extend(self.keep_uncorrected.clone());
        writes
    }

    fn required_fields(&self) -> Vec<(String, String)> {
        let uncertainties = self.variations.iter().filter_map(|v| v.uncertainty.field());
        self.fields
            .iter()
            .map(String::as_str)
            .chain(self.correction.field())
            .chain(uncertainties)
            .map(|field| (self.collection.clone(), field.to_string()))
            .collect()
    }

    fn variations(&self) -> Vec<DeclaredVariation> {
        self.variations
            .iter()
            .map(|v| DeclaredVariation::up_down(&v.name))
            .collect()
    }

    fn apply(&self, batch: &EventBatch, variation: &Variation) -> Result<CalibratorOutput, DataError> {
        let coll = batch.require_collection(&self.collection)?;
        let mut factors = self.correction.per_object(&self.collection, coll)?;

        if let Some(owned) = self.variations.iter().find(|v| variation.varies(&v.name)) {
            let sign = match variation.direction {
                Direction::Up => 1.0,
                Direction::Down => -1.0,
                Direction::Nominal => 0.0,
            };
            let uncertainty = owned.uncertainty.per_object(&self.collection, coll)?;
            for (factor, unc) in factors.iter_mut().zip(&uncertainty) {
                *factor *= 1.0 + sign * unc;
            }
        }

        let mut corrected = coll.clone();
        for field in &self.fields {
            let values = coll.require_field(&self.collection, field)?;
            let scaled = values.iter().zip(&factors).map(|(v, f)| v * f).collect();
            corrected = corrected.replace_field(field, scaled)?;
        }

        let mut output = CalibratorOutput::new().with_collection(self.output_name(), corrected);
        if let Some(name) = &self.keep_uncorrected {
            output = output.with_collection(name, coll.clone());
        }
        Ok(output)
    }
}

/// Propagates a jet momentum correction into the missing transverse energy.
///
/// The MET collection must hold exactly one object per event with `pt` and
/// `phi`. The corrected minus uncorrected jet momenta, summed in the
/// transverse plane, are subtracted from the MET vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetPropagationCalibrator {
    /// Calibrator name.
    pub name: String,
    /// MET collection.
    pub met: String,
    /// Corrected jets.
    pub jets: String,
    /// Uncorrected jets.
    pub jets_uncorrected: String,
}

impl MetPropagationCalibrator {
    /// Creates a MET propagation calibrator.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        met: impl Into<String>,
        jets: impl Into<String>,
        jets_uncorrected: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            met: met.into(),
            jets: jets.into(),
            jets_uncorrected: jets_uncorrected.into(),
        }
    }
}

impl Calibrator for MetPropagationCalibrator {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        vec![self.met.clone(), self.jets.clone(), self.jets_uncorrected.clone()]
    }

    fn writes(&self) -> Vec<String> {
        vec![self.met.clone()]
    }

    fn required_fields(&self) -> Vec<(String, String)> {
        [
            (&self.met, "pt"),
            (&self.met, "phi"),
            (&self.jets, "pt"),
            (&self.jets, "phi"),
            (&self.jets_uncorrected, "pt"),
        ]
        .into_iter()
        .map(|(collection, field)| (collection.clone(), field.to_string()))
        .collect()
    }

    fn apply(&self, batch: &EventBatch, _variation: &Variation) -> Result<CalibratorOutput, DataError> {
        let met = batch.require_collection(&self.met)?;
        let jets = batch.require_collection(&self.jets)?;
        let raw = batch.require_collection(&self.jets_uncorrected)?;

        if jets.offsets() != raw.offsets() {
            return Err(DataError::length_mismatch(
                self.jets_uncorrected.clone(),
                jets.n_objects(),
                raw.n_objects(),
            ));
        }
        if met.counts().iter().any(|&c| c != 1) {
            return Err(DataError::malformed(format!(
                "collection '{}' must hold exactly one object per event",
                self.met
            )));
        }

        let jet_pt = jets.require_field(&self.jets, "pt")?;
        let jet_phi = jets.require_field(&self.jets, "phi")?;
        let raw_pt = raw.require_field(&self.jets_uncorrected, "pt")?;
        let met_pt = met.require_field(&self.met, "pt")?;
        let met_phi = met.require_field(&self.met, "phi")?;

        let n_events = met.n_events();
        let mut new_pt = Vec::with_capacity(n_events);
        let mut new_phi = Vec::with_capacity(n_events);
        for event in 0..n_events {
            let (dpx, dpy) = jets.range(event).fold((0.0, 0.0), |(px, py), j| {
                let delta = jet_pt[j] - raw_pt[j];
                (px + delta * jet_phi[j].cos(), py + delta * jet_phi[j].sin())
            });
            let m = met.range(event).start;
            let px = met_pt[m].mul_add(met_phi[m].cos(), -dpx);
            let py = met_pt[m].mul_add(met_phi[m].sin(), -dpy);
            new_pt.push(px.hypot(py));
            new_phi.push(py.atan2(px));
        }

        let corrected = met
            .replace_field("pt", new_pt)?
            .replace_field("phi", new_phi)?;
        Ok(CalibratorOutput::new().with_collection(&self.met, corrected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn electrons() -> EventBatch {
        let coll = ObjectCollection::from_counts(&[1, 2])
            .with_field("pt", vec![30.0, 40.0, 50.0])
            .unwrap()
            .with_field("mass", vec![0.0, 0.0, 0.0])
            .unwrap()
            .with_field("scale_unc", vec![0.01, 0.02, 0.03])
            .unwrap();
        EventBatch::new(2).with_collection("Electron", coll).unwrap()
    }

    #[test]
    fn test_scale_nominal_and_field_uncertainty() {
        let calibrator = ScaleCalibrator::new("electrons", "Electron")
            .with_correction(Factor::Constant(2.0))
            .with_variation(ScaleVariation::new("ele_scale", Factor::Field("scale_unc".into())));

        let nominal = calibrator.apply(&electrons(), &Variation::nominal()).unwrap();
        let batch = nominal.apply_to(electrons()).unwrap();
        assert_eq!(
            batch.collection("Electron").unwrap().field("pt").unwrap(),
            &[60.0, 80.0, 100.0]
        );

        let down = calibrator.apply(&electrons(), &Variation::down("ele_scale")).unwrap();
        let batch = down.apply_to(electrons()).unwrap();
        let pt = batch.collection("Electron").unwrap().field("pt").unwrap();
        assert!((pt[1] - 80.0 * 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_scale_ignores_foreign_variation() {
        let calibrator = ScaleCalibrator::new("electrons", "Electron")
            .with_variation(ScaleVariation::new("ele_scale", Factor::Constant(0.5)));
        let out = calibrator.apply(&electrons(), &Variation::up("JES_Total")).unwrap();
        let batch = out.apply_to(electrons()).unwrap();
        assert_eq!(
            batch.collection("Electron").unwrap().field("pt").unwrap(),
            &[30.0, 40.0, 50.0]
        );
    }

    #[test]
    fn test_scale_keeps_uncorrected_copy() {
        let calibrator = ScaleCalibrator::new("electrons", "Electron")
            .with_fields(&["pt"])
            .with_correction(Factor::Constant(1.5))
            .keep_uncorrected("Electron_raw");
        assert_eq!(calibrator.writes(), vec!["Electron", "Electron_raw"]);

        let batch = calibrator
            .apply(&electrons(), &Variation::nominal())
            .unwrap()
            .apply_to(electrons())
            .unwrap();
        assert_eq!(
            batch.collection("Electron_raw").unwrap().field("pt").unwrap(),
            &[30.0, 40.0, 50.0]
        );
    }

    #[test]
    fn test_scale_missing_field() {
        let calibrator = ScaleCalibrator::new("electrons", "Electron").with_fields(&["eta"]);
        let err = calibrator.apply(&electrons(), &Variation::nominal()).unwrap_err();
        assert_eq!(err.kind_name(), "missing_field");
    }

    #[test]
    fn test_required_fields() {
        let calibrator = ScaleCalibrator::new("jets", "Jet")
            .with_correction(Factor::Field("jec".into()))
            .with_variation(ScaleVariation::new("JES", Factor::Field("jes_unc".into())));
        let fields: Vec<String> = calibrator.required_fields().into_iter().map(|(_, f)| f).collect();
        assert_eq!(fields, vec!["pt", "mass", "jec", "jes_unc"]);
        assert!(calibrator.required_fields().iter().all(|(c, _)| c == "Jet"));
    }

    fn met_batch(met_counts: &[usize]) -> EventBatch {
        let jets = ObjectCollection::from_counts(&[1])
            .with_field("pt", vec![20.0])
            .unwrap()
            .with_field("phi", vec![0.0])
            .unwrap();
        let raw = jets.replace_field("pt", vec![10.0]).unwrap();
        let n_met: usize = met_counts.iter().sum();
        let met = ObjectCollection::from_counts(met_counts)
            .with_field("pt", vec![30.0; n_met])
            .unwrap()
            .with_field("phi", vec![0.0; n_met])
            .unwrap();
        EventBatch::new(1)
            .with_collection("Jet", jets)
            .unwrap()
            .with_collection("Jet_raw", raw)
            .unwrap()
            .with_collection("MET", met)
            .unwrap()
    }

    #[test]
    fn test_met_propagation() {
        let calibrator = MetPropagationCalibrator::new("met", "MET", "Jet", "Jet_raw");
        let batch = met_batch(&[1]);
        let out = calibrator.apply(&batch, &Variation::nominal()).unwrap();
        let batch = out.apply_to(batch).unwrap();
        let met = batch.collection("MET").unwrap();
        assert!((met.field("pt").unwrap()[0] - 20.0).abs() < 1e-9);
        assert!(met.field("phi").unwrap()[0].abs() < 1e-9);
    }

    #[test]
    fn test_met_requires_one_object_per_event() {
        let calibrator = MetPropagationCalibrator::new("met", "MET", "Jet", "Jet_raw");
        let err = calibrator.apply(&met_batch(&[2]), &Variation::nominal()).unwrap_err();
        assert_eq!(err.kind_name(), "malformed");
    }

    #[test]
    fn test_factor_deserializes_untagged() {
        let constant: Factor = serde_json::from_str("1.02").unwrap();
        let field: Factor = serde_json::from_str("\"jec\"").unwrap();
        assert_eq!(constant, Factor::Constant(1.02));
        assert_eq!(field, Factor::Field("jec".to_string()));
    }
}
