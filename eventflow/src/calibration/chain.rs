//! Ordered execution of calibrators with per-variation re-runs.

use super::Calibrator;
use crate::core::{BatchSchema, EventBatch, Variation};
use crate::errors::{ConfigurationError, DataError};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A validated, ordered list of calibrators.
#[derive(Debug, Clone, Default)]
pub struct CalibratorChain {
    calibrators: Vec<Arc<dyn Calibrator>>,
    /// Variation name -> index of the owning calibrator.
    owners: HashMap<String, usize>,
}

impl CalibratorChain {
    /// Builds and validates a chain.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate calibrator names, variations declared
    /// twice, shape variations without both directions, or a calibrator that
    /// reads a collection a later calibrator writes.
    pub fn new(calibrators: Vec<Arc<dyn Calibrator>>) -> Result<Self, ConfigurationError> {
        let mut names = HashSet::new();
        let mut owners = HashMap::new();

        for (position, calibrator) in calibrators.iter().enumerate() {
            let name = calibrator.name();
            if !names.insert(name.to_string()) {
                return Err(ConfigurationError::invalid(format!(
                    "Calibrator '{name}' is declared more than once"
                ))
                .with_subjects(vec![name.to_string()]));
            }

            for declared in calibrator.variations() {
                if !declared.is_complete() {
                    return Err(ConfigurationError::incomplete_shape_variation(&declared.name, name));
                }
                if let Some(&existing) = owners.get(&declared.name) {
                    let existing: &Arc<dyn Calibrator> = &calibrators[existing];
                    return Err(ConfigurationError::duplicate_variation(
                        &declared.name,
                        existing.name(),
                        name,
                    ));
                }
                owners.insert(declared.name, position);
            }
        }

        for (position, calibrator) in calibrators.iter().enumerate() {
            let own_writes = calibrator.writes();
            for read in calibrator.reads() {
                if own_writes.contains(&read) {
                    continue;
                }
                if let Some(writer) = calibrators[position + 1..]
                    .iter()
                    .find(|later| later.writes().contains(&read))
                {
                    return Err(ConfigurationError::calibrator_order(
                        calibrator.name(),
                        &read,
                        writer.name(),
                    ));
                }
            }
        }

        Ok(Self { calibrators, owners })
    }

    /// Checks that every read collection and field is satisfied by the
    /// input or an earlier writer.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unsatisfied read.
    pub fn validate_schema(&self, schema: &BatchSchema) -> Result<(), ConfigurationError> {
        self.output_schema(schema).map(|_| ())
    }

    /// The schema seen after the whole chain has run.
    ///
    /// A written collection that replaces an input keeps its known fields;
    /// a new one is added with unknown fields.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unsatisfied read.
    pub fn output_schema(&self, schema: &BatchSchema) -> Result<BatchSchema, ConfigurationError> {
        let mut available = schema.clone();
        for calibrator in &self.calibrators {
            for read in calibrator.reads() {
                if !available.collections.contains(&read) {
                    return Err(ConfigurationError::missing_column(calibrator.name(), &read));
                }
            }
            for (collection, field) in calibrator.required_fields() {
                if !available.provides_field(&collection, &field) {
                    return Err(ConfigurationError::missing_field(calibrator.name(), &collection, &field));
                }
            }
            for write in calibrator.writes() {
                available.add_collection(&write);
            }
        }
        Ok(available)
    }

    /// Expands a configuration reference to variation names.
    ///
    /// A calibrator name expands to every variation it owns; a variation
    /// name expands to itself. Unknown references yield `None`.
    #[must_use]
    pub fn expand(&self, reference: &str) -> Option<Vec<String>> {
        if let Some(calibrator) = self.calibrators.iter().find(|c| c.name() == reference) {
            return Some(calibrator.variations().into_iter().map(|v| v.name).collect());
        }
        self.owners
            .contains_key(reference)
            .then(|| vec![reference.to_string()])
    }

    /// Name of the calibrator owning `variation`.
    #[must_use]
    pub fn owner_of(&self, variation: &str) -> Option<&str> {
        self.owners
            .get(variation)
            .map(|&i| self.calibrators[i].name())
    }

    /// Every owned variation as `(name, owner)`, in chain order.
    #[must_use]
    pub fn declared(&self) -> Vec<(String, String)> {
        self.calibrators
            .iter()
            .flat_map(|c| {
                c.variations()
                    .into_iter()
                    .map(move |v| (v.name, c.name().to_string()))
            })
            .collect()
    }

    /// Calibrator names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.calibrators.iter().map(|c| c.name()).collect()
    }

    /// Every collection written by some calibrator.
    #[must_use]
    pub fn writes(&self) -> BTreeSet<String> {
        self.calibrators.iter().flat_map(|c| c.writes()).collect()
    }

    /// Number of calibrators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calibrators.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calibrators.is_empty()
    }

    /// Runs the chain for nominal and for each requested shape variation.
    ///
    /// The batch is snapshotted before every calibrator. A variation owned
    /// by calibrator `k` restarts from the snapshot before `k`, so upstream
    /// outputs are reused and downstream calibrators see the varied inputs.
    ///
    /// # Errors
    ///
    /// Returns the first data error raised by a calibrator, or an
    /// `unknown_variation` error for a pass no calibrator owns.
    pub fn calibrate(
        &self,
        batch: &EventBatch,
        shape_variations: &[Variation],
    ) -> Result<CalibratedViews, DataError> {
        let nominal_pass = Variation::nominal();
        let mut snapshots = Vec::with_capacity(self.calibrators.len());
        let mut current = batch.clone();
        for calibrator in &self.calibrators {
            snapshots.push(current.clone());
            current = run_one(calibrator.as_ref(), current, &nominal_pass)?;
        }

        let mut varied = BTreeMap::new();
        for variation in shape_variations.iter().filter(|v| !v.is_nominal()) {
            let Some(&start) = self.owners.get(&variation.name) else {
                return Err(DataError::unknown_variation(&variation.name));
            };
            let mut view = snapshots[start].clone();
            for calibrator in &self.calibrators[start..] {
                view = run_one(calibrator.as_ref(), view, variation)?;
            }
            varied.insert(variation.clone(), view);
        }

        Ok(CalibratedViews {
            nominal: current,
            varied,
        })
    }
}

fn run_one(
    calibrator: &dyn Calibrator,
    batch: EventBatch,
    variation: &Variation,
) -> Result<EventBatch, DataError> {
    debug!(calibrator = calibrator.name(), variation = %variation, "Applying calibrator");
    let output = calibrator.apply(&batch, variation)?;
    output.apply_to(batch)
}

/// The calibrated batch for nominal and for each shape variation.
#[derive(Debug, Clone)]
pub struct CalibratedViews {
    nominal: EventBatch,
    varied: BTreeMap<Variation, EventBatch>,
}

impl CalibratedViews {
    /// Views with only a nominal entry.
    #[must_use]
    pub fn nominal_only(batch: EventBatch) -> Self {
        Self {
            nominal: batch,
            varied: BTreeMap::new(),
        }
    }

    /// The nominal view.
    #[must_use]
    pub fn nominal(&self) -> &EventBatch {
        &self.nominal
    }

    /// The view for a pass: its own view for a shape variation, else `None`.
    #[must_use]
    pub fn get(&self, variation: &Variation) -> Option<&EventBatch> {
        if variation.is_nominal() {
            Some(&self.nominal)
        } else {
            self.varied.get(variation)
        }
    }

    /// Returns the view for a pass, falling back to nominal.
    #[must_use]
    pub fn view_for(&self, variation: &Variation) -> &EventBatch {
        self.get(variation).unwrap_or(&self.nominal)
    }

    /// Varied views in variation order.
    pub fn varied(&self) -> impl Iterator<Item = (&Variation, &EventBatch)> {
        self.varied.iter()
    }

    /// Applies `f` to every view.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<F>(self, mut f: F) -> Result<Self, DataError>
    where
        F: FnMut(EventBatch) -> Result<EventBatch, DataError>,
    {
        let nominal = f(self.nominal)?;
        let varied = self
            .varied
            .into_iter()
            .map(|(v, batch)| f(batch).map(|b| (v, b)))
            .collect::<Result<_, _>>()?;
        Ok(Self { nominal, varied })
    }

    /// Number of views including nominal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.varied.len() + 1
    }

    /// Always false; the nominal view is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{
        CalibratorOutput, DeclaredVariation, Factor, MetPropagationCalibrator, ScaleCalibrator,
        ScaleVariation,
    };
    use crate::core::{Direction, ObjectCollection};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StubCalibrator {
        name: String,
        reads: Vec<String>,
        writes: Vec<String>,
        variations: Vec<DeclaredVariation>,
        calls: AtomicUsize,
    }

    impl StubCalibrator {
        fn new(name: &str, reads: &[&str], writes: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                reads: reads.iter().map(|s| (*s).to_string()).collect(),
                writes: writes.iter().map(|s| (*s).to_string()).collect(),
                variations: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn owning(mut self, variation: DeclaredVariation) -> Self {
            self.variations.push(variation);
            self
        }
    }

    impl Calibrator for StubCalibrator {
        fn name(&self) -> &str {
            &self.name
        }

        fn reads(&self) -> Vec<String> {
            self.reads.clone()
        }

        fn writes(&self) -> Vec<String> {
            self.writes.clone()
        }

        fn variations(&self) -> Vec<DeclaredVariation> {
            self.variations.clone()
        }

        fn apply(&self, _batch: &EventBatch, _variation: &Variation) -> Result<CalibratorOutput, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CalibratorOutput::new())
        }
    }

    fn batch() -> EventBatch {
        let jets = ObjectCollection::from_counts(&[2, 1])
            .with_field("pt", vec![40.0, 25.0, 60.0])
            .unwrap()
            .with_field("phi", vec![0.0, 1.0, -2.0])
            .unwrap();
        let met = ObjectCollection::from_counts(&[1, 1])
            .with_field("pt", vec![30.0, 10.0])
            .unwrap()
            .with_field("phi", vec![0.5, 2.0])
            .unwrap();
        EventBatch::new(2)
            .with_collection("Jet", jets)
            .unwrap()
            .with_collection("MET", met)
            .unwrap()
    }

    fn jets_calibrator() -> ScaleCalibrator {
        ScaleCalibrator::new("jets", "Jet")
            .with_fields(&["pt"])
            .with_correction(Factor::Constant(1.1))
            .with_variation(ScaleVariation::new("JES_Total", Factor::Constant(0.05)))
            .keep_uncorrected("Jet_uncorrected")
    }

    fn met_calibrator() -> MetPropagationCalibrator {
        MetPropagationCalibrator::new("met", "MET", "Jet", "Jet_uncorrected")
    }

    #[test]
    fn test_duplicate_calibrator_rejected() {
        let err = CalibratorChain::new(vec![
            Arc::new(StubCalibrator::new("jets", &["Jet"], &["Jet"])),
            Arc::new(StubCalibrator::new("jets", &["Jet"], &["Jet"])),
        ])
        .unwrap_err();
        assert!(err.message.contains("more than once"));
    }

    #[test]
    fn test_variation_owned_twice_rejected() {
        let err = CalibratorChain::new(vec![
            Arc::new(StubCalibrator::new("jets", &["Jet"], &["Jet"]).owning(DeclaredVariation::up_down("JES"))),
            Arc::new(StubCalibrator::new("fatjets", &["FatJet"], &["FatJet"]).owning(DeclaredVariation::up_down("JES"))),
        ])
        .unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-001-DUPLICATE_VARIATION"));
    }

    #[test]
    fn test_incomplete_variation_rejected() {
        let up_only = DeclaredVariation {
            name: "JER".to_string(),
            directions: vec![Direction::Up],
        };
        let err = CalibratorChain::new(vec![Arc::new(
            StubCalibrator::new("jets", &["Jet"], &["Jet"]).owning(up_only),
        )])
        .unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-006-INCOMPLETE_SHAPE"));
    }

    #[test]
    fn test_order_violation_rejected() {
        let err = CalibratorChain::new(vec![
            Arc::new(met_calibrator()),
            Arc::new(jets_calibrator()),
        ])
        .unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-007-CALIBRATOR_ORDER"));
    }

    #[test]
    fn test_successive_writers_allowed() {
        let chain = CalibratorChain::new(vec![
            Arc::new(StubCalibrator::new("jes", &["Jet"], &["Jet"])),
            Arc::new(StubCalibrator::new("jer", &["Jet"], &["Jet"])),
        ]);
        assert!(chain.is_ok());
    }

    #[test]
    fn test_validate_schema() {
        let chain = CalibratorChain::new(vec![Arc::new(jets_calibrator()), Arc::new(met_calibrator())]).unwrap();
        assert!(chain.validate_schema(&batch().schema()).is_ok());

        let mut schema = batch().schema();
        schema.collections.remove("MET");
        let err = chain.validate_schema(&schema).unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-003-MISSING_COLUMN"));
    }

    #[test]
    fn test_validate_schema_rejects_missing_field() {
        let chain = CalibratorChain::new(vec![Arc::new(
            ScaleCalibrator::new("jets", "Jet").with_variation(ScaleVariation::new("JES_Total", Factor::Constant(0.05))),
        )])
        .unwrap();
        // Default fields are pt and mass; the batch has no mass.
        let err = chain.validate_schema(&batch().schema()).unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-003-MISSING_COLUMN"));
        assert!(err.message.contains("field 'mass' of 'Jet'"));
    }

    #[test]
    fn test_output_schema_keeps_replaced_fields() {
        let chain = CalibratorChain::new(vec![Arc::new(jets_calibrator()), Arc::new(met_calibrator())]).unwrap();
        let out = chain.output_schema(&batch().schema()).unwrap();
        assert!(out.provides_field("Jet", "phi"));
        assert!(!out.provides_field("Jet", "mass"));
        assert!(out.provides("Jet_uncorrected"));
    }

    #[test]
    fn test_unowned_shape_variation_is_error() {
        let chain = CalibratorChain::new(vec![Arc::new(jets_calibrator())]).unwrap();
        let err = chain.calibrate(&batch(), &[Variation::up("ele_scale")]).unwrap_err();
        assert_eq!(err.kind_name(), "unknown_variation");
    }

    #[test]
    fn test_expand_and_owner() {
        let chain = CalibratorChain::new(vec![Arc::new(jets_calibrator()), Arc::new(met_calibrator())]).unwrap();
        assert_eq!(chain.expand("jets"), Some(vec!["JES_Total".to_string()]));
        assert_eq!(chain.expand("JES_Total"), Some(vec!["JES_Total".to_string()]));
        assert_eq!(chain.expand("met"), Some(vec![]));
        assert_eq!(chain.expand("unknown"), None);
        assert_eq!(chain.owner_of("JES_Total"), Some("jets"));
    }

    #[test]
    fn test_variation_reruns_only_tail() {
        let ele = Arc::new(
            StubCalibrator::new("electrons", &["Electron"], &["Electron"])
                .owning(DeclaredVariation::up_down("ele_scale")),
        );
        let jets = Arc::new(
            StubCalibrator::new("jets", &["Jet"], &["Jet"]).owning(DeclaredVariation::up_down("JES_Total")),
        );
        let chain = CalibratorChain::new(vec![ele.clone() as Arc<dyn Calibrator>, jets.clone()]).unwrap();

        let views = chain
            .calibrate(
                &EventBatch::new(0),
                &[Variation::up("JES_Total"), Variation::down("JES_Total")],
            )
            .unwrap();
        assert_eq!(views.len(), 3);
        assert_eq!(ele.calls.load(Ordering::SeqCst), 1);
        assert_eq!(jets.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_shape_variation_propagates_downstream() {
        let chain = CalibratorChain::new(vec![Arc::new(jets_calibrator()), Arc::new(met_calibrator())]).unwrap();
        let raw = batch();
        let views = chain
            .calibrate(&raw, &[Variation::up("JES_Total"), Variation::down("JES_Total")])
            .unwrap();

        let raw_pt = raw.collection("Jet").unwrap().field("pt").unwrap();
        assert_eq!(raw_pt, &[40.0, 25.0, 60.0]);

        let nominal_pt = views.nominal().collection("Jet").unwrap().field("pt").unwrap();
        let up_pt = views
            .get(&Variation::up("JES_Total"))
            .unwrap()
            .collection("Jet")
            .unwrap()
            .field("pt")
            .unwrap();
        assert!((nominal_pt[0] - 44.0).abs() < 1e-9);
        assert!((up_pt[0] - 40.0 * 1.1 * 1.05).abs() < 1e-9);

        let met_nominal = views.nominal().collection("MET").unwrap().field("pt").unwrap()[0];
        let met_up = views
            .view_for(&Variation::up("JES_Total"))
            .collection("MET")
            .unwrap()
            .field("pt")
            .unwrap()[0];
        assert!((met_nominal - met_up).abs() > 1e-6);
    }

    #[test]
    fn test_missing_input_is_data_error() {
        let chain = CalibratorChain::new(vec![Arc::new(jets_calibrator())]).unwrap();
        let err = chain.calibrate(&EventBatch::new(2), &[]).unwrap_err();
        assert_eq!(err.kind_name(), "missing_collection");
    }

    #[test]
    fn test_weight_pass_falls_back_to_nominal() {
        let views = CalibratedViews::nominal_only(batch());
        assert!(views.get(&Variation::up("pileup")).is_none());
        assert_eq!(views.view_for(&Variation::up("pileup")).n_events(), 2);
    }
}
