//! Per-view object preselection.
//!
//! A workflow runs on every calibrated view before event selection. The
//! built-in [`ObjectPreselection`] derives filtered collections such as
//! `JetGood` or `BJetGood` and adds an `n<Name>` counter column for each.

use crate::core::{BatchSchema, ColumnData, EventBatch, ObjectCollection};
use crate::errors::{ConfigurationError, DataError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::fmt;

/// Processing applied to each calibrated view.
pub trait Workflow: Send + Sync + fmt::Debug {
    /// Workflow name.
    fn name(&self) -> &str;

    /// Collections that must be present on the calibrated view.
    fn reads(&self) -> Vec<String>;

    /// Collections and columns added to the view.
    fn writes(&self) -> Vec<String>;

    /// Derives the analysis objects of one view.
    ///
    /// # Errors
    ///
    /// Returns an error if a required collection or field is missing.
    fn process_view(&self, batch: EventBatch) -> Result<EventBatch, DataError>;

    /// Checks the calibrated view schema before any chunk runs.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first collection that is not available.
    fn validate_schema(&self, schema: &BatchSchema) -> Result<(), ConfigurationError> {
        for name in self.reads() {
            if !schema.provides(&name) {
                return Err(ConfigurationError::missing_column(self.name(), &name));
            }
        }
        Ok(())
    }

    /// The view schema after this workflow has run.
    fn output_schema(&self, schema: &BatchSchema) -> BatchSchema {
        let mut out = schema.clone();
        for name in self.writes() {
            out.add_collection(&name);
            out.columns.insert(name);
        }
        out
    }
}

/// A window cut on one object field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectCut {
    /// Field name.
    pub field: String,
    /// Inclusive lower bound.
    #[serde(default)]
    pub min: Option<f64>,
    /// Exclusive upper bound.
    #[serde(default)]
    pub max: Option<f64>,
    /// Compare the absolute value.
    #[serde(default)]
    pub abs: bool,
}

impl ObjectCut {
    /// `field >= min`.
    #[must_use]
    pub fn min(field: impl Into<String>, min: f64) -> Self {
        Self {
            field: field.into(),
            min: Some(min),
            max: None,
            abs: false,
        }
    }

    /// `|field| < max`.
    #[must_use]
    pub fn abs_max(field: impl Into<String>, max: f64) -> Self {
        Self {
            field: field.into(),
            min: None,
            max: Some(max),
            abs: true,
        }
    }

    fn passes(&self, value: f64) -> bool {
        let value = if self.abs { value.abs() } else { value };
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// Removes objects closer than `min_delta_r` to any object of `collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cleaning {
    /// Reference collection (needs `eta` and `phi`).
    pub collection: String,
    /// Minimum ΔR.
    pub min_delta_r: f64,
}

/// Definition of one derived collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSelection {
    /// Input collection; may be another derived collection defined earlier.
    pub source: String,
    /// Cuts, all required.
    #[serde(default)]
    pub cuts: Vec<ObjectCut>,
    /// Overlap removal against other collections.
    #[serde(default)]
    pub clean_against: Vec<Cleaning>,
}

impl ObjectSelection {
    /// Selection of `source` without cuts.
    #[must_use]
    pub fn of(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            cuts: Vec::new(),
            clean_against: Vec::new(),
        }
    }

    /// Adds a cut.
    #[must_use]
    pub fn with_cut(mut self, cut: ObjectCut) -> Self {
        self.cuts.push(cut);
        self
    }

    /// Adds an overlap removal.
    #[must_use]
    pub fn cleaned_against(mut self, collection: impl Into<String>, min_delta_r: f64) -> Self {
        self.clean_against.push(Cleaning {
            collection: collection.into(),
            min_delta_r,
        });
        self
    }

    fn inputs(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.source).chain(self.clean_against.iter().map(|c| &c.collection))
    }

    fn keep_mask(&self, batch: &EventBatch) -> Result<Vec<bool>, DataError> {
        let coll = batch.require_collection(&self.source)?;
        let mut keep = vec![true; coll.n_objects()];
        for cut in &self.cuts {
            let values = coll.require_field(&self.source, &cut.field)?;
            for (flag, &value) in keep.iter_mut().zip(values) {
                *flag &= cut.passes(value);
            }
        }
        for cleaning in &self.clean_against {
            let other = batch.require_collection(&cleaning.collection)?;
            apply_cleaning(&self.source, coll, &cleaning.collection, other, cleaning.min_delta_r, &mut keep)?;
        }
        Ok(keep)
    }
}

fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let mut dphi = (phi1 - phi2).abs();
    if dphi > PI {
        dphi = 2.0 * PI - dphi;
    }
    (eta1 - eta2).hypot(dphi)
}

fn apply_cleaning(
    name: &str,
    coll: &ObjectCollection,
    other_name: &str,
    other: &ObjectCollection,
    min_delta_r: f64,
    keep: &mut [bool],
) -> Result<(), DataError> {
    let eta = coll.require_field(name, "eta")?;
    let phi = coll.require_field(name, "phi")?;
    let other_eta = other.require_field(other_name, "eta")?;
    let other_phi = other.require_field(other_name, "phi")?;
    for event in 0..coll.n_events() {
        for j in coll.range(event) {
            if other
                .range(event)
                .any(|k| delta_r(eta[j], phi[j], other_eta[k], other_phi[k]) < min_delta_r)
            {
                keep[j] = false;
            }
        }
    }
    Ok(())
}

/// Counter column name for a derived collection.
#[must_use]
pub fn count_column(collection: &str) -> String {
    format!("n{collection}")
}

/// Derives filtered collections.
///
/// A derived collection may read another one; collections are produced in
/// dependency order, whatever order they are declared in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPreselection {
    /// Workflow name.
    #[serde(default = "default_workflow_name")]
    pub name: String,
    /// Output collection name -> selection.
    #[serde(default)]
    pub objects: IndexMap<String, ObjectSelection>,
}

fn default_workflow_name() -> String {
    "basic".to_string()
}

impl Default for ObjectPreselection {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectPreselection {
    /// A workflow that derives nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: default_workflow_name(),
            objects: IndexMap::new(),
        }
    }

    /// Adds a derived collection.
    #[must_use]
    pub fn with_object(mut self, name: impl Into<String>, selection: ObjectSelection) -> Self {
        self.objects.insert(name.into(), selection);
        self
    }

    /// Derived collections ordered so that each comes after those it reads.
    ///
    /// Declaration order is kept where dependencies allow. A collection
    /// reading its own name reads the input of that name.
    ///
    /// # Errors
    ///
    /// Returns the collections left over when the dependencies form a cycle.
    pub fn derivation_order(&self) -> Result<Vec<(&str, &ObjectSelection)>, Vec<String>> {
        let mut ordered: Vec<(&str, &ObjectSelection)> = Vec::with_capacity(self.objects.len());
        let mut done: BTreeSet<&str> = BTreeSet::new();
        while ordered.len() < self.objects.len() {
            let ready = self.objects.iter().find(|(name, selection)| {
                !done.contains(name.as_str())
                    && selection.inputs().all(|input| {
                        input == *name || !self.objects.contains_key(input) || done.contains(input.as_str())
                    })
            });
            let Some((name, selection)) = ready else {
                return Err(self
                    .objects
                    .keys()
                    .filter(|name| !done.contains(name.as_str()))
                    .cloned()
                    .collect());
            };
            done.insert(name.as_str());
            ordered.push((name.as_str(), selection));
        }
        Ok(ordered)
    }

    fn ordered(&self) -> Result<Vec<(&str, &ObjectSelection)>, ConfigurationError> {
        self.derivation_order()
            .map_err(|cycle| ConfigurationError::derivation_cycle(&self.name, &cycle))
    }
}

impl Workflow for ObjectPreselection {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<String> {
        let mut reads: Vec<String> = Vec::new();
        for (name, selection) in &self.objects {
            for input in selection.inputs() {
                let derived = input != name && self.objects.contains_key(input);
                if !derived && !reads.contains(input) {
                    reads.push(input.clone());
                }
            }
        }
        reads
    }

    fn writes(&self) -> Vec<String> {
        self.objects
            .keys()
            .flat_map(|name| [name.clone(), count_column(name)])
            .collect()
    }

    fn validate_schema(&self, schema: &BatchSchema) -> Result<(), ConfigurationError> {
        let mut available = schema.clone();
        for (name, selection) in self.ordered()? {
            for input in selection.inputs() {
                if !available.collections.contains(input) {
                    return Err(ConfigurationError::missing_column(name, input));
                }
            }
            for cut in &selection.cuts {
                if !available.provides_field(&selection.source, &cut.field) {
                    return Err(ConfigurationError::missing_field(name, &selection.source, &cut.field));
                }
            }
            available.derive_collection(name, &selection.source);
        }
        Ok(())
    }

    fn output_schema(&self, schema: &BatchSchema) -> BatchSchema {
        let mut out = schema.clone();
        let order = self
            .derivation_order()
            .unwrap_or_else(|_| self.objects.iter().map(|(n, s)| (n.as_str(), s)).collect());
        for (name, selection) in order {
            out.derive_collection(name, &selection.source);
            out.columns.insert(count_column(name));
        }
        out
    }

    #[allow(clippy::cast_possible_wrap)]
    fn process_view(&self, batch: EventBatch) -> Result<EventBatch, DataError> {
        let order = self
            .derivation_order()
            .map_err(|cycle| DataError::malformed(format!("derived collections form a cycle: {cycle:?}")))?;
        let mut batch = batch;
        for (name, selection) in order {
            let keep = selection.keep_mask(&batch)?;
            let derived = batch.require_collection(&selection.source)?.filter(&keep)?;
            let counts = derived.counts().into_iter().map(|c| c as i64).collect();
            batch = batch
                .with_collection(name, derived)?
                .with_column(count_column(name), ColumnData::Int(counts))?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> EventBatch {
        let jets = ObjectCollection::from_counts(&[3, 1])
            .with_field("pt", vec![50.0, 20.0, 40.0, 35.0])
            .unwrap()
            .with_field("eta", vec![0.5, 1.0, -3.0, 0.1])
            .unwrap()
            .with_field("phi", vec![0.0, 1.0, 2.0, 0.0])
            .unwrap()
            .with_field("btag", vec![0.9, 0.1, 0.8, 0.2])
            .unwrap();
        let muons = ObjectCollection::from_counts(&[0, 1])
            .with_field("eta", vec![0.1])
            .unwrap()
            .with_field("phi", vec![0.05])
            .unwrap();
        EventBatch::new(2)
            .with_collection("Jet", jets)
            .unwrap()
            .with_collection("Muon", muons)
            .unwrap()
    }

    fn workflow() -> ObjectPreselection {
        ObjectPreselection::new()
            .with_object(
                "JetGood",
                ObjectSelection::of("Jet")
                    .with_cut(ObjectCut::min("pt", 30.0))
                    .with_cut(ObjectCut::abs_max("eta", 2.5)),
            )
            .with_object(
                "BJetGood",
                ObjectSelection::of("JetGood").with_cut(ObjectCut::min("btag", 0.5)),
            )
    }

    #[test]
    fn test_derived_collections_and_counts() {
        let out = workflow().process_view(batch()).unwrap();
        assert_eq!(out.collection("JetGood").unwrap().counts(), vec![1, 1]);
        assert_eq!(out.collection("BJetGood").unwrap().counts(), vec![1, 0]);
        assert_eq!(out.column("nJetGood").unwrap(), &ColumnData::Int(vec![1, 1]));
        assert_eq!(out.column("nBJetGood").unwrap(), &ColumnData::Int(vec![1, 0]));
    }

    #[test]
    fn test_reads_and_writes() {
        let wf = workflow();
        assert_eq!(wf.reads(), vec!["Jet"]);
        assert_eq!(wf.writes(), vec!["JetGood", "nJetGood", "BJetGood", "nBJetGood"]);
    }

    #[test]
    fn test_cleaning_removes_overlapping_jets() {
        let wf = ObjectPreselection::new()
            .with_object("JetClean", ObjectSelection::of("Jet").cleaned_against("Muon", 0.4));
        let out = wf.process_view(batch()).unwrap();
        assert_eq!(out.collection("JetClean").unwrap().counts(), vec![3, 0]);
    }

    #[test]
    fn test_validate_schema() {
        let schema = batch().schema();
        assert!(workflow().validate_schema(&schema).is_ok());

        let wf = ObjectPreselection::new().with_object("ElectronGood", ObjectSelection::of("Electron"));
        let err = wf.validate_schema(&schema).unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-003-MISSING_COLUMN"));
    }

    #[test]
    fn test_missing_field_is_data_error() {
        let wf = ObjectPreselection::new().with_object(
            "JetGood",
            ObjectSelection::of("Jet").with_cut(ObjectCut::min("jetId", 2.0)),
        );
        assert!(wf.process_view(batch()).is_err());
    }

    #[test]
    fn test_delta_r_wraps_phi() {
        assert!((delta_r(0.0, 3.1, 0.0, -3.1) - (2.0 * PI - 6.2)).abs() < 1e-9);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let wf = ObjectPreselection::new()
            .with_object(
                "BJetGood",
                ObjectSelection::of("JetGood").with_cut(ObjectCut::min("btag", 0.5)),
            )
            .with_object(
                "JetGood",
                ObjectSelection::of("Jet")
                    .with_cut(ObjectCut::min("pt", 30.0))
                    .with_cut(ObjectCut::abs_max("eta", 2.5)),
            );
        let order: Vec<&str> = wf.derivation_order().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["JetGood", "BJetGood"]);
        assert_eq!(wf.reads(), vec!["Jet"]);
        assert!(wf.validate_schema(&batch().schema()).is_ok());

        let out = wf.process_view(batch()).unwrap();
        assert_eq!(out.collection("BJetGood").unwrap().counts(), vec![1, 0]);
    }

    #[test]
    fn test_derivation_cycle_rejected() {
        let wf = ObjectPreselection::new()
            .with_object("A", ObjectSelection::of("B"))
            .with_object("B", ObjectSelection::of("A"));
        let err = wf.validate_schema(&batch().schema()).unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-011-DERIVATION_CYCLE"));
        assert!(wf.process_view(batch()).is_err());
    }

    #[test]
    fn test_cut_field_checked_against_schema() {
        let wf = ObjectPreselection::new().with_object(
            "JetGood",
            ObjectSelection::of("Jet").with_cut(ObjectCut::min("jetId", 2.0)),
        );
        let err = wf.validate_schema(&batch().schema()).unwrap_err();
        assert!(err.message.contains("field 'jetId'"));
    }

    #[test]
    fn test_output_schema_carries_source_fields() {
        let out = workflow().output_schema(&batch().schema());
        assert!(out.provides_field("BJetGood", "btag"));
        assert!(!out.provides_field("BJetGood", "mass"));
        assert!(out.provides("nBJetGood"));
    }
}
