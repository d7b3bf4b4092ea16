//! Built-in cuts.

use super::{Cut, CutContext, Mask};
use crate::core::EventBatch;
use crate::errors::DataError;
use std::fmt;
use std::sync::Arc;

/// Keeps every event.
#[derive(Debug, Clone)]
pub struct Passthrough {
    name: String,
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new("passthrough")
    }
}

impl Passthrough {
    /// Creates a passthrough cut.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Cut for Passthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, batch: &EventBatch, _ctx: &CutContext<'_>) -> Result<Mask, DataError> {
        Ok(Mask::all(batch.n_events()))
    }
}

/// At least `min` objects in a collection.
#[derive(Debug, Clone)]
pub struct MinObjects {
    name: String,
    collection: String,
    min: usize,
}

impl MinObjects {
    /// Creates the cut.
    #[must_use]
    pub fn new(name: impl Into<String>, collection: impl Into<String>, min: usize) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            min,
        }
    }
}

impl Cut for MinObjects {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<String> {
        vec![self.collection.clone()]
    }

    fn evaluate(&self, batch: &EventBatch, _ctx: &CutContext<'_>) -> Result<Mask, DataError> {
        let coll = batch.require_collection(&self.collection)?;
        Ok(coll.counts().into_iter().map(|c| c >= self.min).collect::<Vec<_>>().into())
    }
}

/// An event-level column at least `min`.
#[derive(Debug, Clone)]
pub struct MinColumn {
    name: String,
    column: String,
    min: f64,
}

impl MinColumn {
    /// Creates the cut.
    #[must_use]
    pub fn new(name: impl Into<String>, column: impl Into<String>, min: f64) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            min,
        }
    }
}

impl Cut for MinColumn {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn evaluate(&self, batch: &EventBatch, _ctx: &CutContext<'_>) -> Result<Mask, DataError> {
        let col = batch.require_column(&self.column)?;
        Ok((0..col.len()).map(|i| col.value(i) >= self.min).collect::<Vec<_>>().into())
    }
}

fn flag_columns<'b>(
    batch: &'b EventBatch,
    flags: &[String],
) -> Result<Vec<&'b crate::core::ColumnData>, DataError> {
    flags.iter().map(|f| batch.require_column(f)).collect()
}

/// Every listed flag set (event quality filters).
#[derive(Debug, Clone)]
pub struct AllFlags {
    name: String,
    flags: Vec<String>,
}

impl AllFlags {
    /// Creates the cut.
    #[must_use]
    pub fn new(name: impl Into<String>, flags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            flags,
        }
    }
}

impl Cut for AllFlags {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<String> {
        self.flags.clone()
    }

    fn evaluate(&self, batch: &EventBatch, _ctx: &CutContext<'_>) -> Result<Mask, DataError> {
        let columns = flag_columns(batch, &self.flags)?;
        Ok((0..batch.n_events())
            .map(|i| columns.iter().all(|c| c.truthy(i)))
            .collect::<Vec<_>>()
            .into())
    }
}

/// At least one listed flag set (trigger paths).
#[derive(Debug, Clone)]
pub struct AnyFlag {
    name: String,
    flags: Vec<String>,
}

impl AnyFlag {
    /// Creates the cut.
    #[must_use]
    pub fn new(name: impl Into<String>, flags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            flags,
        }
    }
}

impl Cut for AnyFlag {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<String> {
        self.flags.clone()
    }

    fn evaluate(&self, batch: &EventBatch, _ctx: &CutContext<'_>) -> Result<Mask, DataError> {
        let columns = flag_columns(batch, &self.flags)?;
        Ok((0..batch.n_events())
            .map(|i| columns.iter().any(|c| c.truthy(i)))
            .collect::<Vec<_>>()
            .into())
    }
}

/// Certified-luminosity filter: data events need the flag, simulation passes.
#[derive(Debug, Clone)]
pub struct GoldenJson {
    name: String,
    column: String,
}

impl GoldenJson {
    /// Creates the cut reading the certification flag from `column`.
    #[must_use]
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

impl Cut for GoldenJson {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, batch: &EventBatch, ctx: &CutContext<'_>) -> Result<Mask, DataError> {
        if !ctx.is_data {
            return Ok(Mask::all(batch.n_events()));
        }
        let col = batch.require_column(&self.column)?;
        Ok((0..col.len()).map(|i| col.truthy(i)).collect::<Vec<_>>().into())
    }
}

/// Signature of a custom cut function.
pub type CutFn = dyn Fn(&EventBatch, &CutContext<'_>) -> Result<Mask, DataError> + Send + Sync;

/// A cut backed by a closure.
#[derive(Clone)]
pub struct FnCut {
    name: String,
    requires: Vec<String>,
    func: Arc<CutFn>,
}

impl FnCut {
    /// Creates a custom cut.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EventBatch, &CutContext<'_>) -> Result<Mask, DataError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            requires: Vec::new(),
            func: Arc::new(func),
        }
    }

    /// Declares the columns the closure reads.
    #[must_use]
    pub fn with_requires(mut self, requires: &[&str]) -> Self {
        self.requires = requires.iter().map(|r| (*r).to_string()).collect();
        self
    }
}

impl fmt::Debug for FnCut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCut")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

impl Cut for FnCut {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<String> {
        self.requires.clone()
    }

    fn evaluate(&self, batch: &EventBatch, ctx: &CutContext<'_>) -> Result<Mask, DataError> {
        (self.func)(batch, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnData, ObjectCollection};

    const MC: CutContext<'static> = CutContext {
        sample: "TTTo2L2Nu",
        year: "2018",
        is_data: false,
    };

    const DATA: CutContext<'static> = CutContext {
        sample: "DATA_SingleMuon",
        year: "2018",
        is_data: true,
    };

    fn batch() -> EventBatch {
        EventBatch::new(4)
            .with_column("PV_npvsGood", ColumnData::Int(vec![0, 1, 3, 2]))
            .unwrap()
            .with_column("Flag_a", ColumnData::Bool(vec![true, true, false, true]))
            .unwrap()
            .with_column("Flag_b", ColumnData::Bool(vec![true, false, false, true]))
            .unwrap()
            .with_column("lumimask", ColumnData::Bool(vec![false, true, true, true]))
            .unwrap()
            .with_collection(
                "BJetGood",
                ObjectCollection::from_counts(&[0, 1, 2, 0]),
            )
            .unwrap()
    }

    #[test]
    fn test_passthrough() {
        let mask = Passthrough::default().evaluate(&batch(), &MC).unwrap();
        assert_eq!(mask.count(), 4);
    }

    #[test]
    fn test_min_objects() {
        let mask = MinObjects::new("2btag", "BJetGood", 2).evaluate(&batch(), &MC).unwrap();
        assert_eq!(mask.as_slice(), &[false, false, true, false]);
    }

    #[test]
    fn test_min_column() {
        let mask = MinColumn::new("nPVgood", "PV_npvsGood", 1.0).evaluate(&batch(), &MC).unwrap();
        assert_eq!(mask.as_slice(), &[false, true, true, true]);
    }

    #[test]
    fn test_flags() {
        let flags = vec!["Flag_a".to_string(), "Flag_b".to_string()];
        let all = AllFlags::new("eventFlags", flags.clone()).evaluate(&batch(), &MC).unwrap();
        let any = AnyFlag::new("HLT", flags).evaluate(&batch(), &MC).unwrap();
        assert_eq!(all.as_slice(), &[true, false, false, true]);
        assert_eq!(any.as_slice(), &[true, true, false, true]);
    }

    #[test]
    fn test_missing_flag_is_error() {
        let cut = AllFlags::new("eventFlags", vec!["Flag_missing".to_string()]);
        let err = cut.evaluate(&batch(), &MC).unwrap_err();
        assert_eq!(err.kind_name(), "missing_column");
    }

    #[test]
    fn test_golden_json_only_filters_data() {
        let cut = GoldenJson::new("goldenJson", "lumimask");
        assert_eq!(cut.evaluate(&batch(), &MC).unwrap().count(), 4);
        assert_eq!(cut.evaluate(&batch(), &DATA).unwrap().count(), 3);
        assert!(cut.evaluate(&EventBatch::new(2), &MC).is_ok());
    }

    #[test]
    fn test_fn_cut() {
        let cut = FnCut::new("even", |batch: &EventBatch, _ctx: &CutContext<'_>| {
            Ok((0..batch.n_events()).map(|i| i % 2 == 0).collect::<Vec<_>>().into())
        })
        .with_requires(&["PV_npvsGood"]);
        assert_eq!(cut.requires(), vec!["PV_npvsGood"]);
        assert_eq!(cut.evaluate(&batch(), &MC).unwrap().count(), 2);
        assert!(format!("{cut:?}").contains("even"));
    }
}
