//! Built-in weight components.

use super::{WeightComponent, WeightContext, WeightValues};
use crate::core::{EventBatch, ObjectCollection};
use crate::errors::DataError;
use serde::{Deserialize, Serialize};

/// The same value for every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantWeight {
    /// Component name.
    pub name: String,
    /// Nominal value.
    pub value: f64,
    /// Up value.
    #[serde(default)]
    pub up: Option<f64>,
    /// Down value.
    #[serde(default)]
    pub down: Option<f64>,
}

impl ConstantWeight {
    /// Creates a constant weight without variations.
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            up: None,
            down: None,
        }
    }

    /// Adds up/down values.
    #[must_use]
    pub fn with_variations(mut self, up: f64, down: f64) -> Self {
        self.up = Some(up);
        self.down = Some(down);
        self
    }
}

impl WeightComponent for ConstantWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_variations(&self) -> bool {
        self.up.is_some() && self.down.is_some()
    }

    fn compute(&self, batch: &EventBatch, _ctx: &WeightContext<'_>) -> Result<WeightValues, DataError> {
        let n = batch.n_events();
        Ok(match (self.up, self.down) {
            (Some(up), Some(down)) => {
                WeightValues::with_variations(vec![self.value; n], vec![up; n], vec![down; n])
            }
            _ => WeightValues::nominal(vec![self.value; n]),
        })
    }
}

/// Reads an event-level column (e.g. the generator weight).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnWeight {
    /// Component name.
    pub name: String,
    /// Column read.
    pub column: String,
}

impl ColumnWeight {
    /// Creates a column weight.
    #[must_use]
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

impl WeightComponent for ColumnWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_variations(&self) -> bool {
        false
    }

    fn requires(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn compute(&self, batch: &EventBatch, _ctx: &WeightContext<'_>) -> Result<WeightValues, DataError> {
        Ok(WeightValues::nominal(batch.require_column(&self.column)?.to_f64()))
    }
}

fn default_scale() -> f64 {
    1.0
}

/// A sample-level number from the chunk metadata, broadcast to every event.
///
/// The value is `scale * metadata[key]`, divided by `metadata[normalize_by]`
/// when set (e.g. a cross-section normalised by the sum of generator weights).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataWeight {
    /// Component name.
    pub name: String,
    /// Metadata key.
    pub key: String,
    /// Constant multiplier.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Metadata key to divide by.
    #[serde(default)]
    pub normalize_by: Option<String>,
}

impl MetadataWeight {
    /// Creates a metadata weight.
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            scale: 1.0,
            normalize_by: None,
        }
    }

    /// Multiplies the value by `scale`.
    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Divides the value by another metadata entry.
    #[must_use]
    pub fn normalized_by(mut self, key: impl Into<String>) -> Self {
        self.normalize_by = Some(key.into());
        self
    }
}

fn metadata_value(ctx: &WeightContext<'_>, key: &str) -> Result<f64, DataError> {
    ctx.metadata.get(key).copied().ok_or_else(|| {
        DataError::malformed(format!("sample '{}' has no metadata '{key}'", ctx.sample))
    })
}

impl WeightComponent for MetadataWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_variations(&self) -> bool {
        false
    }

    fn compute(&self, batch: &EventBatch, ctx: &WeightContext<'_>) -> Result<WeightValues, DataError> {
        let mut value = self.scale * metadata_value(ctx, &self.key)?;
        if let Some(norm) = &self.normalize_by {
            value /= metadata_value(ctx, norm)?;
        }
        Ok(WeightValues::nominal(vec![value; batch.n_events()]))
    }
}

/// Event-level scale factor columns with optional up/down columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleFactorWeight {
    /// Component name.
    pub name: String,
    /// Nominal column.
    pub nominal: String,
    /// Up column.
    #[serde(default)]
    pub up: Option<String>,
    /// Down column.
    #[serde(default)]
    pub down: Option<String>,
}

impl ScaleFactorWeight {
    /// Creates a scale factor weight from `<column>`, `<column>Up` and `<column>Down`.
    #[must_use]
    pub fn with_suffixes(name: impl Into<String>, column: &str) -> Self {
        Self {
            name: name.into(),
            nominal: column.to_string(),
            up: Some(format!("{column}Up")),
            down: Some(format!("{column}Down")),
        }
    }

    /// Creates a scale factor weight without variations.
    #[must_use]
    pub fn new(name: impl Into<String>, nominal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nominal: nominal.into(),
            up: None,
            down: None,
        }
    }
}

impl WeightComponent for ScaleFactorWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_variations(&self) -> bool {
        self.up.is_some() && self.down.is_some()
    }

    fn requires(&self) -> Vec<String> {
        std::iter::once(self.nominal.clone())
            .chain(self.up.clone())
            .chain(self.down.clone())
            .collect()
    }

    fn compute(&self, batch: &EventBatch, _ctx: &WeightContext<'_>) -> Result<WeightValues, DataError> {
        let nominal = batch.require_column(&self.nominal)?.to_f64();
        match (&self.up, &self.down) {
            (Some(up), Some(down)) => Ok(WeightValues::with_variations(
                nominal,
                batch.require_column(up)?.to_f64(),
                batch.require_column(down)?.to_f64(),
            )),
            _ => Ok(WeightValues::nominal(nominal)),
        }
    }
}

/// Product over the objects of each event of per-object scale factors.
///
/// Events without objects get 1.0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProductWeight {
    /// Component name.
    pub name: String,
    /// Collection.
    pub collection: String,
    /// Nominal field.
    pub nominal: String,
    /// Up field.
    #[serde(default)]
    pub up: Option<String>,
    /// Down field.
    #[serde(default)]
    pub down: Option<String>,
}

impl ObjectProductWeight {
    /// Creates an object product weight with up/down fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        nominal: impl Into<String>,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            nominal: nominal.into(),
            up: Some(up.into()),
            down: Some(down.into()),
        }
    }

    fn product(&self, coll: &ObjectCollection, field: &str) -> Result<Vec<f64>, DataError> {
        let values = coll.require_field(&self.collection, field)?;
        Ok((0..coll.n_events())
            .map(|event| coll.range(event).map(|j| values[j]).product())
            .collect())
    }
}

impl WeightComponent for ObjectProductWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_variations(&self) -> bool {
        self.up.is_some() && self.down.is_some()
    }

    fn requires(&self) -> Vec<String> {
        vec![self.collection.clone()]
    }

    fn compute(&self, batch: &EventBatch, _ctx: &WeightContext<'_>) -> Result<WeightValues, DataError> {
        let coll = batch.require_collection(&self.collection)?;
        let nominal = self.product(coll, &self.nominal)?;
        match (&self.up, &self.down) {
            (Some(up), Some(down)) => Ok(WeightValues::with_variations(
                nominal,
                self.product(coll, up)?,
                self.product(coll, down)?,
            )),
            _ => Ok(WeightValues::nominal(nominal)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnData;
    use std::collections::BTreeMap;

    fn metadata() -> BTreeMap<String, f64> {
        [("xsec", 88.0), ("lumi", 59.7), ("sum_genweights", 1000.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn batch() -> EventBatch {
        let electrons = ObjectCollection::from_counts(&[2, 0, 1])
            .with_field("sf", vec![0.9, 0.8, 1.1])
            .unwrap()
            .with_field("sf_up", vec![1.0, 0.9, 1.2])
            .unwrap()
            .with_field("sf_down", vec![0.8, 0.7, 1.0])
            .unwrap();
        EventBatch::new(3)
            .with_column("genWeight", ColumnData::Float(vec![1.0, -1.0, 2.0]))
            .unwrap()
            .with_column("puWeight", ColumnData::Float(vec![1.0, 0.5, 1.5]))
            .unwrap()
            .with_column("puWeightUp", ColumnData::Float(vec![1.1, 0.6, 1.6]))
            .unwrap()
            .with_column("puWeightDown", ColumnData::Float(vec![0.9, 0.4, 1.4]))
            .unwrap()
            .with_collection("ElectronGood", electrons)
            .unwrap()
    }

    fn with_ctx<T>(f: impl FnOnce(&WeightContext<'_>) -> T) -> T {
        let metadata = metadata();
        let ctx = WeightContext {
            sample: "TTTo2L2Nu",
            year: "2018",
            is_data: false,
            metadata: &metadata,
        };
        f(&ctx)
    }

    #[test]
    fn test_column_weight() {
        let values = with_ctx(|ctx| ColumnWeight::new("genWeight", "genWeight").compute(&batch(), ctx)).unwrap();
        assert_eq!(values.nominal, vec![1.0, -1.0, 2.0]);
        assert!(values.up.is_none());
    }

    #[test]
    fn test_metadata_weight() {
        let weight = MetadataWeight::new("XS", "xsec").normalized_by("sum_genweights");
        let values = with_ctx(|ctx| weight.compute(&batch(), ctx)).unwrap();
        assert_eq!(values.nominal, vec![0.088; 3]);

        let lumi = MetadataWeight::new("lumi", "lumi").with_scale(1000.0);
        let values = with_ctx(|ctx| lumi.compute(&batch(), ctx)).unwrap();
        assert!((values.nominal[0] - 59_700.0).abs() < 1e-6);

        let missing = MetadataWeight::new("kfactor", "kfactor");
        assert!(with_ctx(|ctx| missing.compute(&batch(), ctx)).is_err());
    }

    #[test]
    fn test_scale_factor_weight() {
        let weight = ScaleFactorWeight::with_suffixes("pileup", "puWeight");
        assert!(weight.has_variations());
        assert_eq!(weight.requires(), vec!["puWeight", "puWeightUp", "puWeightDown"]);
        let values = with_ctx(|ctx| weight.compute(&batch(), ctx)).unwrap();
        assert_eq!(values.up.unwrap(), vec![1.1, 0.6, 1.6]);
        assert_eq!(values.down.unwrap(), vec![0.9, 0.4, 1.4]);
    }

    #[test]
    fn test_object_product_weight() {
        let weight = ObjectProductWeight::new("sf_ele_id", "ElectronGood", "sf", "sf_up", "sf_down");
        let values = with_ctx(|ctx| weight.compute(&batch(), ctx)).unwrap();
        assert!((values.nominal[0] - 0.72).abs() < 1e-12);
        assert_eq!(values.nominal[1], 1.0);
        assert!((values.up.unwrap()[2] - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_constant_weight() {
        let weight = ConstantWeight::new("k", 1.2).with_variations(1.3, 1.1);
        let values = with_ctx(|ctx| weight.compute(&batch(), ctx)).unwrap();
        assert_eq!(values.nominal, vec![1.2; 3]);
        assert_eq!(values.down.unwrap(), vec![1.1; 3]);
    }
}
