//! Evaluation and combination of weight components.

use super::{WeightComponent, WeightContext, WeightPlan, WeightValues};
use crate::core::{Direction, EventBatch, Variation, VariationKind};
use crate::errors::{ConfigurationError, DataError};
use crate::variations::FrozenVariations;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Component values of one calibrated view.
#[derive(Debug, Clone, Default)]
pub struct ComponentTable {
    n_events: usize,
    values: IndexMap<String, WeightValues>,
    clipped: BTreeMap<String, u64>,
}

impl ComponentTable {
    /// Number of events.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Values of one component.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WeightValues> {
        self.values.get(name)
    }

    /// Non-finite values replaced by 0.0, per component.
    #[must_use]
    pub fn clipped(&self) -> &BTreeMap<String, u64> {
        &self.clipped
    }
}

/// Replaces NaN and infinities by zero and returns how many were replaced.
fn sanitize(values: &mut [f64]) -> u64 {
    let mut count = 0;
    for v in values.iter_mut().filter(|v| !v.is_finite()) {
        *v = 0.0;
        count += 1;
    }
    count
}

/// Computes event weights from the plan and the registered components.
#[derive(Debug, Clone, Default)]
pub struct WeightEngine {
    components: IndexMap<String, Arc<dyn WeightComponent>>,
    plan: WeightPlan,
    variations: FrozenVariations,
}

impl WeightEngine {
    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan names an unknown component, or a weight
    /// variation targets a component that is unknown or has no up/down values.
    pub fn new(
        components: Vec<Arc<dyn WeightComponent>>,
        plan: WeightPlan,
        variations: FrozenVariations,
    ) -> Result<Self, ConfigurationError> {
        let components: IndexMap<String, Arc<dyn WeightComponent>> = components
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();

        for name in plan.config().names() {
            if !components.contains_key(name) {
                return Err(ConfigurationError::unknown_component("weight", name));
            }
        }
        for def in variations.iter().filter(|d| d.kind == VariationKind::Weight) {
            let component = components
                .get(&def.name)
                .ok_or_else(|| ConfigurationError::unknown_component("weight", &def.name))?;
            if !component.has_variations() {
                return Err(ConfigurationError::invalid(format!(
                    "Weight variation '{}' targets a component without up/down values",
                    def.name
                ))
                .with_subjects(vec![def.name.clone()]));
            }
        }

        Ok(Self {
            components,
            plan,
            variations,
        })
    }

    /// The weight plan.
    #[must_use]
    pub fn plan(&self) -> &WeightPlan {
        &self.plan
    }

    /// Columns and collections read by any component.
    #[must_use]
    pub fn requires(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for component in self.components.values() {
            for name in component.requires() {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// Evaluates every component applicable to the sample on one view.
    ///
    /// Up/down values are kept only when `with_variations` is set, which is
    /// the case for the nominal view. Data chunks yield an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if a component input is missing or has the wrong length.
    pub fn evaluate(
        &self,
        batch: &EventBatch,
        ctx: &WeightContext<'_>,
        with_variations: bool,
    ) -> Result<ComponentTable, DataError> {
        let mut table = ComponentTable {
            n_events: batch.n_events(),
            ..ComponentTable::default()
        };
        if ctx.is_data {
            return Ok(table);
        }

        for name in self.plan.names_for_sample(ctx.sample) {
            let Some(component) = self.components.get(name) else {
                continue;
            };
            let mut values = component.compute(batch, ctx)?;
            if !with_variations {
                values = values.nominal_only();
            }

            let mut clipped = 0;
            for array in values.arrays_mut() {
                if array.len() != batch.n_events() {
                    return Err(DataError::length_mismatch(
                        format!("weight {name}"),
                        batch.n_events(),
                        array.len(),
                    ));
                }
                clipped += sanitize(array);
            }
            if clipped > 0 {
                warn!(weight = name, sample = ctx.sample, clipped, "Non-finite weight values set to 0");
                table.clipped.insert(name.to_string(), clipped);
            }
            table.values.insert(name.to_string(), values);
        }
        Ok(table)
    }

    /// Combines a table into per-event weights for one category and pass.
    ///
    /// Only the component matching an active weight variation uses its
    /// up/down values; every other component stays nominal. Components
    /// missing from the table contribute 1.0.
    #[must_use]
    pub fn combine(
        &self,
        table: &ComponentTable,
        sample: &str,
        category: &str,
        variation: &Variation,
        is_data: bool,
    ) -> Vec<f64> {
        let mut weights = vec![1.0; table.n_events];
        if is_data {
            return weights;
        }
        for name in self.plan.resolve(sample, category) {
            let Some(values) = table.get(name) else {
                continue;
            };
            let varied = variation.varies(name)
                && self.variations.is_weight_target(name, sample, category);
            let array = match (varied, variation.direction) {
                (true, Direction::Up) => values.up.as_ref().unwrap_or(&values.nominal),
                (true, Direction::Down) => values.down.as_ref().unwrap_or(&values.nominal),
                _ => &values.nominal,
            };
            for (w, v) in weights.iter_mut().zip(array) {
                *w *= v;
            }
        }
        weights
    }

    /// Evaluates and combines in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    pub fn compute(
        &self,
        batch: &EventBatch,
        ctx: &WeightContext<'_>,
        category: &str,
        variation: &Variation,
    ) -> Result<Vec<f64>, DataError> {
        let table = self.evaluate(batch, ctx, !variation.is_nominal())?;
        Ok(self.combine(&table, ctx.sample, category, variation, ctx.is_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnData, Scope};
    use crate::variations::VariationRegistry;
    use crate::weights::{ColumnWeight, ConstantWeight, ScaleFactorWeight, WeightsConfig};
    use std::collections::BTreeSet;

    const CATEGORIES: [&str; 3] = ["baseline", "1btag", "2btag"];

    fn batch() -> EventBatch {
        EventBatch::new(3)
            .with_column("genWeight", ColumnData::Float(vec![1.0, 2.0, f64::NAN]))
            .unwrap()
            .with_column("puWeight", ColumnData::Float(vec![1.0, 0.5, 1.0]))
            .unwrap()
            .with_column("puWeightUp", ColumnData::Float(vec![1.2, 0.6, 1.0]))
            .unwrap()
            .with_column("puWeightDown", ColumnData::Float(vec![0.8, 0.4, 1.0]))
            .unwrap()
            .with_column("btagSF", ColumnData::Float(vec![0.9, 0.9, 0.9]))
            .unwrap()
            .with_column("btagSFUp", ColumnData::Float(vec![1.0, 1.0, 1.0]))
            .unwrap()
            .with_column("btagSFDown", ColumnData::Float(vec![0.8, 0.8, 0.8]))
            .unwrap()
    }

    fn engine() -> WeightEngine {
        let config: WeightsConfig = serde_json::from_value(serde_json::json!({
            "common": {
                "inclusive": ["genWeight", "pileup"],
                "bycategory": {"1btag": ["sf_btag"], "2btag": ["sf_btag"]}
            }
        }))
        .unwrap();
        let plan = WeightPlan::new(config.clone(), &CATEGORIES, None).unwrap();

        let mut registry = VariationRegistry::new();
        for (name, scope) in config.scopes() {
            if name == "pileup" || name == "sf_btag" {
                registry.register(&name, VariationKind::Weight, scope).unwrap();
            }
        }
        let categories: BTreeSet<String> = CATEGORIES.iter().map(|c| (*c).to_string()).collect();
        let frozen = registry.freeze(None, &categories).unwrap();

        WeightEngine::new(
            vec![
                Arc::new(ColumnWeight::new("genWeight", "genWeight")),
                Arc::new(ScaleFactorWeight::with_suffixes("pileup", "puWeight")),
                Arc::new(ScaleFactorWeight::with_suffixes("sf_btag", "btagSF")),
            ],
            plan,
            frozen,
        )
        .unwrap()
    }

    fn metadata() -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    #[test]
    fn test_scoped_component_only_in_its_categories() {
        let metadata = metadata();
        let ctx = WeightContext {
            sample: "TTTo2L2Nu",
            year: "2018",
            is_data: false,
            metadata: &metadata,
        };
        let engine = engine();
        let table = engine.evaluate(&batch(), &ctx, true).unwrap();

        let baseline = engine.combine(&table, "TTTo2L2Nu", "baseline", &Variation::nominal(), false);
        let onebtag = engine.combine(&table, "TTTo2L2Nu", "1btag", &Variation::nominal(), false);
        assert_eq!(baseline, vec![1.0, 1.0, 0.0]);
        assert!((onebtag[0] - 0.9).abs() < 1e-12);
        assert!((onebtag[1] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_weight_variation_changes_only_target() {
        let metadata = metadata();
        let ctx = WeightContext {
            sample: "TTTo2L2Nu",
            year: "2018",
            is_data: false,
            metadata: &metadata,
        };
        let engine = engine();
        let table = engine.evaluate(&batch(), &ctx, true).unwrap();

        let up = engine.combine(&table, "TTTo2L2Nu", "1btag", &Variation::up("pileup"), false);
        assert!((up[0] - 1.2 * 0.9).abs() < 1e-12);
        let down = engine.combine(&table, "TTTo2L2Nu", "1btag", &Variation::down("sf_btag"), false);
        assert!((down[1] - 2.0 * 0.5 * 0.8).abs() < 1e-12);

        // sf_btag is out of scope in baseline, its variation equals nominal there.
        let baseline_var = engine.combine(&table, "TTTo2L2Nu", "baseline", &Variation::up("sf_btag"), false);
        let baseline_nom = engine.combine(&table, "TTTo2L2Nu", "baseline", &Variation::nominal(), false);
        assert_eq!(baseline_var, baseline_nom);
    }

    #[test]
    fn test_non_finite_values_clipped_and_counted() {
        let metadata = metadata();
        let ctx = WeightContext {
            sample: "TTTo2L2Nu",
            year: "2018",
            is_data: false,
            metadata: &metadata,
        };
        let table = engine().evaluate(&batch(), &ctx, false).unwrap();
        assert_eq!(table.clipped().get("genWeight"), Some(&1));
        assert_eq!(table.get("genWeight").unwrap().nominal[2], 0.0);
        assert!(table.get("pileup").unwrap().up.is_none());
    }

    #[test]
    fn test_data_gets_unit_weight() {
        let metadata = metadata();
        let ctx = WeightContext {
            sample: "DATA_SingleMuon",
            year: "2018",
            is_data: true,
            metadata: &metadata,
        };
        let weights = engine()
            .compute(&batch(), &ctx, "1btag", &Variation::nominal())
            .unwrap();
        assert_eq!(weights, vec![1.0; 3]);
    }

    #[test]
    fn test_unknown_component_rejected() {
        let config: WeightsConfig = serde_json::from_value(serde_json::json!({
            "common": {"inclusive": ["genWeight", "mystery"]}
        }))
        .unwrap();
        let plan = WeightPlan::new(config, &CATEGORIES, None).unwrap();
        let err = WeightEngine::new(
            vec![Arc::new(ColumnWeight::new("genWeight", "genWeight"))],
            plan,
            FrozenVariations::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-005-UNKNOWN_COMPONENT"));
    }

    #[test]
    fn test_variation_needs_up_down() {
        let mut registry = VariationRegistry::new();
        registry.register("lumi", VariationKind::Weight, Scope::all()).unwrap();
        let frozen = registry.freeze(None, &BTreeSet::new()).unwrap();
        let result = WeightEngine::new(
            vec![Arc::new(ConstantWeight::new("lumi", 59.7))],
            WeightPlan::default(),
            frozen,
        );
        assert!(result.is_err());
    }
}
