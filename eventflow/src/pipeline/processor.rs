//! The frozen analysis and per-chunk processing.

use crate::calibration::CalibratorChain;
use crate::config::DatasetFilter;
use crate::core::{BatchSchema, ChunkSpec, EventBatch, Variation, VariationKind};
use crate::errors::{ConfigurationError, DataError};
use crate::histogram::{extract_columns, fill_histogram, ColumnSpec, Hist, HistogramSpec};
use crate::observability::SpanTimer;
use crate::output::{AccumulatorKey, Output, STAGE_INITIAL, STAGE_PRESELECTION, STAGE_SKIM};
use crate::selection::{CutContext, SelectionEngine, SelectionResult};
use crate::variations::FrozenVariations;
use crate::weights::{ComponentTable, WeightContext, WeightEngine};
use crate::workflow::Workflow;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A histogram declaration with its validated edges.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedOutput {
    /// Declaration.
    pub spec: HistogramSpec,
    /// Per-axis edges.
    pub edges: Vec<Vec<f64>>,
}

/// A validated analysis, shared read-only by every worker.
///
/// Built by [`Configurator::build`](crate::config::Configurator::build).
pub struct Analysis {
    pub(crate) fingerprint: String,
    pub(crate) datasets: DatasetFilter,
    pub(crate) genweight: String,
    pub(crate) chain: CalibratorChain,
    pub(crate) workflow: Arc<dyn Workflow>,
    pub(crate) selection: SelectionEngine,
    pub(crate) weights: WeightEngine,
    pub(crate) variations: FrozenVariations,
    pub(crate) histograms: IndexMap<String, BinnedOutput>,
    pub(crate) columns: IndexMap<String, ColumnSpec>,
}

impl fmt::Debug for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analysis")
            .field("fingerprint", &self.fingerprint)
            .field("calibrators", &self.chain.names())
            .field("workflow", &self.workflow.name())
            .field("categories", &self.selection.category_names())
            .field("variations", &self.variations.len())
            .field("histograms", &self.histograms.keys().collect::<Vec<_>>())
            .field("columns", &self.columns.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One evaluated view: its selection and weight components.
struct ViewResult<'a> {
    batch: &'a EventBatch,
    selection: SelectionResult,
    table: ComponentTable,
}

impl Analysis {
    /// Fingerprint of the configuration this analysis was built from.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Chunk selection.
    #[must_use]
    pub fn dataset_filter(&self) -> &DatasetFilter {
        &self.datasets
    }

    /// Frozen variations.
    #[must_use]
    pub fn variations(&self) -> &FrozenVariations {
        &self.variations
    }

    /// Calibrator chain.
    #[must_use]
    pub fn chain(&self) -> &CalibratorChain {
        &self.chain
    }

    /// Selection engine.
    #[must_use]
    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    /// Weight engine.
    #[must_use]
    pub fn weights(&self) -> &WeightEngine {
        &self.weights
    }

    /// Histogram declarations.
    #[must_use]
    pub fn histograms(&self) -> &IndexMap<String, BinnedOutput> {
        &self.histograms
    }

    /// Checks a source schema before any chunk is read.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first input that neither the source nor an
    /// earlier step provides.
    pub fn validate_schema(&self, schema: &BatchSchema) -> Result<(), ConfigurationError> {
        let calibrated = self.chain.output_schema(schema)?;
        self.workflow.validate_schema(&calibrated)?;
        let available = self.workflow.output_schema(&calibrated);

        let check = |owner: &str, names: Vec<String>| -> Result<(), ConfigurationError> {
            match names.iter().find(|n| !available.provides(n)) {
                Some(missing) => Err(ConfigurationError::missing_column(owner, missing)),
                None => Ok(()),
            }
        };
        let check_fields = |owner: &str, fields: Vec<(String, String)>| -> Result<(), ConfigurationError> {
            match fields.iter().find(|(c, f)| !available.provides_field(c, f)) {
                Some((collection, field)) => Err(ConfigurationError::missing_field(owner, collection, field)),
                None => Ok(()),
            }
        };
        check("selection", self.selection.requires())?;
        check("weights", self.weights.requires())?;
        for (name, output) in &self.histograms {
            check(name, output.spec.requires())?;
            check_fields(name, output.spec.required_fields())?;
        }
        for (name, spec) in &self.columns {
            let sources = if spec.is_event_level() {
                spec.fields.clone()
            } else {
                vec![spec.collection.clone()]
            };
            check(name, sources)?;
            check_fields(name, spec.required_fields())?;
        }
        Ok(())
    }

    /// Runs calibration, selection, weighting and filling on one chunk.
    ///
    /// # Errors
    ///
    /// Returns a data error tagged with the chunk id.
    pub fn process_chunk(&self, chunk: &ChunkSpec, batch: &EventBatch) -> Result<Output, DataError> {
        let timer = SpanTimer::start(chunk.id.to_string());
        let output = self
            .process_inner(chunk, batch)
            .map_err(|e| e.with_chunk(chunk.id.clone()))?;
        debug!(
            chunk = timer.name(),
            histograms = output.histograms().len(),
            duration_ms = timer.elapsed_ms(),
            "Chunk processed"
        );
        Ok(output)
    }

    fn process_inner(&self, chunk: &ChunkSpec, batch: &EventBatch) -> Result<Output, DataError> {
        let sample = chunk.sample();
        let is_data = chunk.is_data;
        let mut out = Output::for_chunk(chunk.id.clone());

        out.add_cutflow(sample, STAGE_INITIAL, batch.n_events() as u64);
        if !is_data {
            let genweight = batch.require_column(&self.genweight)?;
            let sum = (0..genweight.len()).map(|i| genweight.value(i)).sum::<f64>();
            out.add_sum_genweights(sample, sum);
        }

        let shape = self.variations.shape_variations(sample, is_data);
        let views = self
            .chain
            .calibrate(batch, &shape)?
            .try_map(|view| self.workflow.process_view(view))?;
        debug!(chunk = %chunk.id, views = views.len(), "Calibrated views ready");

        let cut_ctx = CutContext {
            sample,
            year: &chunk.year,
            is_data,
        };
        let weight_ctx = WeightContext {
            sample,
            year: &chunk.year,
            is_data,
            metadata: &chunk.metadata,
        };

        let nominal = ViewResult {
            batch: views.nominal(),
            selection: self.selection.evaluate(views.nominal(), &cut_ctx)?,
            table: self.weights.evaluate(views.nominal(), &weight_ctx, true)?,
        };
        out.add_cutflow(sample, STAGE_SKIM, nominal.selection.skim.count() as u64);
        out.add_cutflow(sample, STAGE_PRESELECTION, nominal.selection.preselection.count() as u64);
        for (category, mask) in &nominal.selection.categories {
            out.add_cutflow(sample, category, mask.count() as u64);
        }
        for (component, count) in nominal.table.clipped() {
            out.add_numeric_warnings(sample, component, *count);
        }

        let mut shifted: BTreeMap<&Variation, ViewResult<'_>> = BTreeMap::new();
        for variation in &shape {
            let view = views.view_for(variation);
            shifted.insert(
                variation,
                ViewResult {
                    batch: view,
                    selection: self.selection.evaluate(view, &cut_ctx)?,
                    table: self.weights.evaluate(view, &weight_ctx, false)?,
                },
            );
        }

        for category in self.selection.category_names() {
            for variation in self.variations.resolve(sample, category, is_data) {
                let result = match self.variations.kind_of(&variation.name) {
                    Some(VariationKind::Shape) => shifted.get(&variation).unwrap_or(&nominal),
                    _ => &nominal,
                };
                let Some(mask) = result.selection.category(category) else {
                    continue;
                };
                let weights = self
                    .weights
                    .combine(&result.table, sample, category, &variation, is_data);
                let label = variation.label();

                for (name, binned) in &self.histograms {
                    let filter = &binned.spec.filter;
                    if !filter.applies_to(sample, category) || !filter.accepts_variation(&variation) {
                        continue;
                    }
                    let mut hist = Hist::new(binned.edges.clone());
                    let event_weights = (!filter.no_weights).then_some(weights.as_slice());
                    fill_histogram(&mut hist, result.batch, &binned.spec.axes, mask, event_weights)?;
                    out.insert_histogram(AccumulatorKey::new(sample, &label, category, name), hist);
                }

                for (name, spec) in &self.columns {
                    let filter = &spec.filter;
                    if !filter.applies_to(sample, category) || !filter.accepts_variation(&variation) {
                        continue;
                    }
                    let event_weights = (!filter.no_weights).then_some(weights.as_slice());
                    let part = extract_columns(result.batch, spec, mask, event_weights)?;
                    out.insert_column(
                        AccumulatorKey::new(sample, &label, category, name),
                        chunk.id.clone(),
                        part,
                    );
                }
            }
        }
        Ok(out)
    }
}
