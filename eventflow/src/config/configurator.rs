//! Turns an [`AnalysisConfig`] into a frozen [`Analysis`].

use super::{AnalysisConfig, CalibratorRef, ComponentRegistry, CutRef, WeightClassRef};
use crate::calibration::{Calibrator, CalibratorChain};
use crate::core::{ScopeSet, VariationKind};
use crate::errors::ConfigurationError;
use crate::histogram::OutputFilter;
use crate::pipeline::{Analysis, BinnedOutput};
use crate::selection::{Category, Cut, SelectionEngine};
use crate::variations::{FrozenVariations, VariationRegistry};
use crate::weights::{WeightComponent, WeightEngine, WeightPlan};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Validates a configuration and resolves every reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct Configurator;

impl Configurator {
    /// Builds the analysis. No chunk may be processed before this succeeds.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found: unknown components,
    /// duplicate or conflicting variations, undefined scope references,
    /// calibrator ordering, bad binning or weights applied twice.
    pub fn build(config: &AnalysisConfig, registry: &ComponentRegistry) -> Result<Analysis, ConfigurationError> {
        let category_names = config.category_names();
        let known_categories: BTreeSet<String> = category_names.iter().map(|c| (*c).to_string()).collect();
        let known_samples = config.datasets.filter.known_samples();

        let selection = Self::selection(config, registry)?;
        let chain = Self::chain(config, registry)?;
        let plan = WeightPlan::new(config.weights.clone(), &category_names, known_samples.as_ref())?;
        WeightPlan::new(
            config.variations.weights.clone(),
            &category_names,
            known_samples.as_ref(),
        )?;
        let variations = Self::variations(config, &chain, known_samples.as_ref(), &known_categories)?;
        check_weight_variation_scopes(config, &plan, known_samples.as_ref(), &category_names)?;
        let weights = WeightEngine::new(Self::weight_components(config, registry)?, plan, variations.clone())?;

        let mut histograms = IndexMap::new();
        for (name, spec) in &config.variables {
            check_filter(name, &spec.filter, &known_categories, known_samples.as_ref())?;
            let edges = spec.edges(name)?;
            histograms.insert(
                name.clone(),
                BinnedOutput {
                    spec: spec.clone(),
                    edges,
                },
            );
        }
        for (name, spec) in &config.columns {
            check_filter(name, &spec.filter, &known_categories, known_samples.as_ref())?;
            if spec.fields.is_empty() {
                return Err(ConfigurationError::invalid(format!("Column export '{name}' lists no fields")));
            }
        }

        let analysis = Analysis {
            fingerprint: config.fingerprint(),
            datasets: config.datasets.filter.clone(),
            genweight: config.workflow.genweight.clone(),
            chain,
            workflow: Arc::new(config.workflow.preselection.clone()),
            selection,
            weights,
            variations,
            histograms,
            columns: config.columns.clone(),
        };
        info!(
            fingerprint = %analysis.fingerprint,
            categories = category_names.len(),
            variations = analysis.variations.len(),
            histograms = analysis.histograms.len(),
            "Analysis configured"
        );
        Ok(analysis)
    }

    fn cut(reference: &CutRef, registry: &ComponentRegistry) -> Result<Arc<dyn Cut>, ConfigurationError> {
        match reference {
            CutRef::Spec(spec) => Ok(spec.build()),
            CutRef::Name(name) => registry
                .cut(name)
                .ok_or_else(|| ConfigurationError::unknown_component("cut", name)),
        }
    }

    fn cuts(references: &[CutRef], registry: &ComponentRegistry) -> Result<Vec<Arc<dyn Cut>>, ConfigurationError> {
        references.iter().map(|r| Self::cut(r, registry)).collect()
    }

    fn selection(config: &AnalysisConfig, registry: &ComponentRegistry) -> Result<SelectionEngine, ConfigurationError> {
        let categories = config
            .categories
            .iter()
            .map(|(name, cuts)| Ok(Category::new(name, Self::cuts(cuts, registry)?)))
            .collect::<Result<Vec<_>, ConfigurationError>>()?;
        SelectionEngine::new(
            Self::cuts(&config.skim, registry)?,
            Self::cuts(&config.preselections, registry)?,
            categories,
        )
    }

    fn chain(config: &AnalysisConfig, registry: &ComponentRegistry) -> Result<CalibratorChain, ConfigurationError> {
        let calibrators = config
            .calibrators
            .iter()
            .map(|reference| match reference {
                CalibratorRef::Spec(spec) => Ok(spec.build()),
                CalibratorRef::Name(name) => registry
                    .calibrator(name)
                    .ok_or_else(|| ConfigurationError::unknown_component("calibrator", name)),
            })
            .collect::<Result<Vec<Arc<dyn Calibrator>>, _>>()?;
        CalibratorChain::new(calibrators)
    }

    fn variations(
        config: &AnalysisConfig,
        chain: &CalibratorChain,
        known_samples: Option<&BTreeSet<String>>,
        known_categories: &BTreeSet<String>,
    ) -> Result<FrozenVariations, ConfigurationError> {
        let mut registry = VariationRegistry::new();

        for (reference, scope) in config.variations.shape.scopes() {
            let names = chain
                .expand(&reference)
                .ok_or_else(|| ConfigurationError::unknown_component("shape variation", &reference))?;
            for name in names {
                let owner = chain
                    .owner_of(&name)
                    .ok_or_else(|| ConfigurationError::unknown_component("shape variation", &name))?;
                debug!(variation = %name, owner, "Registering shape variation");
                registry.register_owned(&name, VariationKind::Shape, scope.clone(), owner)?;
            }
        }

        let applied = config.weights.names();
        for (name, scope) in config.variations.weights.scopes() {
            if !applied.contains(name.as_str()) {
                return Err(ConfigurationError::undefined_reference("weight", &name, "variations.weights"));
            }
            registry.register(&name, VariationKind::Weight, scope)?;
        }

        registry.freeze(known_samples, known_categories)
    }

    fn weight_components(
        config: &AnalysisConfig,
        registry: &ComponentRegistry,
    ) -> Result<Vec<Arc<dyn WeightComponent>>, ConfigurationError> {
        let mut declared: IndexMap<String, Arc<dyn WeightComponent>> = IndexMap::new();
        for class in &config.weights_classes {
            let component = match class {
                WeightClassRef::Spec(spec) => spec.build(),
                WeightClassRef::Name(name) => registry
                    .weight(name)
                    .ok_or_else(|| ConfigurationError::unknown_component("weight", name))?,
            };
            let name = component.name().to_string();
            if declared.insert(name.clone(), component).is_some() {
                return Err(ConfigurationError::invalid(format!(
                    "Weight class '{name}' is declared more than once"
                ))
                .with_subjects(vec![name]));
            }
        }

        let needed = config.weights.names().into_iter().chain(config.variations.weights.names());
        for name in needed {
            if declared.contains_key(name) {
                continue;
            }
            let component = registry
                .weight(name)
                .ok_or_else(|| ConfigurationError::unknown_component("weight", name))?;
            declared.insert(name.to_string(), component);
        }
        Ok(declared.into_values().collect())
    }
}

/// Every weight variation must vary a weight applied inside its scope.
///
/// For each scoped category at least one scoped sample must apply the weight;
/// a sample named explicitly must apply it itself. Samples covered by "all"
/// are the known samples, or else every per-sample section plus a sample
/// without one.
fn check_weight_variation_scopes(
    config: &AnalysisConfig,
    plan: &WeightPlan,
    known_samples: Option<&BTreeSet<String>>,
    categories: &[&str],
) -> Result<(), ConfigurationError> {
    let any_sample: Vec<String> = match known_samples {
        Some(samples) => samples.iter().cloned().collect(),
        None => config
            .weights
            .bysample
            .keys()
            .cloned()
            .chain(std::iter::once(String::new()))
            .collect(),
    };

    for (name, scope) in config.variations.weights.scopes() {
        for rect in scope.rects() {
            let scoped_categories: Vec<&str> = categories
                .iter()
                .copied()
                .filter(|c| rect.categories.contains(c))
                .collect();
            let applied = |sample: &str, category: &str| plan.resolve(sample, category).contains(&name.as_str());

            match &rect.samples {
                ScopeSet::Only(samples) => {
                    for sample in samples {
                        if let Some(category) = scoped_categories.iter().find(|c| !applied(sample, c)) {
                            return Err(ConfigurationError::unapplied_weight_variation(&name, sample, category));
                        }
                    }
                }
                ScopeSet::All => {
                    for category in &scoped_categories {
                        if !any_sample.iter().any(|sample| applied(sample, category)) {
                            return Err(ConfigurationError::unapplied_weight_variation(&name, "*", category));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_filter(
    owner: &str,
    filter: &OutputFilter,
    categories: &BTreeSet<String>,
    samples: Option<&BTreeSet<String>>,
) -> Result<(), ConfigurationError> {
    if let Some(category) = filter.referenced_categories().into_iter().find(|c| !categories.contains(*c)) {
        return Err(ConfigurationError::undefined_reference("category", category, owner));
    }
    if let Some(samples) = samples {
        if let Some(sample) = filter.referenced_samples().into_iter().find(|s| !samples.contains(*s)) {
            return Err(ConfigurationError::undefined_reference("sample", sample, owner));
        }
    }
    Ok(())
}
