//! Registration and resolution of systematic variations.

use crate::core::{Scope, Variation, VariationKind, NOMINAL};
use crate::errors::ConfigurationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};
use tracing::debug;

static NAME_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_\-]*$"));

/// A registered variation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationDefinition {
    /// Globally unique name.
    pub name: String,
    /// Shape or weight.
    pub kind: VariationKind,
    /// Where the variation applies.
    pub scope: Scope,
    /// The calibrator that owns a shape variation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Mutable registry used while an analysis is being configured.
#[derive(Debug, Default, Clone)]
pub struct VariationRegistry {
    entries: Vec<VariationDefinition>,
    index: HashMap<String, usize>,
}

impl VariationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variation without an owner.
    ///
    /// Registering an existing name with the same kind extends its scope.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names or a kind conflict.
    pub fn register(
        &mut self,
        name: &str,
        kind: VariationKind,
        scope: Scope,
    ) -> Result<(), ConfigurationError> {
        self.insert(name, kind, scope, None)
    }

    /// Registers a variation owned by a calibrator.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names, a kind conflict, or when another
    /// calibrator already owns the name.
    pub fn register_owned(
        &mut self,
        name: &str,
        kind: VariationKind,
        scope: Scope,
        owner: &str,
    ) -> Result<(), ConfigurationError> {
        self.insert(name, kind, scope, Some(owner))
    }

    fn insert(
        &mut self,
        name: &str,
        kind: VariationKind,
        scope: Scope,
        owner: Option<&str>,
    ) -> Result<(), ConfigurationError> {
        validate_name(name)?;

        let Some(&position) = self.index.get(name) else {
            debug!(variation = name, %kind, "Registered variation");
            self.index.insert(name.to_string(), self.entries.len());
            self.entries.push(VariationDefinition {
                name: name.to_string(),
                kind,
                scope,
                owner: owner.map(str::to_string),
            });
            return Ok(());
        };

        let existing = &mut self.entries[position];
        if existing.kind != kind {
            return Err(ConfigurationError::conflicting_variation_kind(
                name,
                &existing.kind.to_string(),
                &kind.to_string(),
            ));
        }
        match (existing.owner.as_deref(), owner) {
            (Some(a), Some(b)) if a != b => {
                return Err(ConfigurationError::duplicate_variation(name, a, b));
            }
            (None, Some(b)) => existing.owner = Some(b.to_string()),
            _ => {}
        }
        existing.scope.union(scope);
        Ok(())
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Looks up a definition.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VariationDefinition> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Number of registered variations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates every scope and produces the read-only registry.
    ///
    /// `known_samples` is `None` when the sample list is not known at
    /// configuration time; sample references are then not checked.
    ///
    /// # Errors
    ///
    /// Returns an error if a scope references an unknown sample or category.
    pub fn freeze(
        self,
        known_samples: Option<&BTreeSet<String>>,
        known_categories: &BTreeSet<String>,
    ) -> Result<FrozenVariations, ConfigurationError> {
        for def in &self.entries {
            for category in def.scope.referenced_categories() {
                if !known_categories.contains(category) {
                    return Err(ConfigurationError::undefined_reference(
                        "category", category, &def.name,
                    ));
                }
            }
            if let Some(samples) = known_samples {
                for sample in def.scope.referenced_samples() {
                    if !samples.contains(sample) {
                        return Err(ConfigurationError::undefined_reference(
                            "sample", sample, &def.name,
                        ));
                    }
                }
            }
        }
        Ok(FrozenVariations {
            entries: self.entries.into(),
            index: Arc::new(self.index),
        })
    }
}

fn validate_name(name: &str) -> Result<(), ConfigurationError> {
    let pattern = NAME_PATTERN
        .as_ref()
        .map_err(|e| ConfigurationError::invalid(e.to_string()))?;
    if name == NOMINAL || !pattern.is_match(name) {
        return Err(ConfigurationError::invalid(format!(
            "Invalid variation name '{name}'"
        ))
        .with_subjects(vec![name.to_string()]));
    }
    Ok(())
}

/// Read-only registry shared by every worker.
#[derive(Debug, Clone)]
pub struct FrozenVariations {
    entries: Arc<[VariationDefinition]>,
    index: Arc<HashMap<String, usize>>,
}

impl Default for FrozenVariations {
    fn default() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
            index: Arc::default(),
        }
    }
}

impl FrozenVariations {
    /// Looks up a definition.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VariationDefinition> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Kind of a registered variation.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<VariationKind> {
        self.get(name).map(|def| def.kind)
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &VariationDefinition> {
        self.entries.iter()
    }

    /// Number of variations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no variation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every pass for `(sample, category)`.
    ///
    /// Nominal comes first, then each applicable shape variation up and
    /// down in registration order, then each applicable weight variation.
    /// Data samples only get the nominal pass.
    #[must_use]
    pub fn resolve(&self, sample: &str, category: &str, is_data: bool) -> Vec<Variation> {
        let mut out = vec![Variation::nominal()];
        if is_data {
            return out;
        }
        for kind in [VariationKind::Shape, VariationKind::Weight] {
            for def in self
                .entries
                .iter()
                .filter(|d| d.kind == kind && d.scope.contains(sample, category))
            {
                out.push(Variation::up(&def.name));
                out.push(Variation::down(&def.name));
            }
        }
        out
    }

    /// Shape passes needed for `sample` in at least one category.
    #[must_use]
    pub fn shape_variations(&self, sample: &str, is_data: bool) -> Vec<Variation> {
        if is_data {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|d| d.kind == VariationKind::Shape && d.scope.covers_sample(sample))
            .flat_map(|d| [Variation::up(&d.name), Variation::down(&d.name)])
            .collect()
    }

    /// Returns true if `name` is a weight variation active for `(sample, category)`.
    #[must_use]
    pub fn is_weight_target(&self, name: &str, sample: &str, category: &str) -> bool {
        self.get(name).is_some_and(|def| {
            def.kind == VariationKind::Weight && def.scope.contains(sample, category)
        })
    }
}
