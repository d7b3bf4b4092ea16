//! Variations, directions and scopes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Label used for the nominal pass.
pub const NOMINAL: &str = "nominal";

/// Direction of a systematic variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// No variation.
    Nominal,
    /// +1 sigma.
    Up,
    /// -1 sigma.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nominal => write!(f, "nominal"),
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Whether a variation changes kinematics or only the event weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationKind {
    /// Changes object kinematics, hence selection and binning.
    Shape,
    /// Changes only the event weight.
    Weight,
}

impl fmt::Display for VariationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape => write!(f, "shape"),
            Self::Weight => write!(f, "weight"),
        }
    }
}

/// The single varied axis of one processing pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variation {
    /// Variation name (`nominal` for the nominal pass).
    pub name: String,
    /// Direction.
    pub direction: Direction,
}

impl Variation {
    /// The nominal pass.
    #[must_use]
    pub fn nominal() -> Self {
        Self {
            name: NOMINAL.to_string(),
            direction: Direction::Nominal,
        }
    }

    /// The +1 sigma pass of `name`.
    #[must_use]
    pub fn up(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Up,
        }
    }

    /// The -1 sigma pass of `name`.
    #[must_use]
    pub fn down(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Down,
        }
    }

    /// Returns true for the nominal pass.
    #[must_use]
    pub fn is_nominal(&self) -> bool {
        self.direction == Direction::Nominal
    }

    /// Returns true if this pass varies `name`.
    #[must_use]
    pub fn varies(&self, name: &str) -> bool {
        !self.is_nominal() && self.name == name
    }

    /// Output label: `nominal`, `<name>Up` or `<name>Down`.
    #[must_use]
    pub fn label(&self) -> String {
        match self.direction {
            Direction::Nominal => NOMINAL.to_string(),
            Direction::Up => format!("{}Up", self.name),
            Direction::Down => format!("{}Down", self.name),
        }
    }
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A set of names or "everything".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSet {
    /// Every name.
    All,
    /// Only the listed names.
    Only(BTreeSet<String>),
}

impl ScopeSet {
    /// A set holding one name.
    #[must_use]
    pub fn one(name: impl Into<String>) -> Self {
        Self::Only(std::iter::once(name.into()).collect())
    }

    /// Returns true if `name` is in the set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(name),
        }
    }
}

/// A samples × categories rectangle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRect {
    /// Samples covered.
    pub samples: ScopeSet,
    /// Categories covered.
    pub categories: ScopeSet,
}

/// Where a variation applies: a union of samples × categories rectangles.
///
/// A plain product is not enough once a name is declared both at common and
/// at per-sample level with different categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    rects: Vec<ScopeRect>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::all()
    }
}

impl Scope {
    /// Every sample and every category.
    #[must_use]
    pub fn all() -> Self {
        Self::new(ScopeSet::All, ScopeSet::All)
    }

    /// One rectangle.
    #[must_use]
    pub fn new(samples: ScopeSet, categories: ScopeSet) -> Self {
        Self {
            rects: vec![ScopeRect { samples, categories }],
        }
    }

    /// All samples, one category.
    #[must_use]
    pub fn category(category: impl Into<String>) -> Self {
        Self::new(ScopeSet::All, ScopeSet::one(category))
    }

    /// One sample, all categories.
    #[must_use]
    pub fn sample(sample: impl Into<String>) -> Self {
        Self::new(ScopeSet::one(sample), ScopeSet::All)
    }

    /// One sample, one category.
    #[must_use]
    pub fn sample_category(sample: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(ScopeSet::one(sample), ScopeSet::one(category))
    }

    /// The rectangles.
    #[must_use]
    pub fn rects(&self) -> &[ScopeRect] {
        &self.rects
    }

    /// Returns true if the scope covers `(sample, category)`.
    #[must_use]
    pub fn contains(&self, sample: &str, category: &str) -> bool {
        self.rects
            .iter()
            .any(|r| r.samples.contains(sample) && r.categories.contains(category))
    }

    /// Returns true if the scope covers `sample` in at least one category.
    #[must_use]
    pub fn covers_sample(&self, sample: &str) -> bool {
        self.rects.iter().any(|r| r.samples.contains(sample))
    }

    /// Extends this scope with `other`.
    pub fn union(&mut self, other: Self) {
        for rect in other.rects {
            if !self.rects.contains(&rect) {
                self.rects.push(rect);
            }
        }
        let everything = ScopeRect {
            samples: ScopeSet::All,
            categories: ScopeSet::All,
        };
        if self.rects.contains(&everything) {
            self.rects = vec![everything];
        }
    }

    /// Sample names referenced explicitly.
    #[must_use]
    pub fn referenced_samples(&self) -> BTreeSet<&str> {
        referenced(self.rects.iter().map(|r| &r.samples))
    }

    /// Category names referenced explicitly.
    #[must_use]
    pub fn referenced_categories(&self) -> BTreeSet<&str> {
        referenced(self.rects.iter().map(|r| &r.categories))
    }
}

fn referenced<'a>(sets: impl Iterator<Item = &'a ScopeSet>) -> BTreeSet<&'a str> {
    sets.filter_map(|set| match set {
        ScopeSet::All => None,
        ScopeSet::Only(names) => Some(names.iter().map(String::as_str)),
    })
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Variation::nominal().label(), "nominal");
        assert_eq!(Variation::up("pileup").label(), "pileupUp");
        assert_eq!(Variation::down("JES_Total").to_string(), "JES_TotalDown");
        assert!(Variation::up("pileup").varies("pileup"));
        assert!(!Variation::nominal().varies("nominal"));
    }

    #[test]
    fn test_scope_union_is_not_a_product() {
        let mut scope = Scope::category("1btag");
        scope.union(Scope::sample_category("TTTo2L2Nu", "2btag"));

        assert!(scope.contains("DATA", "1btag"));
        assert!(scope.contains("TTTo2L2Nu", "2btag"));
        assert!(!scope.contains("DATA", "2btag"));
        assert!(!scope.contains("TTTo2L2Nu", "baseline"));
    }

    #[test]
    fn test_scope_union_collapses_to_all() {
        let mut scope = Scope::category("1btag");
        scope.union(Scope::all());
        assert_eq!(scope, Scope::all());
    }

    #[test]
    fn test_referenced_names() {
        let mut scope = Scope::sample_category("TTTo2L2Nu", "1btag");
        scope.union(Scope::category("2btag"));
        let cats: Vec<_> = scope.referenced_categories().into_iter().collect();
        assert_eq!(cats, vec!["1btag", "2btag"]);
        assert_eq!(scope.referenced_samples().len(), 1);
    }
}
