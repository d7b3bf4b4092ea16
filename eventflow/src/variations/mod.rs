//! Variation registry.
//!
//! Variations are registered while the analysis is configured and frozen
//! before any chunk runs. The frozen registry is shared read-only.

mod registry;

pub use registry::{FrozenVariations, VariationDefinition, VariationRegistry};
