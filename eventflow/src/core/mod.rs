//! Core data model: event batches, chunks and variations.

mod batch;
mod chunk;
mod variation;

pub use batch::{BatchSchema, ColumnData, ColumnType, EventBatch, ObjectCollection};
pub use chunk::{ChunkId, ChunkSpec};
pub use variation::{Direction, Scope, ScopeRect, ScopeSet, Variation, VariationKind, NOMINAL};
