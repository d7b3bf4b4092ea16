//! # Eventflow
//!
//! Variation-aware event processing and histogram filling for collider analyses.
//!
//! An analysis is declared once and frozen before any data is read:
//!
//! - **Calibrator chain**: ordered corrections producing a nominal view of
//!   each chunk and one shifted view per shape variation
//! - **Selection**: skim, preselection and named categories as event masks
//! - **Weights**: layered per-sample and per-category weight components with
//!   up/down variations
//! - **Histograms and columns**: filled per sample, variation and category
//! - **Output**: a mergeable accumulator whose merge is associative and
//!   independent of chunk order
//!
//! Chunks are processed in parallel by the [`Runner`](pipeline::Runner) and
//! merged deterministically.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eventflow::prelude::*;
//!
//! let config = AnalysisConfig::from_json_path("analysis.json")?;
//! let analysis = Configurator::build(&config, &ComponentRegistry::with_defaults())?;
//!
//! let report = Runner::new(analysis)
//!     .with_config(RunnerConfig::default().with_max_workers(8))
//!     .run(source, chunks)
//!     .await?;
//! println!("{}", report.output.to_json());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod calibration;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod histogram;
pub mod observability;
pub mod output;
pub mod pipeline;
pub mod selection;
pub mod testing;
pub mod variations;
pub mod weights;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::calibration::{Calibrator, CalibratorChain, Factor, ScaleCalibrator, ScaleVariation};
    pub use crate::config::{AnalysisConfig, ComponentRegistry, Configurator};
    pub use crate::core::{
        BatchSchema, ChunkId, ChunkSpec, ColumnData, Direction, EventBatch, ObjectCollection, Variation,
        VariationKind,
    };
    pub use crate::errors::{ConfigurationError, DataError, EventflowError, MergeError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, RunEvent};
    pub use crate::histogram::{Axis, Hist, HistogramSpec};
    pub use crate::observability::{init_logging, LogConfig};
    pub use crate::output::{AccumulatorKey, Output};
    pub use crate::pipeline::{
        Analysis, EventSource, FailureMode, InMemorySource, RetryConfig, RunReport, Runner, RunnerConfig,
    };
    pub use crate::selection::{Cut, Mask};
    pub use crate::weights::WeightComponent;
    pub use crate::workflow::{ObjectPreselection, Workflow};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn prelude_builds_tutorial() {
        let config = AnalysisConfig::from_json_str(&crate::testing::tutorial_config_json()).unwrap();
        let analysis = Configurator::build(&config, &ComponentRegistry::with_defaults()).unwrap();
        assert_eq!(analysis.fingerprint(), config.fingerprint());
    }
}
