//! Testing utilities for eventflow analyses.
//!
//! This module provides:
//! - The shape-variations tutorial analysis and a hand-checked event batch
//! - Output assertions
//! - Event sources with injected failures

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_cutflow, assert_hist_close, assert_outputs_close, expect_histogram};
pub use fixtures::{
    data_chunk, scenario_batch, scenario_chunk, scenario_sum_genweights, tutorial_analysis, tutorial_config,
    tutorial_config_json, SCENARIO_DATA_SAMPLE, SCENARIO_EVENTS, SCENARIO_SAMPLE,
};
pub use mocks::FlakySource;
