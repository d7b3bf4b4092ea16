//! Analysis execution.
//!
//! This module provides:
//! - The frozen [`Analysis`] and its per-chunk processing
//! - Event sources
//! - The parallel [`Runner`] with retries and failure collection

mod failure_tolerance;
mod processor;
mod retry;
mod runner;
mod source;


pub use failure_tolerance::{FailureCollector, FailureMode, FailureRecord};
pub use processor::{Analysis, BinnedOutput};
pub use retry::{should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision};
pub use runner::{ChunkStatus, RunReport, Runner, RunnerConfig};
pub use source::{EventSource, InMemorySource};
