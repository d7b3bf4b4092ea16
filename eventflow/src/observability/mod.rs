//! Observability utilities.

mod logging;
mod tracing;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use tracing::{chunk_span, SpanTimer};
