//! Binned and raw outputs.
//!
//! A [`HistogramSpec`] or [`ColumnSpec`] declares what to record; the filler
//! functions turn one selected, weighted view into a [`Hist`] or a
//! [`ColumnPart`].

mod fill;
mod hist;
mod spec;

pub use fill::{extract_columns, fill_histogram, ColumnAccumulator, ColumnPart};
pub use hist::Hist;
pub use spec::{Axis, ColumnSpec, HistogramSpec, OutputFilter, EVENTS};
