//! Assertions over merged outputs.

use crate::histogram::Hist;
use crate::output::Output;

/// Asserts the cutflow of `sample` at each `(stage, events)` pair.
pub fn assert_cutflow(output: &Output, sample: &str, expected: &[(&str, u64)]) {
    for (stage, events) in expected {
        assert_eq!(
            output.cutflow(sample, stage),
            *events,
            "Cutflow mismatch for {sample} at '{stage}'"
        );
    }
}

/// Returns the histogram or panics naming the missing key.
pub fn expect_histogram<'a>(output: &'a Output, sample: &str, variation: &str, category: &str, name: &str) -> &'a Hist {
    output
        .histogram(sample, variation, category, name)
        .unwrap_or_else(|| panic!("No histogram {sample}/{variation}/{category}/{name}"))
}

/// Asserts that two histograms agree bin by bin within `tolerance`.
pub fn assert_hist_close(actual: &Hist, expected: &Hist, tolerance: f64) {
    assert!(
        actual.approx_eq(expected, tolerance),
        "Histograms differ:\n  actual   sumw = {:?}\n  expected sumw = {:?}",
        actual.sumw(),
        expected.sumw()
    );
}

/// Asserts that two outputs agree within `tolerance`.
pub fn assert_outputs_close(actual: &Output, expected: &Output, tolerance: f64) {
    assert_eq!(
        actual.histograms().keys().collect::<Vec<_>>(),
        expected.histograms().keys().collect::<Vec<_>>(),
        "Outputs hold different histogram keys"
    );
    for (key, hist) in actual.histograms() {
        if let Some(other) = expected.histograms().get(key) {
            assert!(hist.approx_eq(other, tolerance), "Histogram {key} differs");
        }
    }
    assert!(actual.approx_eq(expected, tolerance), "Outputs differ outside histograms");
}
