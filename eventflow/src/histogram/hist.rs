//! N-dimensional weighted histograms.

use serde::{Deserialize, Serialize};

/// Slot of `value` on an axis: 0 is underflow, `edges.len()` is overflow.
fn slot(edges: &[f64], value: f64) -> usize {
    edges.partition_point(|e| *e <= value)
}

/// Weighted counts with under/overflow slots on every axis.
///
/// Storage is row-major over `nbins + 2` slots per axis. NaN coordinates are
/// counted in `nan_entries` and never binned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist {
    edges: Vec<Vec<f64>>,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    entries: u64,
    nan_entries: u64,
}

impl Hist {
    /// Empty histogram with the given per-axis edges.
    #[must_use]
    pub fn new(edges: Vec<Vec<f64>>) -> Self {
        let size = edges.iter().map(|e| e.len() + 1).product();
        Self {
            edges,
            sumw: vec![0.0; size],
            sumw2: vec![0.0; size],
            entries: 0,
            nan_entries: 0,
        }
    }

    /// Per-axis bin edges.
    #[must_use]
    pub fn edges(&self) -> &[Vec<f64>] {
        &self.edges
    }

    /// Slots per axis, flow included.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.edges.iter().map(|e| e.len() + 1).collect()
    }

    /// Sum of weights per slot.
    #[must_use]
    pub fn sumw(&self) -> &[f64] {
        &self.sumw
    }

    /// Sum of squared weights per slot.
    #[must_use]
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    /// Entries filled, flow included.
    #[must_use]
    pub const fn entries(&self) -> u64 {
        self.entries
    }

    /// Entries skipped because a coordinate was NaN.
    #[must_use]
    pub const fn nan_entries(&self) -> u64 {
        self.nan_entries
    }

    /// Sum of weights over every slot.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.sumw.iter().sum()
    }

    /// Flat slot index of a point, `None` if a coordinate is NaN.
    #[must_use]
    pub fn index(&self, coords: &[f64]) -> Option<usize> {
        let mut index = 0;
        for (edges, value) in self.edges.iter().zip(coords) {
            if value.is_nan() {
                return None;
            }
            index = index * (edges.len() + 1) + slot(edges, *value);
        }
        Some(index)
    }

    /// Adds one entry.
    pub fn fill(&mut self, coords: &[f64], weight: f64) {
        match self.index(coords) {
            Some(i) => {
                self.sumw[i] += weight;
                self.sumw2[i] += weight * weight;
                self.entries += 1;
            }
            None => self.nan_entries += 1,
        }
    }

    /// Returns true if `other` has identical edges.
    #[must_use]
    pub fn same_binning(&self, other: &Self) -> bool {
        self.edges == other.edges
    }

    /// Adds `other` slot by slot. Binning must match.
    pub(crate) fn accumulate(&mut self, other: &Self) {
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        self.nan_entries += other.nan_entries;
    }

    /// Compares contents within an absolute tolerance.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        let close = |a: &[f64], b: &[f64]| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
        };
        self.same_binning(other)
            && self.entries == other.entries
            && self.nan_entries == other.nan_entries
            && close(&self.sumw, &other.sumw)
            && close(&self.sumw2, &other.sumw2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_slots() {
        let mut h = Hist::new(vec![vec![0.0, 10.0, 20.0]]);
        h.fill(&[-1.0], 1.0);
        h.fill(&[0.0], 2.0);
        h.fill(&[19.9], 3.0);
        h.fill(&[20.0], 4.0);
        h.fill(&[f64::NAN], 5.0);
        assert_eq!(h.sumw(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(h.sumw2(), &[1.0, 4.0, 9.0, 16.0]);
        assert_eq!(h.entries(), 4);
        assert_eq!(h.nan_entries(), 1);
    }

    #[test]
    fn test_two_dimensional_index() {
        let mut h = Hist::new(vec![vec![0.0, 1.0], vec![0.0, 1.0, 2.0]]);
        assert_eq!(h.shape(), vec![3, 4]);
        h.fill(&[0.5, 1.5], 1.0);
        assert_eq!(h.index(&[0.5, 1.5]), Some(4 + 2));
        assert!((h.sumw()[6] - 1.0).abs() < f64::EPSILON);
        assert_eq!(h.index(&[0.5, f64::NAN]), None);
    }

    #[test]
    fn test_accumulate() {
        let mut a = Hist::new(vec![vec![0.0, 1.0]]);
        let mut b = a.clone();
        a.fill(&[0.5], 2.0);
        b.fill(&[0.5], 3.0);
        a.accumulate(&b);
        assert!((a.total() - 5.0).abs() < f64::EPSILON);
        assert_eq!(a.entries(), 2);
        assert!(!a.same_binning(&Hist::new(vec![vec![0.0, 2.0]])));
    }
}
