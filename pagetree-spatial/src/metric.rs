//! Distance functions of the metric trees.
//!
//! A metric is a zero-sized type selected at compile time; spheres and the
//! M-tree are parameterised by it. Implementations must satisfy the metric
//! axioms, the triangle inequality in particular: the M-tree prunes with it.

use std::fmt::Debug;

/// A distance over points given as coordinate slices.
pub trait Metric: Default + Copy + Debug + PartialEq + Send + Sync + 'static {
    /// Distance between `a` and `b`. Coordinates beyond the shorter slice are
    /// ignored.
    fn distance(a: &[f64], b: &[f64]) -> f64;
}

/// The L2 distance.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Euclidean;

impl Metric for Euclidean {
    fn distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }
}

/// The L1 distance.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Manhattan;

impl Metric for Manhattan {
    fn distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
    }
}

/// The L∞ distance.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Chebyshev;

impl Metric for Chebyshev {
    fn distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }
}
