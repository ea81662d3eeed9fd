use pagetree::descriptor::Descriptor;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::errors::{SpatialError, SpatialResult};

/// An axis-aligned box in any number of dimensions.
///
/// Intervals are closed on both ends, so rectangles that share only an edge
/// overlap. A point is the degenerate rectangle whose lower and upper corners
/// coincide.
///
/// # Examples
///
/// ```rust
/// use pagetree_spatial::Rectangle;
///
/// let a = Rectangle::new_2d(0.0, 0.0, 10.0, 10.0);
/// let b = Rectangle::new_2d(5.0, 5.0, 15.0, 15.0);
/// assert_eq!(a.overlap(&b), 25.0);
/// assert_eq!(a.enlargement(&b), 125.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl Rectangle {
    /// Creates a rectangle from its lower and upper corners.
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> SpatialResult<Self> {
        if min.is_empty() || min.len() != max.len() {
            return Err(SpatialError::InvalidOperation(format!(
                "corners of {} and {} dimensions do not form a rectangle",
                min.len(),
                max.len()
            )));
        }
        for (axis, (lo, hi)) in min.iter().zip(&max).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(SpatialError::InvalidOperation(format!(
                    "invalid interval [{}, {}] on axis {}",
                    lo, hi, axis
                )));
            }
        }
        Ok(Self { min, max })
    }

    /// Two-dimensional rectangle; the bounds of each axis are swapped if
    /// given in reverse.
    pub fn new_2d(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min: vec![x1.min(x2), y1.min(y2)],
            max: vec![x1.max(x2), y1.max(y2)],
        }
    }

    /// The degenerate rectangle holding a single point.
    pub fn point(coords: &[f64]) -> Self {
        Self {
            min: coords.to_vec(),
            max: coords.to_vec(),
        }
    }

    pub fn dims(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &[f64] {
        &self.min
    }

    pub fn max(&self) -> &[f64] {
        &self.max
    }

    pub fn lower(&self, axis: usize) -> f64 {
        self.min[axis]
    }

    pub fn upper(&self, axis: usize) -> f64 {
        self.max[axis]
    }

    pub fn extent(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    /// Volume (area in two dimensions).
    pub fn area(&self) -> f64 {
        (0..self.dims()).map(|axis| self.extent(axis)).product()
    }

    /// Sum of the side lengths, proportional to the perimeter.
    pub fn margin(&self) -> f64 {
        (0..self.dims()).map(|axis| self.extent(axis)).sum()
    }

    pub fn center(&self) -> Vec<f64> {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| (lo + hi) / 2.0)
            .collect()
    }

    /// Volume of the intersection, zero when the rectangles are disjoint.
    pub fn overlap(&self, other: &Rectangle) -> f64 {
        let mut volume = 1.0;
        for axis in 0..self.dims().min(other.dims()) {
            let lo = self.min[axis].max(other.min[axis]);
            let hi = self.max[axis].min(other.max[axis]);
            if hi <= lo {
                return 0.0;
            }
            volume *= hi - lo;
        }
        volume
    }

    /// Smallest rectangle covering both.
    pub fn union_with(&self, other: &Rectangle) -> Rectangle {
        let mut result = self.clone();
        result.union(other);
        result
    }

    /// Growth of the area needed to cover `other`.
    pub fn enlargement(&self, other: &Rectangle) -> f64 {
        self.union_with(other).area() - self.area()
    }

    pub fn contains_point(&self, point: &[f64]) -> bool {
        point.len() == self.dims()
            && point
                .iter()
                .enumerate()
                .all(|(axis, x)| *x >= self.min[axis] && *x <= self.max[axis])
    }

    /// Euclidean distance from `point` to the nearest point of the rectangle;
    /// zero inside.
    pub fn min_dist(&self, point: &[f64]) -> f64 {
        point
            .iter()
            .enumerate()
            .take(self.dims())
            .map(|(axis, x)| {
                let gap = if *x < self.min[axis] {
                    self.min[axis] - x
                } else if *x > self.max[axis] {
                    x - self.max[axis]
                } else {
                    0.0
                };
                gap * gap
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Euclidean distance between the closest points of two rectangles.
    pub fn distance(&self, other: &Rectangle) -> f64 {
        (0..self.dims().min(other.dims()))
            .map(|axis| {
                let gap = (other.min[axis] - self.max[axis])
                    .max(self.min[axis] - other.max[axis])
                    .max(0.0);
                gap * gap
            })
            .sum::<f64>()
            .sqrt()
    }
}

impl Descriptor for Rectangle {
    fn overlaps(&self, other: &Self) -> bool {
        self.dims() == other.dims()
            && (0..self.dims())
                .all(|axis| self.min[axis] <= other.max[axis] && other.min[axis] <= self.max[axis])
    }

    fn contains(&self, other: &Self) -> bool {
        self.dims() == other.dims()
            && (0..self.dims())
                .all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }

    fn union(&mut self, other: &Self) {
        for (lo, other_lo) in self.min.iter_mut().zip(&other.min) {
            *lo = lo.min(*other_lo);
        }
        for (hi, other_hi) in self.max.iter_mut().zip(&other.max) {
            *hi = hi.max(*other_hi);
        }
    }
}

impl Display for Rectangle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rectangle({:?}, {:?})", self.min, self.max)
    }
}
