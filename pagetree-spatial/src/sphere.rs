use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

use pagetree::descriptor::Descriptor;
use serde::{Deserialize, Serialize};

use crate::errors::{SpatialError, SpatialResult};
use crate::metric::Metric;

/// Relative slack allowed when comparing distances that were summed in a
/// different order, such as a cached distance and a recomputed one.
pub const DISTANCE_TOLERANCE: f64 = 1e-9;

fn slack(distance: f64) -> f64 {
    DISTANCE_TOLERANCE * distance.max(1.0)
}

/// A closed ball of the metric `M`: the descriptor of the M-tree.
///
/// Besides its centre and radius a sphere stored in a node caches its
/// distance to the centre of the node it lives in. Two spheres of the same
/// node can be told apart by the triangle inequality on these cached values
/// before any real distance is computed. The cache is `None` for a sphere
/// that does not live in a node, such as the root's or a query's.
///
/// Union keeps the centre of the receiver and grows the radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Sphere<M> {
    center: Vec<f64>,
    radius: f64,
    distance_to_parent: Option<f64>,
    #[serde(skip)]
    metric: PhantomData<M>,
}

impl<M: Metric> Sphere<M> {
    pub fn new(center: Vec<f64>, radius: f64) -> SpatialResult<Self> {
        if center.is_empty() || center.iter().any(|c| !c.is_finite()) {
            return Err(SpatialError::InvalidOperation(format!(
                "invalid sphere centre {:?}",
                center
            )));
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(SpatialError::InvalidOperation(format!(
                "invalid sphere radius {}",
                radius
            )));
        }
        Ok(Self {
            center,
            radius,
            distance_to_parent: None,
            metric: PhantomData,
        })
    }

    /// The sphere of radius zero around `center`.
    pub fn point(center: Vec<f64>) -> Self {
        Self {
            center,
            radius: 0.0,
            distance_to_parent: None,
            metric: PhantomData,
        }
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    pub fn dims(&self) -> usize {
        self.center.len()
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn distance_to_parent(&self) -> Option<f64> {
        self.distance_to_parent
    }

    pub fn set_distance_to_parent(&mut self, distance: Option<f64>) {
        self.distance_to_parent = distance;
    }

    pub fn with_distance_to_parent(mut self, distance: Option<f64>) -> Self {
        self.distance_to_parent = distance;
        self
    }

    /// Distance from the centre to `point`.
    pub fn distance_to(&self, point: &[f64]) -> f64 {
        M::distance(&self.center, point)
    }

    pub fn center_distance(&self, other: &Sphere<M>) -> f64 {
        M::distance(&self.center, &other.center)
    }

    /// Distance from `point` to the nearest point of the ball; zero inside.
    pub fn min_dist(&self, point: &[f64]) -> f64 {
        (self.distance_to(point) - self.radius).max(0.0)
    }

    /// Farthest distance from `center` to a point of this ball.
    pub fn reach_from(&self, center: &[f64]) -> f64 {
        M::distance(center, &self.center) + self.radius
    }

    /// Lower bound of the centre distance of two spheres of the same node,
    /// from their cached distances to the node centre.
    fn parent_bound(&self, other: &Sphere<M>) -> Option<f64> {
        match (self.distance_to_parent, other.distance_to_parent) {
            (Some(a), Some(b)) => Some((a - b).abs()),
            _ => None,
        }
    }

    /// [`overlaps`](Descriptor::overlaps) that first rules out spheres of the
    /// same node by their cached distances.
    pub fn overlaps_pd(&self, other: &Sphere<M>) -> bool {
        if let Some(bound) = self.parent_bound(other) {
            if bound > self.radius + other.radius + slack(bound) {
                return false;
            }
        }
        self.overlaps(other)
    }

    /// [`contains`](Descriptor::contains) that first rules out spheres of the
    /// same node by their cached distances.
    pub fn contains_pd(&self, other: &Sphere<M>) -> bool {
        if let Some(bound) = self.parent_bound(other) {
            let reach = bound + other.radius;
            if reach > self.radius + slack(reach) {
                return false;
            }
        }
        self.contains(other)
    }
}

impl<M: Metric> Descriptor for Sphere<M> {
    fn overlaps(&self, other: &Self) -> bool {
        let distance = self.center_distance(other);
        distance <= self.radius + other.radius + slack(distance)
    }

    fn contains(&self, other: &Self) -> bool {
        let reach = other.reach_from(&self.center);
        reach <= self.radius + slack(reach)
    }

    fn union(&mut self, other: &Self) {
        let reach = other.reach_from(&self.center);
        if reach > self.radius {
            self.radius = reach;
        }
    }
}

impl<M: Metric> Display for Sphere<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sphere({:?}, r={})", self.center, self.radius)
    }
}
