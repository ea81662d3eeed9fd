use crate::errors::{PageTreeError, PageTreeResult};
use crate::tree::{Bounds, Capacity};

/// Default strong version condition parameter.
pub const DEFAULT_EPSILON: f64 = 0.5;

/// Live-entry bounds a node must meet right after a structure change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrongBounds {
    pub min: usize,
    pub max: usize,
}

/// Construction parameters of a multiversion tree.
///
/// The weak version condition asks every live non-root node to hold at least
/// `capacity.min` live entries. The strong version condition, parameterised by
/// `epsilon`, asks a node created by a structure change to hold between
/// `ceil((1 + epsilon) * min)` and `floor(max - epsilon * min)` live entries.
/// `key_min` is the smallest key of the key domain; the root covers
/// `[key_min, +inf)`.
#[derive(Debug, Clone)]
pub struct MvbtConfig<K> {
    pub capacity: Capacity,
    pub epsilon: f64,
    pub key_min: K,
}

impl<K> MvbtConfig<K> {
    pub fn new(capacity: Capacity, key_min: K) -> Self {
        Self {
            capacity,
            epsilon: DEFAULT_EPSILON,
            key_min,
        }
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_key_min(mut self, key_min: K) -> Self {
        self.key_min = key_min;
        self
    }

    pub fn strong_bounds(&self, level: u32) -> StrongBounds {
        strong_bounds(self.capacity.bounds(level), self.epsilon)
    }

    /// Checks that key splits and strong merges can always produce legal
    /// nodes on both levels.
    pub fn validate(&self) -> PageTreeResult<()> {
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(PageTreeError::configuration(&format!(
                "strong version parameter {} must be positive",
                self.epsilon
            )));
        }
        for (name, bounds) in [("leaf", &self.capacity.leaf), ("index", &self.capacity.index)] {
            let strong = strong_bounds(bounds, self.epsilon);
            if strong.min > strong.max {
                return Err(PageTreeError::configuration(&format!(
                    "{} strong bounds [{}, {}] are empty for capacity [{}, {}] and epsilon {}",
                    name, strong.min, strong.max, bounds.min, bounds.max, self.epsilon
                )));
            }
            // a key split of strong.max + 1 live entries must leave both halves strong
            if 2 * strong.min > strong.max + 1 {
                return Err(PageTreeError::configuration(&format!(
                    "{} capacity [{}, {}] is too small to key split with epsilon {}",
                    name, bounds.min, bounds.max, self.epsilon
                )));
            }
            // an underflowing node merged with a weak sibling must reach the strong minimum
            if strong.min + 1 > 2 * bounds.min {
                return Err(PageTreeError::configuration(&format!(
                    "{} strong minimum {} cannot be reached by merging two nodes of minimum {}",
                    name, strong.min, bounds.min
                )));
            }
        }
        Ok(())
    }
}

fn strong_bounds(bounds: &Bounds, epsilon: f64) -> StrongBounds {
    let d = bounds.min as f64;
    let min = ((1.0 + epsilon) * d).ceil() as usize;
    let max = (bounds.max as f64 - epsilon * d).floor().max(0.0) as usize;
    StrongBounds { min, max }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_strong_bounds() {
        let config = MvbtConfig::new(Capacity::new(4, 16).unwrap(), 0u32);
        assert_eq!(config.strong_bounds(0), StrongBounds { min: 6, max: 14 });
        config.validate().unwrap();

        let config = config.with_capacity(Capacity::new(2, 8).unwrap());
        assert_eq!(config.strong_bounds(1), StrongBounds { min: 3, max: 7 });
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_configurations() {
        let config = MvbtConfig::new(Capacity::new(2, 4).unwrap(), 0u32);
        assert_eq!(config.validate().unwrap_err().kind(), &ErrorKind::Configuration);

        let config = MvbtConfig::new(Capacity::new(4, 16).unwrap(), 0u32).with_epsilon(0.0);
        assert_eq!(config.validate().unwrap_err().kind(), &ErrorKind::Configuration);

        let config = MvbtConfig::new(Capacity::new(4, 16).unwrap(), 0u32).with_epsilon(1.0);
        assert!(config.validate().is_err());
    }
}
