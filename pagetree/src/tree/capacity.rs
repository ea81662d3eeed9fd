//! Node capacity policy.
//!
//! Leaf and index levels carry independent [`Bounds`]. Bounds are given
//! explicitly or derived from a block size and the encoded size of one entry.

use serde::Serialize;

use crate::container::PAGE_OVERHEAD;
use crate::errors::{PageTreeError, PageTreeResult};

/// Encoded size of a node without its entries (enum tag, length, level).
pub const NODE_HEADER_BYTES: usize = 16;

/// Minimum and maximum number of entries of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct Bounds {
    pub min: usize,
    pub max: usize,
}

impl Bounds {
    pub fn new(min: usize, max: usize) -> PageTreeResult<Self> {
        if min == 0 {
            return Err(PageTreeError::configuration(
                "minimum capacity must be positive",
            ));
        }
        if max < 2 {
            return Err(PageTreeError::configuration(&format!(
                "maximum capacity {} is below 2",
                max
            )));
        }
        if 2 * min > max + 1 {
            return Err(PageTreeError::configuration(&format!(
                "capacity bounds [{}, {}] cannot be split into two legal nodes",
                min, max
            )));
        }
        Ok(Self { min, max })
    }
}

/// Legal sizes of the first partition when splitting a node of `len` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitBounds {
    pub min: usize,
    pub max: usize,
}

impl SplitBounds {
    /// Iterates the legal first-partition sizes.
    pub fn sizes(&self) -> std::ops::RangeInclusive<usize> {
        self.min..=self.max
    }

    pub fn accepts(&self, first: usize, total: usize) -> bool {
        first >= self.min && first <= self.max && total >= first
    }
}

/// Per-level capacity policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct Capacity {
    pub leaf: Bounds,
    pub index: Bounds,
}

impl Capacity {
    /// Same bounds for leaves and index nodes.
    pub fn new(min: usize, max: usize) -> PageTreeResult<Self> {
        let bounds = Bounds::new(min, max)?;
        Ok(Self {
            leaf: bounds,
            index: bounds,
        })
    }

    pub fn with_levels(leaf: Bounds, index: Bounds) -> Self {
        Self { leaf, index }
    }

    /// Derives bounds from a block size.
    ///
    /// `leaf_entry_bytes` and `index_entry_bytes` are the encoded sizes of one
    /// entry (see [`encoded_size`]); `min_ratio` in `(0, 0.5]` sets the minimum
    /// as a fraction of the maximum.
    pub fn from_block_size(
        block_size: usize,
        leaf_entry_bytes: usize,
        index_entry_bytes: usize,
        min_ratio: f64,
    ) -> PageTreeResult<Self> {
        if !(min_ratio > 0.0 && min_ratio <= 0.5) {
            return Err(PageTreeError::configuration(&format!(
                "minimum capacity ratio {} is outside (0, 0.5]",
                min_ratio
            )));
        }
        let usable = block_size
            .checked_sub(PAGE_OVERHEAD + NODE_HEADER_BYTES)
            .ok_or_else(|| {
                PageTreeError::configuration(&format!("block size {} is too small", block_size))
            })?;

        let derive = |entry_bytes: usize| -> PageTreeResult<Bounds> {
            if entry_bytes == 0 {
                return Err(PageTreeError::configuration("entry size must be positive"));
            }
            let max = usable / entry_bytes;
            let min = ((max as f64) * min_ratio).floor().max(1.0) as usize;
            Bounds::new(min, max)
        };

        Ok(Self {
            leaf: derive(leaf_entry_bytes)?,
            index: derive(index_entry_bytes)?,
        })
    }

    pub fn bounds(&self, level: u32) -> &Bounds {
        if level == 0 {
            &self.leaf
        } else {
            &self.index
        }
    }

    pub fn overflows(&self, level: u32, len: usize) -> bool {
        len > self.bounds(level).max
    }

    pub fn underflows(&self, level: u32, len: usize) -> bool {
        len < self.bounds(level).min
    }

    /// Legal first-partition sizes for splitting `len` entries on `level`.
    pub fn split_bounds(&self, level: u32, len: usize) -> SplitBounds {
        let bounds = self.bounds(level);
        let min = bounds.min.min(len / 2).max(1);
        let max = len.saturating_sub(min).min(bounds.max).max(min);
        SplitBounds { min, max }
    }
}

/// Encoded size of a value with the container encoding.
pub fn encoded_size<T: Serialize>(value: &T) -> PageTreeResult<usize> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::legacy())?.len())
}
