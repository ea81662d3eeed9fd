//! # pagetree-spatial - Spatial and Metric Trees for pagetree
//!
//! This crate specialises the generic `pagetree` engine for multidimensional
//! data: rectangles indexed by the R-tree family and by the Hilbert R-tree,
//! and objects of a metric space indexed by the M-tree and the Slim-tree.
//!
//! ## Features
//!
//! - **R-tree**: R*, quadratic, linear and Greene splits over n-dimensional rectangles
//! - **Hilbert R-tree**: leaves ordered by the Hilbert value of the entry centre
//! - **M-tree**: balls of a pluggable metric, with distance-to-parent pruning
//! - **Slim-tree**: minimum spanning tree splits for the M-tree
//! - **Queries**: window, containment, range and nearest-neighbour queries,
//!   all lazy
//! - **Persistent**: every tree runs on any `pagetree` container, including the
//!   block file
//!
//! ## Quick Start
//!
//! ```rust
//! use pagetree::container::MemoryContainer;
//! use pagetree::tree::Capacity;
//! use pagetree_spatial::{Euclidean, MTree, MTreeConfig, RTree, RTreeConfig, Rectangle};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rtree = RTree::new(MemoryContainer::new(), RTreeConfig::new(Capacity::new(2, 8)?));
//! rtree.insert(Rectangle::new_2d(0.0, 0.0, 1.0, 1.0), 1u32)?;
//! assert_eq!(rtree.query(&Rectangle::point(&[0.5, 0.5])).count(), 1);
//!
//! let mtree: MTree<u32, Euclidean, _> =
//!     MTree::new(MemoryContainer::new(), MTreeConfig::new(Capacity::new(2, 8)?));
//! mtree.insert(vec![3.0, 4.0], 2u32)?;
//! let (_, value, distance) = mtree.nearest(&[0.0, 0.0])?.unwrap();
//! assert_eq!((value, distance), (2, 5.0));
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

pub mod errors;
pub mod hilbert;
pub mod hilbert_rtree;
pub mod metric;
pub mod mtree;
pub mod rectangle;
pub mod rtree;
pub mod sphere;

pub use errors::{SpatialError, SpatialResult};
pub use hilbert_rtree::{HilbertRTree, HilbertRTreeConfig, HilbertRegion};
pub use metric::{Chebyshev, Euclidean, Manhattan, Metric};
pub use mtree::{MTree, MTreeConfig, PartitionStrategy, PromotionStrategy};
pub use rectangle::Rectangle;
pub use rtree::{RTree, RTreeConfig, SplitStrategy};
pub use sphere::Sphere;

/// Values stored next to the keys of a spatial tree.
pub trait SpatialValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync {}

impl<T> SpatialValue for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync {}
