//! R-tree family.
//!
//! One [`RTree`] type over the generic engine; the split algorithm (R*,
//! Guttman's quadratic and linear, Greene) is chosen per tree through
//! [`RTreeConfig::split`].

mod ops;
#[allow(clippy::module_inception)]
mod rtree;
pub mod split;

pub use ops::{choose_child, ContainedIn, RTreeOps};
pub use rtree::{RTree, RTreeConfig, RTreeNode};
pub use split::SplitStrategy;
