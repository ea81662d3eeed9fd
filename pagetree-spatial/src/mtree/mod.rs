//! M-tree and Slim-tree.
//!
//! - [`MTree`]: balls of a [`Metric`](crate::Metric) under covering balls
//! - [`split`]: promotion of two references and partitioning around them
//! - Slim-tree splits cut the minimum spanning tree of the overflowing node;
//!   select them with [`MTreeConfig::slim`]

#[allow(clippy::module_inception)]
mod mtree;
mod ops;
mod slim;
pub mod split;

pub use mtree::{MTree, MTreeConfig, MTreeNode};
pub use ops::{choose_child, MTreeOps, Within};
pub use slim::mst_split;
pub use split::{PartitionStrategy, PromotionStrategy};
