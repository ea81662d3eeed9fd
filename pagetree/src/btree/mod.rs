//! B+-tree over the generic engine.
//!
//! Leaves hold `(key, value)` pairs in key order, index entries carry the
//! closed key interval of their subtree. Duplicate keys are allowed.

mod bplus_tree;
mod ops;

pub use bplus_tree::{BPlusTree, SortOrder};
pub use ops::{BPlusOps, KeyBounds};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Requirements on B+-tree keys.
pub trait BTreeKey: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync {}

impl<T> BTreeKey for T where T: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync {}

/// Requirements on B+-tree values.
pub trait BTreeValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync {}

impl<T> BTreeValue for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync {}
