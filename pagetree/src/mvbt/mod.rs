//! Multiversion B-trees.
//!
//! [`Mvbt`] keeps every version of a key/value map: entries carry a
//! [`Lifespan`], index entries carry the [`MvRegion`] (key interval and
//! lifespan) of their child, and queries name the version they look at.
//! [`AutoDeleteMvbt`] fixes each entry's delete version on insertion and
//! removes expired entries while the version moves forward.

mod auto_delete;
mod config;
mod lifespan;
#[allow(clippy::module_inception)]
mod mvbt;
mod notify_heap;
mod root_history;

pub use auto_delete::{AutoDeleteMvbt, LeafInfo};
pub use config::{MvbtConfig, StrongBounds, DEFAULT_EPSILON};
pub use lifespan::{Lifespan, MvEntry, MvRegion};
pub use mvbt::{Mvbt, MvNode};
pub use notify_heap::{HeapObserver, NotifyHeap};
pub use root_history::{RootHistory, RootRecord};

/// Version stamp of a multiversion tree.
pub type Version = u64;
