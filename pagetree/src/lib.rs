//! # pagetree - paginated tree indexes
//!
//! `pagetree` is a family of disk-oriented tree indexes built on one generic
//! grow/split/post engine. Nodes live in a [`container::Container`], a
//! block store addressed by page id with fix/unfix (pin) semantics; the tree
//! keeps no pointers to nodes, only ids and cached region descriptors.
//!
//! ## Key Features
//!
//! - **Generic engine**: insertion by descent and split posting, removal with
//!   underflow repair, lazy level cursors, best-first queries, bulk loading
//! - **B+-tree**: ordered multimap with range scans
//! - **Multiversion B-tree**: point-in-time queries over a version history,
//!   plus an auto-delete variant where entries expire at a declared version
//! - **Containers**: an in-memory map and a block file with an LRU page cache,
//!   checksummed pages and a persistent free list
//!
//! Spatial and metric trees (R-tree family, Hilbert R-tree, M-tree, Slim-tree)
//! live in the `pagetree_spatial` crate.
//!
//! ## Quick Start
//!
//! ```rust
//! use pagetree::btree::BPlusTree;
//! use pagetree::container::MemoryContainer;
//! use pagetree::tree::Capacity;
//!
//! # fn main() -> pagetree::errors::PageTreeResult<()> {
//! let tree = BPlusTree::new(MemoryContainer::new(), Capacity::new(2, 4)?);
//! for key in [5u32, 1, 9, 3] {
//!     tree.insert(key, key * 10)?;
//! }
//! assert_eq!(tree.get(&3)?, Some(30));
//!
//! let keys: Vec<u32> = tree
//!     .range(2..=9)
//!     .map(|entry| entry.map(|(k, _)| k))
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(keys, vec![3, 5, 9]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`errors`] - error type and result alias
//! - [`descriptor`] - the region descriptor trait and key ranges
//! - [`container`] - node stores
//! - [`tree`] - the generic engine
//! - [`btree`] - B+-tree
//! - [`mvbt`] - multiversion B-tree and auto-delete MVBT

pub mod btree;
pub mod container;
pub mod descriptor;
pub mod errors;
pub mod mvbt;
pub mod tree;
