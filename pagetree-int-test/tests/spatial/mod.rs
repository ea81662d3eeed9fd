//! Spatial and metric tree integration tests.

mod hilbert_rtree_test;
mod mtree_test;
mod rtree_test;
