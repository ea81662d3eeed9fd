//! B+-tree integration tests on block files.

mod bplus_tree_test;
