//! Multiversion B-tree integration tests.
//!
//! Both variants run on block files and are reopened part way through.

mod auto_delete_test;
mod mvbt_test;
