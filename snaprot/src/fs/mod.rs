//! Filesystem operations on generation trees.

pub mod link_tree;
pub mod metadata;

pub use link_tree::{link_tree, LinkStats};
pub use metadata::stamp_now;
