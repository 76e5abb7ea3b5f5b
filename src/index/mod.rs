//! The in-memory B+-tree index over `ft_pct`, and its on-disk checkpoint
//! format.

pub mod btree;
pub mod node;
pub mod serializer;

pub use btree::{BPlusTree, DeleteRangeStats, RangeStats, TreeStats};
