//! Sorted integer sets and posting lists.
//!
//! [`IdSet`] backs secondary-index key entries; [`IdRelSet`] backs the
//! full-text index's per-word postings.

pub mod idrelset;
pub mod idset;

pub use idrelset::{IdRel, IdRelSet, PosField};
pub use idset::{AddMode, IdSet, BTREE_THRESHOLD};
