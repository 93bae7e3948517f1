//! `strata-ide` - Editor queries over grammar-driven syntax trees.
//!
//! This crate provides read-only functionality built on top of `strata-syntax`:
//!
//! - **Context**: the chain of elements enclosing a position, and searches
//!   inside the nearest ancestor of a given type
//! - **Selection Range**: nested ranges for expand-selection
//!
//! # Architecture
//!
//! All queries are pure functions over an immutable tree, making them easy to
//! test and safe to call from many readers at once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod selection_range;

pub use context::{
    get_descendant_inside_parent, get_other_matches_inside_parent, get_stack, is_unterminated,
    resolve, Side,
};
pub use selection_range::{selection_ranges, SelectionRange};
