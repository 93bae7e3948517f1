//! Fatal engine errors.

#![allow(missing_docs)]

use text_size::{TextRange, TextSize};
use thiserror::Error;

use crate::parser::StackError;

/// Errors that abort a parse session or a gap injection.
///
/// None of these are produced by malformed input text: text no rule matches
/// is tokenized as plain text. They signal a broken caller contract or an
/// engine invariant violation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The execution stack contract was violated.
    #[error("stack error: {0}")]
    Stack(#[from] StackError),

    /// The tree builder was finished with nodes still open, or closed a node
    /// that was never started.
    #[error("unbalanced tree builder")]
    UnbalancedTree,

    /// A dynamic end pattern failed to compile after substitution.
    #[error("invalid end pattern {pattern:?}: {source}")]
    InvalidDynamicEnd {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The changed ranges are unsorted, overlapping or inconsistent with the
    /// previous and current text lengths.
    #[error("invalid changed ranges: {0}")]
    InvalidChangedRanges(String),

    /// A parse range lies outside the text or splits a character.
    #[error("range {range:?} is not a valid range of a text of length {len:?}")]
    InvalidRange { range: TextRange, len: TextSize },

    /// Kept ranges of a gapped document are unsorted, overlapping or out of
    /// bounds.
    #[error("invalid kept ranges: {0}")]
    InvalidGapRanges(String),

    /// The tree is longer than the kept ranges describe.
    #[error("gap ranges exhausted: tree spans {tree_len:?} but kept ranges cover {covered:?}")]
    GapRangesExhausted { tree_len: TextSize, covered: TextSize },

    /// Gap injection finished with gaps left over.
    #[error("{0} gaps were not consumed by the walk")]
    GapsUnconsumed(usize),

    /// `advance` was called on a session that already finished or aborted.
    #[error("parse session already finished")]
    SessionFinished,
}
