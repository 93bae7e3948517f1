//! The execution stack.
//!
//! One frame per open scope, plus the root frame. Frame `k` always pairs
//! with the `k`-th open node of the tree builder, so closing frames and
//! finishing nodes stay in lockstep.

use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::grammar::{RuleId, RuleListId};
use crate::syntax::NodeKind;

/// Errors raised by stack operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// `pop` on an empty stack.
    #[error("pop on an empty stack")]
    Underflow,

    /// `close` past the top of the stack.
    #[error("close at index {index} on a stack of depth {len}")]
    CloseOutOfRange {
        /// Requested index.
        index: usize,
        /// Stack depth at the time of the call.
        len: usize,
    },
}

/// Tree builder handle of the node a frame encloses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    /// Depth of the node among the builder's open nodes.
    pub slot: usize,
    /// Kind of the node.
    pub kind: NodeKind,
}

/// An end pattern with the begin captures substituted in.
#[derive(Debug)]
pub struct DynamicEnd {
    source: String,
    pub(crate) regex: Regex,
}

impl DynamicEnd {
    pub(crate) fn new(source: String, regex: Regex) -> Self {
        Self { source, regex }
    }

    /// Returns the substituted pattern source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// What closes a frame.
#[derive(Debug, Clone)]
pub struct FrameEnd {
    /// The scope rule that opened the frame.
    pub rule: RuleId,
    /// Resolved end pattern, for end patterns with back-references.
    pub dynamic: Option<Arc<DynamicEnd>>,
}

impl FrameEnd {
    fn same_end(&self, other: &FrameEnd) -> bool {
        self.rule == other.rule
            && match (&self.dynamic, &other.dynamic) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.source == b.source,
                _ => false,
            }
    }
}

/// One frame of the execution stack.
#[derive(Debug, Clone)]
pub struct GrammarStackElement {
    /// The enclosing node in the tree builder.
    pub node: NodeHandle,
    /// Candidate rules at this depth.
    pub rules: RuleListId,
    /// How the frame closes; `None` for the root frame.
    pub end: Option<FrameEnd>,
}

impl GrammarStackElement {
    /// Returns `true` if both frames would run the same rules and close on
    /// the same end. The builder node is not compared.
    #[must_use]
    pub fn stack_equivalent(&self, other: &GrammarStackElement) -> bool {
        self.rules == other.rules
            && match (&self.end, &other.end) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_end(b),
                _ => false,
            }
    }
}

/// The execution stack of a parse session.
#[derive(Debug, Clone, Default)]
pub struct GrammarStack {
    frames: Vec<GrammarStackElement>,
}

impl GrammarStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame.
    pub fn push(&mut self, element: GrammarStackElement) {
        self.frames.push(element);
    }

    /// Removes the top frame.
    pub fn pop(&mut self) -> Result<GrammarStackElement, StackError> {
        self.frames.pop().ok_or(StackError::Underflow)
    }

    /// Removes every frame at or above `index`.
    pub fn close(&mut self, index: usize) -> Result<(), StackError> {
        if index >= self.frames.len() {
            return Err(StackError::CloseOutOfRange {
                index,
                len: self.frames.len(),
            });
        }
        self.frames.truncate(index);
        Ok(())
    }

    /// Returns the top frame.
    #[must_use]
    pub fn top(&self) -> Option<&GrammarStackElement> {
        self.frames.last()
    }

    /// Returns the frame at `index`, counted from the root.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&GrammarStackElement> {
        self.frames.get(index)
    }

    /// Returns the stack depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if no frame is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterates frames from the root up.
    pub fn iter(&self) -> impl Iterator<Item = &GrammarStackElement> {
        self.frames.iter()
    }

    /// Returns `true` if both stacks have the same depth and pairwise
    /// [`stack_equivalent`](GrammarStackElement::stack_equivalent) frames.
    ///
    /// Resuming a parse from either stack over the same text yields the same
    /// nodes.
    #[must_use]
    pub fn equals(&self, other: &GrammarStack) -> bool {
        self.frames.len() == other.frames.len()
            && self
                .frames
                .iter()
                .zip(&other.frames)
                .all(|(a, b)| a.stack_equivalent(b))
    }
}
