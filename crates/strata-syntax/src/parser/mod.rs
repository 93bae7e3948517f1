//! Grammar-driven parser.
//!
//! This module executes a compiled [`Grammar`] over source text and builds
//! a lossless concrete syntax tree using the `rowan` library.
//!
//! # Design
//!
//! The parser is designed for editor use:
//!
//! - **Error-tolerant**: text no rule matches becomes plain text, scopes
//!   left open at end of input are closed and marked unterminated
//! - **Lossless**: every byte of the input is held by exactly one token
//! - **Incremental**: a reparse replays unchanged regions of the previous
//!   tree instead of tokenizing them
//! - **Resumable**: a [`ParseSession`] runs in bounded slices
//!
//! # Architecture
//!
//! 1. **Scanning**: line-bounded pattern search (see `source`)
//! 2. **Tokenizing**: one decision per step against the execution stack
//! 3. **Tree Building**: green nodes are built directly, reused subtrees are
//!    pushed as they are (see `sink`)

#![allow(clippy::module_inception)]

mod incremental;
mod parser;
mod sink;
mod source;
mod stack;

use std::sync::Arc;

use rowan::GreenNode;
use serde::{Deserialize, Serialize};
use text_size::{TextRange, TextSize};
use tracing::error;

pub use incremental::ChangedRange;
pub use parser::ParseSession;
pub use stack::{
    DynamicEnd, FrameEnd, GrammarStack, GrammarStackElement, NodeHandle, StackError,
};

pub(crate) use sink::TreeBuilder;

use crate::error::EngineError;
use crate::grammar::Grammar;
use crate::syntax::{NodeKind, SyntaxNode};

/// Result of parsing source text.
#[derive(Debug, Clone)]
pub struct Parse {
    /// The root green node.
    green: GreenNode,
    /// Stack snapshots at line starts, in position order.
    checkpoints: Vec<Checkpoint>,
    /// Offset of the parsed range in the source text.
    offset: TextSize,
    /// Parsing errors.
    errors: Vec<ParseError>,
}

impl Parse {
    /// Returns the root syntax node.
    #[must_use]
    pub fn syntax(&self) -> SyntaxNode {
        SyntaxNode::new_root(self.green.clone())
    }

    /// Returns the root green node.
    #[must_use]
    pub fn green(&self) -> &GreenNode {
        &self.green
    }

    /// Returns the parsing errors.
    #[must_use]
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Returns `true` if parsing produced no errors.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the stack snapshots recorded at line starts.
    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Returns the snapshot recorded at `pos`, if `pos` is a line start.
    #[must_use]
    pub fn checkpoint_at(&self, pos: TextSize) -> Option<&Checkpoint> {
        self.checkpoints
            .binary_search_by_key(&pos, |checkpoint| checkpoint.pos)
            .ok()
            .map(|index| &self.checkpoints[index])
    }

    /// Returns the offset of the parsed range in the source text.
    ///
    /// Tree positions are relative to this offset.
    #[must_use]
    pub fn offset(&self) -> TextSize {
        self.offset
    }

    fn new<T>(
        grammar: &Grammar<T>,
        green: GreenNode,
        checkpoints: Vec<Checkpoint>,
        offset: TextSize,
    ) -> Self {
        let errors = unterminated_errors(grammar, &green);
        Self {
            green,
            checkpoints,
            offset,
            errors,
        }
    }
}

/// A parsing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// The byte range where the error occurred.
    pub range: TextRange,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}..{}",
            self.message,
            u32::from(self.range.start()),
            u32::from(self.range.end())
        )
    }
}

impl std::error::Error for ParseError {}

/// The execution stack at a line start.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Line start, relative to the parsed range.
    pub pos: TextSize,
    /// The stack before any decision at `pos`.
    pub stack: Arc<GrammarStack>,
}

/// Parse session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// Steps run by one [`ParseSession::advance`] call.
    pub budget: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self { budget: 4096 }
    }
}

impl ParseConfig {
    /// Parses settings from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

/// Outcome of one [`ParseSession::advance`] slice.
#[derive(Debug)]
pub enum Progress {
    /// The budget ran out; call `advance` again.
    Pending,
    /// End of input was reached.
    Done(Parse),
}

impl<T> Grammar<T> {
    /// Parses `text` from scratch.
    ///
    /// Never fails: if the session aborts, the error is logged and the tree
    /// built up to that point is returned.
    #[must_use]
    pub fn parse(&self, text: &str) -> Parse {
        let mut session = ParseSession::new(self, text);
        match session.finish() {
            Ok(parse) => parse,
            Err(err) => {
                error!(%err, "parse aborted, returning partial tree");
                session.partial()
            }
        }
    }

    /// Parses the sub-range `range` of `text`.
    ///
    /// Positions in the resulting tree are relative to the range start.
    pub fn parse_range(&self, text: &str, range: TextRange) -> Result<Parse, EngineError> {
        ParseSession::with_range(self, text, range)?.finish()
    }

    /// Reparses `text` after an edit, reusing `old` where the edit has no
    /// influence.
    ///
    /// `old` must be a parse of the pre-edit text with this grammar, and
    /// `changes` must describe the edit.
    pub fn reparse(
        &self,
        old: &Parse,
        text: &str,
        changes: &[ChangedRange],
    ) -> Result<Parse, EngineError> {
        ParseSession::incremental(self, text, old, changes)?.finish()
    }
}

fn unterminated_errors<T>(grammar: &Grammar<T>, green: &GreenNode) -> Vec<ParseError> {
    SyntaxNode::new_root(green.clone())
        .descendants_with_tokens()
        .filter_map(|element| element.into_token())
        .filter(|token| token.kind() == NodeKind::UNTERMINATED)
        .filter_map(|token| token.parent())
        .map(|scope| ParseError {
            message: format!("unterminated `{}`", grammar.type_id(scope.kind())),
            range: scope.text_range(),
        })
        .collect()
}
