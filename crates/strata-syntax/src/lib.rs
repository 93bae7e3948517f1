//! `strata-syntax` - Grammar-driven incremental parsing into lossless syntax trees.
//!
//! This crate executes declarative, TextMate-style grammars over source
//! text:
//!
//! - **Grammar**: compiles `match` / `begin`-`end` rules with captures and
//!   includes into an immutable rule table
//! - **Parser**: runs the rules against an execution stack and builds a
//!   `rowan` tree, in resumable slices or incrementally after an edit
//! - **Gaps**: parses a document through a set of kept ranges and splices
//!   the dropped text back in
//!
//! # Design Principles
//!
//! - **Lossless**: All source text is preserved; unmatched text becomes
//!   plain text tokens
//! - **Error-tolerant**: Scopes left open at end of input are closed and
//!   marked unterminated instead of failing the parse
//! - **Shareable**: A [`Grammar`] is read-only after compilation; any number
//!   of sessions may use it at once
//!
//! # Example
//!
//! ```
//! use strata_syntax::{Grammar, GrammarDefinition, RuleDefinition};
//!
//! let definition = GrammarDefinition::new(vec![
//!     RuleDefinition::scope("block", r"\{", r"\}")
//!         .with_id("block")
//!         .with_patterns(vec![RuleDefinition::matching("word", "[a-z]+").with_id("word")]),
//! ]);
//! let grammar = Grammar::compile_default(&definition).unwrap();
//!
//! let parse = grammar.parse("{ab cd}");
//! let block = parse.syntax().first_child().unwrap();
//! assert_eq!(grammar.type_id(block.kind()), "block");
//! assert!(parse.ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod gaps;
pub mod grammar;
pub mod parser;
pub mod syntax;

pub use error::EngineError;
pub use gaps::{Gap, GapInjector, GappedDocument};
pub use grammar::{
    CaptureDefinition, Grammar, GrammarDefinition, GrammarError, NodeData, NodeInfo, NodeRole,
    RuleDefinition,
};
pub use parser::{
    ChangedRange, Checkpoint, GrammarStack, GrammarStackElement, Parse, ParseConfig, ParseError,
    ParseSession, Progress, StackError,
};
pub use syntax::{GrammarLanguage, NodeKind, SyntaxElement, SyntaxNode, SyntaxToken};
