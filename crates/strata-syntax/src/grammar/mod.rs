//! Grammars: compiled, immutable rule tables.
//!
//! A [`GrammarDefinition`] is compiled once into a [`Grammar`], a flat table
//! of rules, rule lists and node types. Includes are resolved at compile time,
//! so a grammar that compiles never meets an unknown reference while parsing.
//! A grammar holds no mutable state and can be shared by any number of parse
//! sessions.

mod compile;
pub mod definition;
pub(crate) mod rule;

use std::path::PathBuf;

use smol_str::SmolStr;
use thiserror::Error;

pub use definition::{CaptureDefinition, GrammarDefinition, RuleDefinition};
pub use rule::{RuleId, RuleListId};

use rule::{Rule, RuleList, ScopeRule};

use crate::syntax::NodeKind;

/// Errors raised while loading or compiling a grammar.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum GrammarError {
    /// An `include` names a rule list that does not exist.
    #[error("unknown include '{reference}' in rule '{within}'")]
    UnknownInclude { reference: String, within: String },

    /// A rule has both `match` and `begin`.
    #[error("rule '{0}' has both 'match' and 'begin'")]
    MatchAndBegin(String),

    /// A rule has `begin` without `end`.
    #[error("rule '{0}' has 'begin' without 'end'")]
    MissingEnd(String),

    /// A rule has `end` without `begin`.
    #[error("rule '{0}' has 'end' without 'begin'")]
    MissingBegin(String),

    /// A rule combines `include` with its own patterns.
    #[error("rule '{0}' combines 'include' with its own patterns")]
    IncludeWithPattern(String),

    /// A rule has neither patterns nor nested rules.
    #[error("rule '{0}' is empty")]
    EmptyRule(String),

    /// A pattern failed to compile.
    #[error("invalid pattern {pattern:?} in rule '{rule}': {source}")]
    InvalidRegex {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A capture key is not a group index of the pattern it applies to.
    #[error("invalid capture index '{index}' in rule '{rule}'")]
    InvalidCaptureIndex { rule: String, index: String },

    /// Two rules declare the same explicit id.
    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),

    /// The declarator rejected a node type.
    #[error("node type '{id}' rejected: {message}")]
    Declarator { id: String, message: String },

    /// The grammar declares more node types than a tree can address.
    #[error("grammar declares more than {} node types", u16::MAX)]
    TooManyNodeTypes,

    /// Reading a grammar document failed.
    #[error("failed to read grammar {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON grammar document is malformed.
    #[error("invalid JSON grammar: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML grammar document is malformed.
    #[error("invalid TOML grammar: {0}")]
    Toml(#[from] toml::de::Error),
}

/// What a declared node type stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// The document root.
    Root,
    /// Text no rule matched.
    Text,
    /// Marker closing an unterminated scope.
    Unterminated,
    /// Text re-inserted by gap injection.
    Gap,
    /// A `match` rule.
    Match,
    /// The node spanning a `begin`/`end` scope.
    Scope,
    /// The text matched by `begin`.
    Begin,
    /// The text matched by `end`.
    End,
    /// A capture group.
    Capture,
}

/// Everything a declarator gets to see about a node type.
#[derive(Debug, Clone, Copy)]
pub struct NodeData<'a> {
    /// What the node type stands for.
    pub role: NodeRole,
    /// Scope name of the rule or capture, if any.
    pub name: Option<&'a str>,
    /// The rule the node type was declared for.
    pub rule: Option<&'a RuleDefinition>,
}

/// Built-in node type used by [`Grammar::compile_default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The kind of the node type.
    pub kind: NodeKind,
    /// Unique id.
    pub id: SmolStr,
    /// Scope name.
    pub name: Option<SmolStr>,
    /// What the node type stands for.
    pub role: NodeRole,
}

#[derive(Debug)]
pub(crate) struct NodeType<T> {
    pub(crate) id: SmolStr,
    pub(crate) role: NodeRole,
    pub(crate) value: T,
}

/// A compiled grammar.
///
/// `T` is the caller's node type, produced by the declarator passed to
/// [`Grammar::compile`] for every node kind.
#[derive(Debug)]
pub struct Grammar<T> {
    pub(crate) name: Option<SmolStr>,
    pub(crate) types: Vec<NodeType<T>>,
    pub(crate) ids: rustc_hash::FxHashMap<SmolStr, NodeKind>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) lists: Vec<RuleList>,
    pub(crate) root: RuleListId,
}

impl<T> Grammar<T> {
    /// Compiles a definition, calling `declarator` once per node kind.
    ///
    /// The declarator receives the kind, the unique id of the node type and
    /// the data it was declared for; an `Err` aborts compilation.
    pub fn compile<F>(definition: &GrammarDefinition, declarator: F) -> Result<Self, GrammarError>
    where
        F: FnMut(NodeKind, &str, &NodeData<'_>) -> Result<T, String>,
    {
        compile::Compiler::new(definition, declarator).finish()
    }

    /// Returns the grammar name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the caller's node type for `kind`.
    #[must_use]
    pub fn node_type(&self, kind: NodeKind) -> Option<&T> {
        self.types.get(kind.index()).map(|ty| &ty.value)
    }

    /// Returns the unique id of `kind`, or `"?"` for kinds outside the table.
    #[must_use]
    pub fn type_id(&self, kind: NodeKind) -> &str {
        self.types.get(kind.index()).map_or("?", |ty| ty.id.as_str())
    }

    /// Returns the role of `kind`.
    #[must_use]
    pub fn role(&self, kind: NodeKind) -> Option<NodeRole> {
        self.types.get(kind.index()).map(|ty| ty.role)
    }

    /// Looks up a node kind by id.
    #[must_use]
    pub fn kind(&self, id: &str) -> Option<NodeKind> {
        self.ids.get(id).copied()
    }

    /// Returns the number of node kinds, reserved kinds included.
    #[must_use]
    pub fn node_type_count(&self) -> usize {
        self.types.len()
    }

    /// Returns the top-level rule list.
    #[must_use]
    pub fn root_list(&self) -> RuleListId {
        self.root
    }

    /// Returns the candidate rules of a list, includes resolved.
    #[must_use]
    pub fn candidates(&self, list: RuleListId) -> &[RuleId] {
        self.lists
            .get(list.index())
            .map_or(&[], |list| &list.resolved[..])
    }

    pub(crate) fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.index()]
    }

    pub(crate) fn scope(&self, id: RuleId) -> Option<&ScopeRule> {
        match self.rules.get(id.index()) {
            Some(Rule::Scope(scope)) => Some(scope),
            _ => None,
        }
    }
}

impl Grammar<NodeInfo> {
    /// Compiles a definition with the built-in [`NodeInfo`] node type.
    pub fn compile_default(definition: &GrammarDefinition) -> Result<Self, GrammarError> {
        Self::compile(definition, |kind, id, data| {
            Ok(NodeInfo {
                kind,
                id: SmolStr::new(id),
                name: data.name.map(SmolStr::new),
                role: data.role,
            })
        })
    }
}
