//! Compiled rules.
//!
//! Rule kinds are resolved once at compile time into a closed enum, so the
//! parse loop dispatches on a tag instead of re-inspecting definitions.

use regex::Regex;

use crate::syntax::NodeKind;

/// Index of a compiled rule in its grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub(crate) u32);

impl RuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a rule list (a `patterns` array, the root list, or a repository
/// entry) in its grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleListId(pub(crate) u32);

impl RuleListId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub(crate) enum Rule {
    Match(MatchRule),
    Scope(ScopeRule),
}

#[derive(Debug)]
pub(crate) struct MatchRule {
    pub(crate) kind: NodeKind,
    pub(crate) regex: Regex,
    pub(crate) captures: Captures,
}

#[derive(Debug)]
pub(crate) struct ScopeRule {
    pub(crate) kind: NodeKind,
    pub(crate) begin: Regex,
    pub(crate) begin_kind: NodeKind,
    pub(crate) begin_captures: Captures,
    pub(crate) end: EndPattern,
    pub(crate) end_kind: NodeKind,
    pub(crate) end_captures: Captures,
    pub(crate) patterns: RuleListId,
    pub(crate) apply_end_last: bool,
    pub(crate) close_nested: bool,
}

#[derive(Debug)]
pub(crate) enum EndPattern {
    Static(Regex),
    /// Pattern source with `\1`..`\9` referring to the begin captures.
    Dynamic(String),
}

#[derive(Debug, Default)]
pub(crate) struct Captures(Box<[Capture]>);

#[derive(Debug, Clone, Copy)]
pub(crate) struct Capture {
    pub(crate) group: usize,
    pub(crate) kind: NodeKind,
    pub(crate) patterns: Option<RuleListId>,
}

impl Captures {
    pub(crate) fn new(mut captures: Vec<Capture>) -> Self {
        captures.sort_by_key(|capture| capture.group);
        Self(captures.into_boxed_slice())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Capture> {
        self.0.iter()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ListItem {
    Rule(RuleId),
    List(RuleListId),
    Include { reference: String, within: String },
}

#[derive(Debug, Default)]
pub(crate) struct RuleList {
    pub(crate) items: Vec<ListItem>,
    pub(crate) resolved: Box<[RuleId]>,
}

/// Substitutes `\1`..`\9` in an end pattern with the escaped begin captures.
///
/// Other escapes are kept untouched; missing groups substitute as empty.
pub(crate) fn substitute_backrefs<'t>(template: &str, group: impl Fn(usize) -> Option<&'t str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(d @ '1'..='9') => {
                let index = d as usize - '0' as usize;
                out.push_str(&regex::escape(group(index).unwrap_or("")));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Returns `true` if the pattern refers to begin captures.
pub(crate) fn has_backrefs(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some('1'..='9') = chars.next() {
                return true;
            }
        }
    }
    false
}
