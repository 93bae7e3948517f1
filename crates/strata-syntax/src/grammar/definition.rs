//! Declarative grammar documents.
//!
//! A grammar is written as a tree of [`RuleDefinition`]s in the familiar
//! TextMate shape (`match`, `begin`/`end`, `name`, `patterns`, `captures`,
//! `include`) and loaded from JSON or TOML.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::grammar::GrammarError;

/// The root of a grammar document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrammarDefinition {
    /// Human readable grammar name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// TextMate scope name; informational only.
    #[serde(default, alias = "scopeName", skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,
    /// Top-level rules, tried at the root of every document.
    #[serde(default)]
    pub patterns: Vec<RuleDefinition>,
    /// Named rules reachable through `include: "#key"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repository: BTreeMap<String, RuleDefinition>,
}

/// One rule of a grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    /// Explicit node-type id; must be unique within the grammar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Semantic tag carried onto the node type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Single-shot pattern.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_: Option<String>,
    /// Pattern opening a scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    /// Pattern closing the scope opened by `begin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Rules tried while this rule's scope is open.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<RuleDefinition>,
    /// Capture groups of `match`, or of `begin`/`end` lacking their own map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub captures: BTreeMap<String, CaptureDefinition>,
    /// Capture groups of `begin`.
    #[serde(
        default,
        alias = "beginCaptures",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub begin_captures: BTreeMap<String, CaptureDefinition>,
    /// Capture groups of `end`.
    #[serde(
        default,
        alias = "endCaptures",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub end_captures: BTreeMap<String, CaptureDefinition>,
    /// Reference to another rule list: `$self`, `$base` or `#key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    /// The end pattern loses ties against the scope's own patterns.
    #[serde(default, alias = "applyEndPatternLast", skip_serializing_if = "is_false")]
    pub apply_end_last: bool,
    /// The end pattern is also tried while nested scopes are open, closing
    /// them together with this one.
    #[serde(default, skip_serializing_if = "is_false")]
    pub close_nested: bool,
}

/// A capture group mapping: a bare tag, or a rule with name and patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureDefinition {
    /// `"1": "keyword.operator"`
    Name(String),
    /// `"1": { "name": "...", "patterns": [...] }`
    Rule(RuleDefinition),
}

impl CaptureDefinition {
    /// Returns the semantic tag of the capture.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Rule(rule) => rule.name.as_deref(),
        }
    }

    /// Returns the patterns tokenized inside the captured span.
    #[must_use]
    pub fn patterns(&self) -> &[RuleDefinition] {
        match self {
            Self::Name(_) => &[],
            Self::Rule(rule) => &rule.patterns,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl RuleDefinition {
    /// Creates a `match` rule.
    #[must_use]
    pub fn matching(name: &str, pattern: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            match_: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    /// Creates a `begin`/`end` rule.
    #[must_use]
    pub fn scope(name: &str, begin: &str, end: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            begin: Some(begin.to_string()),
            end: Some(end.to_string()),
            ..Self::default()
        }
    }

    /// Creates an include reference.
    #[must_use]
    pub fn include(reference: &str) -> Self {
        Self {
            include: Some(reference.to_string()),
            ..Self::default()
        }
    }

    /// Sets the explicit node-type id.
    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Sets the nested patterns.
    #[must_use]
    pub fn with_patterns(mut self, patterns: Vec<RuleDefinition>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Adds a named capture for `group`.
    #[must_use]
    pub fn with_capture(mut self, group: usize, name: &str) -> Self {
        self.captures
            .insert(group.to_string(), CaptureDefinition::Name(name.to_string()));
        self
    }

    /// Returns `true` if the rule is a bare `include`.
    #[must_use]
    pub fn is_include(&self) -> bool {
        self.include.is_some()
    }

    /// Returns `true` if the rule only groups nested patterns.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.include.is_none() && self.match_.is_none() && self.begin.is_none() && self.end.is_none()
    }
}

impl GrammarDefinition {
    /// Creates a definition from top-level patterns.
    #[must_use]
    pub fn new(patterns: Vec<RuleDefinition>) -> Self {
        Self {
            patterns,
            ..Self::default()
        }
    }

    /// Adds a repository entry.
    #[must_use]
    pub fn with_repository(mut self, key: &str, rule: RuleDefinition) -> Self {
        self.repository.insert(key.to_string(), rule);
        self
    }

    /// Parses a JSON grammar document.
    pub fn from_json_str(source: &str) -> Result<Self, GrammarError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Parses a TOML grammar document.
    pub fn from_toml_str(source: &str) -> Result<Self, GrammarError> {
        Ok(toml::from_str(source)?)
    }

    /// Loads a grammar document, choosing the format from the extension.
    pub fn load(path: &Path) -> Result<Self, GrammarError> {
        let contents = std::fs::read_to_string(path).map_err(|source| GrammarError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_document() {
        let source = r##"{
            "name": "demo",
            "patterns": [
                { "include": "#block" },
                { "match": "[a-z]+", "name": "word", "captures": { "0": "word.text" } }
            ],
            "repository": {
                "block": {
                    "begin": "\\{",
                    "end": "\\}",
                    "name": "block",
                    "beginCaptures": { "0": { "name": "punct" } },
                    "patterns": [{ "include": "$self" }]
                }
            }
        }"##;
        let def = GrammarDefinition::from_json_str(source).expect("valid grammar");
        assert_eq!(def.name.as_deref(), Some("demo"));
        assert!(def.patterns[0].is_include());
        let block = &def.repository["block"];
        assert_eq!(block.begin.as_deref(), Some("\\{"));
        assert_eq!(block.begin_captures["0"].name(), Some("punct"));
        assert_eq!(def.patterns[1].captures["0"].name(), Some("word.text"));
    }

    #[test]
    fn test_toml_document() {
        let source = r##"
name = "demo"

[[patterns]]
match = "[0-9]+"
name = "number"

[repository.comment]
begin = "#"
end = "$"
name = "comment"
close_nested = true
"##;
        let def = GrammarDefinition::from_toml_str(source).expect("valid grammar");
        assert_eq!(def.patterns[0].match_.as_deref(), Some("[0-9]+"));
        assert!(def.repository["comment"].close_nested);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = GrammarDefinition::from_json_str(r#"{ "patterns": [{ "mtch": "x" }] }"#)
            .expect_err("typo must not be ignored");
        assert!(matches!(err, GrammarError::Json(_)));
    }

    #[test]
    fn test_group_and_include_predicates() {
        assert!(RuleDefinition::default()
            .with_patterns(vec![RuleDefinition::matching("a", "a")])
            .is_group());
        assert!(!RuleDefinition::matching("a", "a").is_group());
        assert!(RuleDefinition::include("$self").is_include());
    }
}
