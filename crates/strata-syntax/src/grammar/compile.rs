//! Grammar compilation.
//!
//! Compilation runs in two phases. The first walks the definition, declares
//! node types and allocates rules and rule lists, recording includes by name.
//! The second resolves every include to a rule list and flattens each list
//! into its candidate rules. Includes are resolved by reference, so a rule
//! whose patterns include `$self` points back at the root list instead of
//! being expanded into itself.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::debug;

use super::definition::{CaptureDefinition, GrammarDefinition, RuleDefinition};
use super::rule::{
    has_backrefs, substitute_backrefs, Capture, Captures, EndPattern, ListItem, MatchRule, Rule,
    RuleId, RuleList, RuleListId, ScopeRule,
};
use super::{Grammar, GrammarError, NodeData, NodeRole, NodeType};
use crate::syntax::NodeKind;

const RESERVED: [(&str, NodeRole); NodeKind::RESERVED as usize] = [
    ("$root", NodeRole::Root),
    ("$text", NodeRole::Text),
    ("$unterminated", NodeRole::Unterminated),
    ("$gap", NodeRole::Gap),
];

pub(super) struct Compiler<'d, T, F> {
    definition: &'d GrammarDefinition,
    declarator: F,
    types: Vec<NodeType<T>>,
    ids: FxHashMap<SmolStr, NodeKind>,
    rules: Vec<Rule>,
    lists: Vec<RuleList>,
    repository: FxHashMap<&'d str, RuleListId>,
}

impl<'d, T, F> Compiler<'d, T, F>
where
    F: FnMut(NodeKind, &str, &NodeData<'_>) -> Result<T, String>,
{
    pub(super) fn new(definition: &'d GrammarDefinition, declarator: F) -> Self {
        Self {
            definition,
            declarator,
            types: Vec::new(),
            ids: FxHashMap::default(),
            rules: Vec::new(),
            lists: Vec::new(),
            repository: FxHashMap::default(),
        }
    }

    pub(super) fn finish(mut self) -> Result<Grammar<T>, GrammarError> {
        let definition = self.definition;

        for (id, role) in RESERVED {
            self.declare(
                id.to_string(),
                NodeData {
                    role,
                    name: None,
                    rule: None,
                },
            )?;
        }

        let root = self.compile_list(&definition.patterns, "$self")?;

        for (key, rule) in &definition.repository {
            let list = if rule.is_include() {
                let within = rule.id.clone().unwrap_or_else(|| key.clone());
                self.include_list(rule, within)?
            } else if rule.is_group() {
                if rule.patterns.is_empty() {
                    return Err(GrammarError::EmptyRule(key.clone()));
                }
                let parent = rule.id.as_deref().unwrap_or(key);
                self.compile_list(&rule.patterns, parent)?
            } else {
                let id = self.compile_rule(rule, key)?;
                self.alloc_list(vec![ListItem::Rule(id)])
            };
            self.repository.insert(key.as_str(), list);
        }

        self.resolve(root)?;

        debug!(
            grammar = definition.name.as_deref().unwrap_or("<unnamed>"),
            rules = self.rules.len(),
            lists = self.lists.len(),
            node_types = self.types.len(),
            "compiled grammar"
        );

        Ok(Grammar {
            name: definition.name.as_deref().map(SmolStr::new),
            types: self.types,
            ids: self.ids,
            rules: self.rules,
            lists: self.lists,
            root,
        })
    }

    // =========================================================================
    // Phase 1: declaration and allocation
    // =========================================================================

    fn declare(&mut self, id: String, data: NodeData<'d>) -> Result<NodeKind, GrammarError> {
        let index = u16::try_from(self.types.len()).map_err(|_| GrammarError::TooManyNodeTypes)?;
        if index == u16::MAX {
            return Err(GrammarError::TooManyNodeTypes);
        }
        let kind = NodeKind(index);
        let id = SmolStr::new(id);
        if self.ids.contains_key(&id) {
            return Err(GrammarError::DuplicateId(id.to_string()));
        }
        let value = (self.declarator)(kind, &id, &data).map_err(|message| GrammarError::Declarator {
            id: id.to_string(),
            message,
        })?;
        self.ids.insert(id.clone(), kind);
        self.types.push(NodeType {
            id,
            role: data.role,
            value,
        });
        Ok(kind)
    }

    fn alloc_list(&mut self, items: Vec<ListItem>) -> RuleListId {
        let id = RuleListId(self.lists.len() as u32);
        self.lists.push(RuleList {
            items,
            resolved: Box::default(),
        });
        id
    }

    fn include_list(&mut self, rule: &RuleDefinition, within: String) -> Result<RuleListId, GrammarError> {
        if rule.match_.is_some() || rule.begin.is_some() || !rule.patterns.is_empty() {
            return Err(GrammarError::IncludeWithPattern(within));
        }
        let reference = rule.include.clone().unwrap_or_default();
        Ok(self.alloc_list(vec![ListItem::Include { reference, within }]))
    }

    fn compile_list(
        &mut self,
        patterns: &'d [RuleDefinition],
        parent: &str,
    ) -> Result<RuleListId, GrammarError> {
        let list = self.alloc_list(Vec::new());
        let mut items = Vec::with_capacity(patterns.len());

        for (index, rule) in patterns.iter().enumerate() {
            let path = format!("{parent}/{index}");
            if let Some(reference) = &rule.include {
                if rule.match_.is_some() || rule.begin.is_some() || !rule.patterns.is_empty() {
                    return Err(GrammarError::IncludeWithPattern(path));
                }
                items.push(ListItem::Include {
                    reference: reference.clone(),
                    within: path,
                });
            } else if rule.is_group() {
                if rule.patterns.is_empty() {
                    return Err(GrammarError::EmptyRule(path));
                }
                let parent = rule.id.as_deref().unwrap_or(&path).to_string();
                items.push(ListItem::List(self.compile_list(&rule.patterns, &parent)?));
            } else {
                items.push(ListItem::Rule(self.compile_rule(rule, &path)?));
            }
        }

        self.lists[list.index()].items = items;
        Ok(list)
    }

    fn compile_rule(&mut self, rule: &'d RuleDefinition, path: &str) -> Result<RuleId, GrammarError> {
        let id = rule.id.clone().unwrap_or_else(|| path.to_string());
        let compiled = match (&rule.match_, &rule.begin, &rule.end) {
            (Some(_), Some(_), _) => return Err(GrammarError::MatchAndBegin(id)),
            (Some(_), None, Some(_)) | (None, None, Some(_)) => {
                return Err(GrammarError::MissingBegin(id))
            }
            (None, Some(_), None) => return Err(GrammarError::MissingEnd(id)),
            (None, None, None) => return Err(GrammarError::EmptyRule(id)),
            (Some(pattern), None, None) => {
                let kind = self.declare(id.clone(), rule_data(NodeRole::Match, rule))?;
                let regex = build_regex(pattern, &id)?;
                let captures =
                    self.compile_captures(&rule.captures, &id, &id, regex.captures_len())?;
                Rule::Match(MatchRule {
                    kind,
                    regex,
                    captures,
                })
            }
            (None, Some(begin), Some(end)) => {
                let kind = self.declare(id.clone(), rule_data(NodeRole::Scope, rule))?;
                let begin_id = format!("{id}/begin");
                let end_id = format!("{id}/end");
                let begin_kind = self.declare(begin_id.clone(), rule_data(NodeRole::Begin, rule))?;
                let end_kind = self.declare(end_id.clone(), rule_data(NodeRole::End, rule))?;

                let begin_regex = build_regex(begin, &id)?;
                let (end_pattern, end_groups) = if has_backrefs(end) {
                    // Validate the shape once; the real pattern is built per match.
                    let shape = build_regex(&substitute_backrefs(end, |_| Some("")), &id)?;
                    (EndPattern::Dynamic(end.clone()), shape.captures_len())
                } else {
                    let regex = build_regex(end, &id)?;
                    let groups = regex.captures_len();
                    (EndPattern::Static(regex), groups)
                };
                let begin_groups = begin_regex.captures_len();
                let shared_groups = begin_groups.max(end_groups);

                // Shared `captures` need the group in either pattern.
                let (begin_map, begin_limit) = if rule.begin_captures.is_empty() {
                    (&rule.captures, shared_groups)
                } else {
                    (&rule.begin_captures, begin_groups)
                };
                let (end_map, end_limit) = if rule.end_captures.is_empty() {
                    (&rule.captures, shared_groups)
                } else {
                    (&rule.end_captures, end_groups)
                };
                let begin_captures = self.compile_captures(begin_map, &begin_id, &id, begin_limit)?;
                let end_captures = self.compile_captures(end_map, &end_id, &id, end_limit)?;
                let patterns = self.compile_list(&rule.patterns, &id)?;

                Rule::Scope(ScopeRule {
                    kind,
                    begin: begin_regex,
                    begin_kind,
                    begin_captures,
                    end: end_pattern,
                    end_kind,
                    end_captures,
                    patterns,
                    apply_end_last: rule.apply_end_last,
                    close_nested: rule.close_nested,
                })
            }
        };

        let rule_id = RuleId(self.rules.len() as u32);
        self.rules.push(compiled);
        Ok(rule_id)
    }

    fn compile_captures(
        &mut self,
        captures: &'d BTreeMap<String, CaptureDefinition>,
        prefix: &str,
        rule: &str,
        groups: usize,
    ) -> Result<Captures, GrammarError> {
        let mut compiled = Vec::with_capacity(captures.len());
        for (index, capture) in captures {
            let group = index
                .parse::<usize>()
                .ok()
                .filter(|&group| group < groups)
                .ok_or_else(|| GrammarError::InvalidCaptureIndex {
                    rule: rule.to_string(),
                    index: index.clone(),
                })?;
            let id = format!("{prefix}/{group}");
            let kind = self.declare(
                id.clone(),
                NodeData {
                    role: NodeRole::Capture,
                    name: capture.name(),
                    rule: match capture {
                        CaptureDefinition::Rule(rule) => Some(rule),
                        CaptureDefinition::Name(_) => None,
                    },
                },
            )?;
            let patterns = if capture.patterns().is_empty() {
                None
            } else {
                Some(self.compile_list(capture.patterns(), &id)?)
            };
            compiled.push(Capture {
                group,
                kind,
                patterns,
            });
        }
        Ok(Captures::new(compiled))
    }

    // =========================================================================
    // Phase 2: include resolution
    // =========================================================================

    fn resolve(&mut self, root: RuleListId) -> Result<(), GrammarError> {
        for index in 0..self.lists.len() {
            let mut visited = FxHashSet::default();
            let mut seen = FxHashSet::default();
            let mut resolved = Vec::new();
            self.flatten(
                RuleListId(index as u32),
                root,
                &mut visited,
                &mut seen,
                &mut resolved,
            )?;
            self.lists[index].resolved = resolved.into_boxed_slice();
        }
        Ok(())
    }

    fn flatten(
        &self,
        list: RuleListId,
        root: RuleListId,
        visited: &mut FxHashSet<RuleListId>,
        seen: &mut FxHashSet<RuleId>,
        out: &mut Vec<RuleId>,
    ) -> Result<(), GrammarError> {
        if !visited.insert(list) {
            return Ok(());
        }
        for item in &self.lists[list.index()].items {
            match item {
                ListItem::Rule(rule) => {
                    if seen.insert(*rule) {
                        out.push(*rule);
                    }
                }
                ListItem::List(inner) => self.flatten(*inner, root, visited, seen, out)?,
                ListItem::Include { reference, within } => {
                    let target = self.lookup(reference, root).ok_or_else(|| {
                        GrammarError::UnknownInclude {
                            reference: reference.clone(),
                            within: within.clone(),
                        }
                    })?;
                    self.flatten(target, root, visited, seen, out)?;
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, reference: &str, root: RuleListId) -> Option<RuleListId> {
        match reference {
            "$self" | "$base" => Some(root),
            _ => reference
                .strip_prefix('#')
                .and_then(|key| self.repository.get(key).copied()),
        }
    }
}

fn rule_data(role: NodeRole, rule: &RuleDefinition) -> NodeData<'_> {
    NodeData {
        role,
        name: rule.name.as_deref(),
        rule: Some(rule),
    }
}

fn build_regex(pattern: &str, rule: &str) -> Result<Regex, GrammarError> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|source| GrammarError::InvalidRegex {
            rule: rule.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}
