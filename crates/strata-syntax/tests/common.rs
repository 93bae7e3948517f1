//! Shared helpers for parser snapshot tests.
#![allow(dead_code, unused_imports)]

pub use strata_syntax::{
    ChangedRange, Grammar, GrammarDefinition, NodeInfo, Parse, RuleDefinition, SyntaxNode,
};
pub use text_size::{TextRange, TextSize};

/// The block-of-words grammar used throughout the scenarios.
pub fn block_grammar() -> Grammar<NodeInfo> {
    let definition = GrammarDefinition::new(vec![RuleDefinition::scope("block", r"\{", r"\}")
        .with_id("block")
        .with_patterns(vec![
            RuleDefinition::matching("word", "[a-z]+").with_id("word"),
        ])]);
    Grammar::compile_default(&definition).expect("valid grammar")
}

/// Blocks nest and hold words; words also appear at the top level.
pub fn nested_grammar() -> Grammar<NodeInfo> {
    let definition = GrammarDefinition::new(vec![
        RuleDefinition::include("#block"),
        RuleDefinition::matching("word", "[a-z]+").with_id("word"),
    ])
    .with_repository(
        "block",
        RuleDefinition::scope("block", r"\{", r"\}")
            .with_patterns(vec![RuleDefinition::include("$self")]),
    );
    Grammar::compile_default(&definition).expect("valid grammar")
}

/// Helper to format a parse result for snapshot testing.
pub fn snapshot_parse<T>(grammar: &Grammar<T>, source: &str) -> String {
    snapshot_tree(grammar, &grammar.parse(source))
}

/// Formats a tree with node-type ids, then its errors if there are any.
pub fn snapshot_tree<T>(grammar: &Grammar<T>, parse: &Parse) -> String {
    let mut output = snapshot_node(grammar, &parse.syntax());

    if !parse.ok() {
        output.push_str("---\nErrors:\n");
        for err in parse.errors() {
            output.push_str(&format!("  - {err}\n"));
        }
    }

    output
}

/// Formats a tree with node-type ids.
pub fn snapshot_node<T>(grammar: &Grammar<T>, node: &SyntaxNode) -> String {
    let mut output = String::new();
    format_node(grammar, node, &mut output, 0);
    output
}

fn format_node<T>(grammar: &Grammar<T>, node: &SyntaxNode, out: &mut String, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{}{}@{:?}\n",
        indent,
        grammar.type_id(node.kind()),
        node.text_range()
    ));

    for child in node.children_with_tokens() {
        match child {
            rowan::NodeOrToken::Node(n) => format_node(grammar, &n, out, depth + 1),
            rowan::NodeOrToken::Token(t) => {
                out.push_str(&format!(
                    "{}{}@{:?} {:?}\n",
                    "  ".repeat(depth + 1),
                    grammar.type_id(t.kind()),
                    t.text_range(),
                    t.text()
                ));
            }
        }
    }
}

/// Replaces `from..to` of `text` with `insert`.
pub fn apply_edit(text: &str, from: usize, to: usize, insert: &str) -> String {
    let mut edited = String::with_capacity(text.len() + insert.len());
    edited.push_str(&text[..from]);
    edited.push_str(insert);
    edited.push_str(&text[to..]);
    edited
}

/// Describes replacing `from..to` with `insert`.
pub fn edit_range(from: usize, to: usize, insert: &str) -> ChangedRange {
    ChangedRange::edit(
        TextSize::try_from(from).expect("small text"),
        TextSize::try_from(to).expect("small text"),
        TextSize::of(insert),
    )
}
