//! Integration tests for context queries.

use expect_test::expect;
use text_size::TextSize;

use strata_ide::{
    get_descendant_inside_parent, get_other_matches_inside_parent, get_stack, is_unterminated,
    selection_ranges, Side,
};
use strata_syntax::{
    ChangedRange, Grammar, GrammarDefinition, NodeInfo, NodeKind, RuleDefinition, SyntaxElement,
    SyntaxNode,
};

fn setup() -> Grammar<NodeInfo> {
    let definition = GrammarDefinition::new(vec![RuleDefinition::include("#object")])
        .with_repository(
            "object",
            RuleDefinition::scope("meta.object", r"\{", r"\}").with_patterns(vec![
                RuleDefinition::include("#pair"),
                RuleDefinition::include("#object"),
            ]),
        )
        .with_repository(
            "pair",
            RuleDefinition::matching("meta.pair", r"(\w+)\s*:\s*(\w+)")
                .with_capture(1, "key")
                .with_capture(2, "value"),
        );
    Grammar::compile_default(&definition).expect("valid grammar")
}

fn kind(grammar: &Grammar<NodeInfo>, id: &str) -> NodeKind {
    grammar.kind(id).expect("declared")
}

fn describe(grammar: &Grammar<NodeInfo>, elements: &[SyntaxElement]) -> String {
    elements
        .iter()
        .map(|element| {
            format!(
                "{}@{:?}",
                grammar.type_id(element.kind()),
                element.text_range()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn text_of(element: &SyntaxElement) -> String {
    match element {
        rowan::NodeOrToken::Node(node) => node.text().to_string(),
        rowan::NodeOrToken::Token(token) => token.text().to_string(),
    }
}

const SOURCE: &str = "{a: 1 {b: 2 c: 3}}";

// =============================================================================
// Context Stack Tests
// =============================================================================

#[test]
fn test_stack_inside_value() {
    let grammar = setup();
    let root = grammar.parse(SOURCE).syntax();
    let stack = get_stack(&root, TextSize::from(10), Side::After);
    expect![[r#"
        pair/2@10..11
        pair@7..11
        object@6..17
        object@0..18
        $root@0..18"#]]
    .assert_eq(&describe(&grammar, &stack));
}

#[test]
fn test_key_of_enclosing_pair() {
    let grammar = setup();
    let root = grammar.parse(SOURCE).syntax();
    let stack = get_stack(&root, TextSize::from(10), Side::After);

    let (key, pair) = (kind(&grammar, "pair/1"), kind(&grammar, "pair"));
    let key = get_descendant_inside_parent(key, pair, &stack).expect("pair has a key");
    assert_eq!(text_of(&key), "b");
}

#[test]
fn test_sibling_pairs() {
    let grammar = setup();
    let root = grammar.parse(SOURCE).syntax();
    let stack = get_stack(&root, TextSize::from(10), Side::After);

    let siblings =
        get_other_matches_inside_parent(kind(&grammar, "pair"), kind(&grammar, "object"), &stack);
    let texts: Vec<String> = siblings.iter().map(text_of).collect();
    assert_eq!(texts, vec!["c: 3"]);
}

#[test]
fn test_side_at_object_boundary() {
    let grammar = setup();
    let root = grammar.parse(SOURCE).syntax();

    let before = get_stack(&root, TextSize::from(17), Side::Before);
    let after = get_stack(&root, TextSize::from(17), Side::After);
    assert_eq!(grammar.type_id(before[0].kind()), "object/end");
    assert_eq!(before[0].text_range().start(), TextSize::from(16));
    assert_eq!(grammar.type_id(after[0].kind()), "object/end");
    assert_eq!(after[0].text_range().start(), TextSize::from(17));
}

// =============================================================================
// Incremental Tree Tests
// =============================================================================

#[test]
fn test_queries_after_reparse() {
    let grammar = setup();
    let old = grammar.parse("{a: 1\n{b: 2}\n");
    let edited = "{a: 1\n{b: 2 c: 3}\n";
    let change = ChangedRange::edit(TextSize::from(11), TextSize::from(11), TextSize::from(5));
    let new = grammar.reparse(&old, edited, &[change]).expect("valid change");
    let root: SyntaxNode = new.syntax();

    let stack = get_stack(&root, TextSize::from(15), Side::After);
    let (key, pair) = (kind(&grammar, "pair/1"), kind(&grammar, "pair"));
    let key = get_descendant_inside_parent(key, pair, &stack).expect("pair has a key");
    assert_eq!(text_of(&key), "c");

    let outer = root.first_child().expect("object");
    assert!(is_unterminated(&outer));
}

#[test]
fn test_selection_follows_stack() {
    let grammar = setup();
    let root = grammar.parse(SOURCE).syntax();
    let ranges = selection_ranges(&root, &[TextSize::from(10)]);

    let mut widths = Vec::new();
    let mut range = Some(&ranges[0]);
    while let Some(selection) = range {
        widths.push(u32::from(selection.range.len()));
        range = selection.parent.as_deref();
    }
    assert_eq!(widths, vec![1, 4, 11, 18]);
}
