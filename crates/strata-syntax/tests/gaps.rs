//! Parsing documents through kept ranges.

mod common;
use common::*;

use strata_syntax::syntax::same_node;
use strata_syntax::{EngineError, GapInjector, GappedDocument};

fn range(start: u32, end: u32) -> TextRange {
    TextRange::new(start.into(), end.into())
}

fn parse_gapped(text: &str, kept: &[TextRange]) -> String {
    let grammar = block_grammar();
    let document = GappedDocument::new(text, kept).expect("valid ranges");
    let parse = grammar.parse(document.virtual_text());
    let real = document.inject(parse.green()).expect("consistent tree");
    snapshot_node(&grammar, &SyntaxNode::new_root(real))
}

#[test]
fn test_gap_between_tokens() {
    insta::assert_snapshot!(parse_gapped("{ab /*x*/cd}", &[range(0, 4), range(9, 12)]), @r#"
    $root@0..12
      block@0..12
        block/begin@0..1 "{"
        word@1..3 "ab"
        $text@3..4 " "
        $gap@4..9 "/*x*/"
        word@9..11 "cd"
        block/end@11..12 "}"
    "#);
}

#[test]
fn test_gap_splits_token() {
    insta::assert_snapshot!(parse_gapped("{a-b}", &[range(0, 2), range(3, 5)]), @r#"
    $root@0..5
      block@0..5
        block/begin@0..1 "{"
        word@1..2 "a"
        $gap@2..3 "-"
        word@3..4 "b"
        block/end@4..5 "}"
    "#);
}

#[test]
fn test_outer_gaps_belong_to_root() {
    insta::assert_snapshot!(parse_gapped("--{ab}--", &[range(2, 6)]), @r#"
    $root@0..8
      $gap@0..2 "--"
      block@2..6
        block/begin@2..3 "{"
        word@3..5 "ab"
        block/end@5..6 "}"
      $gap@6..8 "--"
    "#);
}

#[test]
fn test_injected_tree_is_the_real_text() {
    let text = "{a <b> c}\n<d>{e}";
    let kept = [range(0, 3), range(6, 10), range(13, 16)];
    let document = GappedDocument::new(text, &kept).expect("valid ranges");
    assert_eq!(document.virtual_text(), "{a  c}\n{e}");

    let parse = block_grammar().parse(document.virtual_text());
    let real = document.inject(parse.green()).expect("consistent tree");
    assert_eq!(SyntaxNode::new_root(real).text().to_string(), text);
    assert_eq!(document.to_real(TextSize::from(3)), TextSize::from(6));
}

#[test]
fn test_wrong_tree_is_rejected() {
    let document = GappedDocument::new("{a-b}", &[range(0, 2), range(3, 5)]).expect("valid ranges");
    let parse = block_grammar().parse("{abc}");
    assert!(matches!(
        document.inject(parse.green()),
        Err(EngineError::GapRangesExhausted { .. })
    ));
}

#[test]
fn test_injector_shares_work_across_reparses() {
    let grammar = block_grammar();
    let mut injector = GapInjector::new();

    let before = GappedDocument::new("{a\n%b}\nxx", &[range(0, 3), range(4, 9)]).expect("valid ranges");
    let old = grammar.parse(before.virtual_text());
    let first = injector.inject_gaps(&before, old.green()).expect("consistent tree");

    let after = GappedDocument::new("{a\n%b}\nxyz", &[range(0, 3), range(4, 10)]).expect("valid ranges");
    let new = grammar
        .reparse(&old, after.virtual_text(), &[edit_range(6, 8, "xyz")])
        .expect("valid changes");
    let second = injector.inject_gaps(&after, new.green()).expect("consistent tree");

    let first_block = SyntaxNode::new_root(first).first_child().expect("block");
    let second_block = SyntaxNode::new_root(second).first_child().expect("block");
    assert_eq!(second_block.text().to_string(), "{a\n%b}");
    assert!(same_node(&first_block.green(), &second_block.green()));
}
