//! Selection range computation.
//!
//! This module provides hierarchical selection ranges based on the context
//! stack of a position.

use text_size::{TextRange, TextSize};

use strata_syntax::SyntaxNode;

use crate::context::{get_stack, Side};

/// A selection range with an optional parent.
#[derive(Debug, Clone)]
pub struct SelectionRange {
    /// The range for this selection.
    pub range: TextRange,
    /// The parent range (larger container).
    pub parent: Option<Box<SelectionRange>>,
}

/// Computes selection ranges for a set of positions in a tree.
pub fn selection_ranges(root: &SyntaxNode, positions: &[TextSize]) -> Vec<SelectionRange> {
    positions
        .iter()
        .map(|position| selection_range_at(root, *position))
        .collect()
}

fn selection_range_at(root: &SyntaxNode, position: TextSize) -> SelectionRange {
    let mut current: Option<SelectionRange> = None;
    for range in selection_chain(root, position).into_iter().rev() {
        current = Some(SelectionRange {
            range,
            parent: current.map(Box::new),
        });
    }

    current.unwrap_or(SelectionRange {
        range: root.text_range(),
        parent: None,
    })
}

/// Ranges enclosing `position`, innermost first, without repeats.
fn selection_chain(root: &SyntaxNode, position: TextSize) -> Vec<TextRange> {
    let mut stack = get_stack(root, position, Side::After);
    if stack.len() == 1 {
        stack = get_stack(root, position, Side::Before);
    }

    let mut ranges: Vec<TextRange> = Vec::with_capacity(stack.len());
    for element in stack {
        let range = element.text_range();
        if ranges.last().copied() != Some(range) {
            ranges.push(range);
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_syntax::{Grammar, GrammarDefinition, RuleDefinition};

    fn parse(text: &str) -> SyntaxNode {
        let definition = GrammarDefinition::new(vec![RuleDefinition::scope("block", r"\{", r"\}")
            .with_id("block")
            .with_patterns(vec![RuleDefinition::matching("word", "[a-z]+").with_id("word")])]);
        let grammar = Grammar::compile_default(&definition).expect("valid grammar");
        grammar.parse(text).syntax()
    }

    fn chain(selection: &SelectionRange) -> Vec<TextRange> {
        let mut ranges = vec![selection.range];
        let mut parent = selection.parent.as_deref();
        while let Some(range) = parent {
            ranges.push(range.range);
            parent = range.parent.as_deref();
        }
        ranges
    }

    fn range(start: u32, end: u32) -> TextRange {
        TextRange::new(start.into(), end.into())
    }

    #[test]
    fn selection_range_has_parent_chain() {
        let root = parse("x {ab cd}");
        let ranges = selection_ranges(&root, &[TextSize::from(7)]);
        assert_eq!(chain(&ranges[0]), vec![range(6, 8), range(2, 9), range(0, 9)]);
    }

    #[test]
    fn selection_range_at_end_leans_left() {
        let root = parse("{ab}");
        let ranges = selection_ranges(&root, &[TextSize::from(4)]);
        assert_eq!(chain(&ranges[0]), vec![range(3, 4), range(0, 4)]);
    }

    #[test]
    fn selection_range_merges_equal_ranges() {
        let root = parse("ab");
        let ranges = selection_ranges(&root, &[TextSize::from(0)]);
        assert_eq!(chain(&ranges[0]), vec![range(0, 2)]);
    }
}
