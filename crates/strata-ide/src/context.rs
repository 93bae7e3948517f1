//! Syntactic context queries.
//!
//! These functions answer "what is this position inside?" over an immutable
//! tree. They only read the tree, so any number of readers may call them on
//! the same tree at once.

use rowan::NodeOrToken;
use text_size::{TextRange, TextSize};

use strata_syntax::{NodeKind, SyntaxElement, SyntaxNode};

pub use strata_syntax::syntax::is_unterminated;

/// Which element wins at a position where one element ends and the next
/// begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Lean left: prefer the element ending at the position.
    Before,
    /// Lean right: prefer the element starting at the position.
    After,
}

impl Side {
    /// Converts a signed side: negative is [`Side::Before`], anything else
    /// [`Side::After`].
    #[must_use]
    pub fn from_sign(sign: i32) -> Self {
        if sign < 0 {
            Side::Before
        } else {
            Side::After
        }
    }

    fn enters(self, range: TextRange, offset: TextSize) -> bool {
        match self {
            Side::Before => range.start() < offset && offset <= range.end(),
            Side::After => range.start() <= offset && offset < range.end(),
        }
    }
}

/// Returns the innermost element at `offset`.
///
/// Zero-width elements are never entered; if no child of the root encloses
/// `offset` from `side`, the root itself is returned.
#[must_use]
pub fn resolve(root: &SyntaxNode, offset: TextSize, side: Side) -> SyntaxElement {
    let mut node = root.clone();
    loop {
        let next = node
            .children_with_tokens()
            .find(|child| side.enters(child.text_range(), offset));
        match next {
            Some(NodeOrToken::Node(child)) => node = child,
            Some(token @ NodeOrToken::Token(_)) => return token,
            None => return NodeOrToken::Node(node),
        }
    }
}

/// Returns the elements enclosing `offset`, innermost first.
///
/// The last element is always `root`.
#[must_use]
pub fn get_stack(root: &SyntaxNode, offset: TextSize, side: Side) -> Vec<SyntaxElement> {
    let innermost = resolve(root, offset, side);
    let ancestors = match &innermost {
        NodeOrToken::Node(node) => node.parent(),
        NodeOrToken::Token(token) => token.parent(),
    };
    let mut stack = vec![innermost];
    stack.extend(
        ancestors
            .into_iter()
            .flat_map(|node| node.ancestors())
            .map(NodeOrToken::Node),
    );
    stack
}

/// Returns the nearest node of kind `parent` in `stack`.
fn nearest_parent(parent: NodeKind, stack: &[SyntaxElement]) -> Option<SyntaxNode> {
    stack.iter().find_map(|element| match element {
        NodeOrToken::Node(node) if node.kind() == parent => Some(node.clone()),
        _ => None,
    })
}

/// Finds the first element of kind `descendant`, in document order, inside
/// the nearest `parent` node of `stack`.
#[must_use]
pub fn get_descendant_inside_parent(
    descendant: NodeKind,
    parent: NodeKind,
    stack: &[SyntaxElement],
) -> Option<SyntaxElement> {
    let parent = nearest_parent(parent, stack)?;
    parent
        .descendants_with_tokens()
        .skip(1)
        .find(|element| element.kind() == descendant)
}

/// Lists the elements of kind `kind` inside the nearest `parent` node of
/// `stack`, in document order, leaving out the elements of `stack` itself.
#[must_use]
pub fn get_other_matches_inside_parent(
    kind: NodeKind,
    parent: NodeKind,
    stack: &[SyntaxElement],
) -> Vec<SyntaxElement> {
    let Some(parent) = nearest_parent(parent, stack) else {
        return Vec::new();
    };
    parent
        .descendants_with_tokens()
        .skip(1)
        .filter(|element| element.kind() == kind && !stack.contains(element))
        .collect()
}
