//! Syntax tree types for grammar-driven parse trees.
//!
//! This module provides the `rowan` binding used by every tree the engine
//! builds. Node kinds are plain indices into a grammar's node-type table, so
//! one language type serves every grammar.

/// A node kind: the index of a node type in a [`Grammar`](crate::Grammar).
///
/// The first four indices are reserved and declared by every grammar before
/// any rule is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKind(pub u16);

impl NodeKind {
    /// Root node of every parse tree.
    pub const ROOT: NodeKind = NodeKind(0);

    /// Text no rule matched.
    pub const TEXT: NodeKind = NodeKind(1);

    /// Zero-width marker closing a scope whose end never matched.
    pub const UNTERMINATED: NodeKind = NodeKind(2);

    /// Text re-inserted by gap injection.
    pub const GAP: NodeKind = NodeKind(3);

    /// Number of reserved kinds.
    pub(crate) const RESERVED: u16 = 4;

    /// Returns the raw index of this kind.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Returns `true` for the kinds every grammar declares implicitly.
    #[must_use]
    pub fn is_reserved(self) -> bool {
        self.0 < Self::RESERVED
    }
}

impl From<NodeKind> for rowan::SyntaxKind {
    fn from(kind: NodeKind) -> Self {
        Self(kind.0)
    }
}

/// The language type shared by all grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GrammarLanguage {}

impl rowan::Language for GrammarLanguage {
    type Kind = NodeKind;

    fn kind_from_raw(raw: rowan::SyntaxKind) -> Self::Kind {
        NodeKind(raw.0)
    }

    fn kind_to_raw(kind: Self::Kind) -> rowan::SyntaxKind {
        kind.into()
    }
}

/// A syntax node in a parse tree.
pub type SyntaxNode = rowan::SyntaxNode<GrammarLanguage>;

/// A syntax token in a parse tree.
pub type SyntaxToken = rowan::SyntaxToken<GrammarLanguage>;

/// A syntax element (either node or token) in a parse tree.
pub type SyntaxElement = rowan::SyntaxElement<GrammarLanguage>;

/// A green element as stored in the immutable tree.
pub type GreenElement = rowan::NodeOrToken<rowan::GreenNode, rowan::GreenToken>;

/// Returns `true` if both green nodes are the same shared allocation.
///
/// Structural equality is `==`; this is the identity test used to check
/// that an incremental reparse reused a subtree instead of rebuilding it.
#[must_use]
pub fn same_node(a: &rowan::GreenNodeData, b: &rowan::GreenNodeData) -> bool {
    std::ptr::eq(a, b)
}

/// Returns `true` if `node` is a scope whose end pattern never matched.
#[must_use]
pub fn is_unterminated(node: &SyntaxNode) -> bool {
    node.last_child_or_token()
        .is_some_and(|last| last.kind() == NodeKind::UNTERMINATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowan::{GreenNode, GreenToken, NodeOrToken};

    #[test]
    fn test_reserved_kinds() {
        assert!(NodeKind::ROOT.is_reserved());
        assert!(NodeKind::GAP.is_reserved());
        assert!(!NodeKind(NodeKind::RESERVED).is_reserved());
        assert_eq!(NodeKind::TEXT.index(), 1);
    }

    #[test]
    fn test_raw_round_trip() {
        let raw: rowan::SyntaxKind = NodeKind(42).into();
        assert_eq!(raw.0, 42);
        assert_eq!(
            <GrammarLanguage as rowan::Language>::kind_from_raw(raw),
            NodeKind(42)
        );
    }

    #[test]
    fn test_identity_vs_equality() {
        let make = || {
            GreenNode::new(
                NodeKind::ROOT.into(),
                vec![NodeOrToken::Token(GreenToken::new(NodeKind::TEXT.into(), "x"))],
            )
        };
        let a = make();
        let b = make();
        assert_eq!(a, b);
        assert!(!same_node(&a, &b));
        let c = a.clone();
        assert!(same_node(&a, &c));
    }

    #[test]
    fn test_unterminated_marker() {
        let green = GreenNode::new(
            NodeKind::ROOT.into(),
            vec![NodeOrToken::Node(GreenNode::new(
                NodeKind(7).into(),
                vec![
                    NodeOrToken::Token(GreenToken::new(NodeKind(8).into(), "{")),
                    NodeOrToken::Token(GreenToken::new(NodeKind::UNTERMINATED.into(), "")),
                ],
            ))],
        );
        let root = SyntaxNode::new_root(green);
        let scope = root.first_child().expect("scope");
        assert!(is_unterminated(&scope));
        assert!(!is_unterminated(&root));
    }
}
