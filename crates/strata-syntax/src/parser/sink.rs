//! Green tree builder.
//!
//! Works like `rowan::GreenNodeBuilder`, but accepts finished green
//! elements as children, which is how reused subtrees are spliced into a
//! new tree without copying them.

use rowan::{GreenNode, GreenToken, NodeOrToken};

use crate::error::EngineError;
use crate::syntax::{GreenElement, NodeKind};

/// Builds a green tree from start/token/finish calls.
#[derive(Debug, Clone, Default)]
pub(crate) struct TreeBuilder {
    parents: Vec<(NodeKind, usize)>,
    children: Vec<GreenElement>,
    len: usize,
}

impl TreeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Opens a node and returns its slot (its depth among open nodes).
    pub(crate) fn start_node(&mut self, kind: NodeKind) -> usize {
        let slot = self.parents.len();
        self.parents.push((kind, self.children.len()));
        slot
    }

    /// Adds a token to the innermost open node.
    pub(crate) fn token(&mut self, kind: NodeKind, text: &str) {
        self.len += text.len();
        self.children
            .push(NodeOrToken::Token(GreenToken::new(kind.into(), text)));
    }

    /// Adds a finished element to the innermost open node.
    pub(crate) fn push(&mut self, element: GreenElement) {
        let len = match &element {
            NodeOrToken::Node(node) => node.text_len(),
            NodeOrToken::Token(token) => token.text_len(),
        };
        self.len += usize::from(len);
        self.children.push(element);
    }

    /// Closes the innermost open node.
    pub(crate) fn finish_node(&mut self) -> Result<(), EngineError> {
        let (kind, first) = self.parents.pop().ok_or(EngineError::UnbalancedTree)?;
        let node = GreenNode::new(kind.into(), self.children.drain(first..));
        self.children.push(NodeOrToken::Node(node));
        Ok(())
    }

    /// Returns the length of the text emitted so far.
    pub(crate) fn text_len(&self) -> usize {
        self.len
    }

    /// Returns the number of open nodes.
    pub(crate) fn depth(&self) -> usize {
        self.parents.len()
    }

    /// Returns the kinds of the open nodes, outermost first.
    pub(crate) fn open_kinds(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.parents.iter().map(|(kind, _)| *kind)
    }

    /// Returns the finished tree.
    ///
    /// Every node must be closed and exactly one element must remain.
    pub(crate) fn finish(&mut self) -> Result<GreenNode, EngineError> {
        if !self.parents.is_empty() || self.children.len() != 1 {
            return Err(EngineError::UnbalancedTree);
        }
        match self.children.pop() {
            Some(NodeOrToken::Node(node)) => Ok(node),
            _ => Err(EngineError::UnbalancedTree),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{same_node, SyntaxNode};

    #[test]
    fn test_nested_nodes() {
        let mut builder = TreeBuilder::new();
        assert_eq!(builder.start_node(NodeKind::ROOT), 0);
        builder.token(NodeKind::TEXT, "a");
        assert_eq!(builder.start_node(NodeKind(4)), 1);
        builder.token(NodeKind(5), "{");
        assert_eq!(builder.depth(), 2);
        builder.finish_node().expect("open");
        builder.finish_node().expect("open");
        let root = SyntaxNode::new_root(builder.finish().expect("balanced"));
        assert_eq!(root.text().to_string(), "a{");
        assert_eq!(root.children().count(), 1);
    }

    #[test]
    fn test_unbalanced() {
        let mut builder = TreeBuilder::new();
        assert!(matches!(builder.finish_node(), Err(EngineError::UnbalancedTree)));
        builder.start_node(NodeKind::ROOT);
        assert!(matches!(builder.finish(), Err(EngineError::UnbalancedTree)));
    }

    #[test]
    fn test_pushed_subtree_keeps_identity() {
        let shared = GreenNode::new(
            NodeKind(4).into(),
            vec![NodeOrToken::Token(GreenToken::new(NodeKind(5).into(), "x"))],
        );
        let mut builder = TreeBuilder::new();
        builder.start_node(NodeKind::ROOT);
        builder.push(NodeOrToken::Node(shared.clone()));
        builder.finish_node().expect("open");
        let root = builder.finish().expect("balanced");
        let Some(NodeOrToken::Node(child)) = root.children().next() else {
            panic!("expected a node child");
        };
        assert!(same_node(child, &shared));
    }
}
