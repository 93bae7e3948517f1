//! Parsing over disjoint document ranges.
//!
//! A [`GappedDocument`] keeps some ranges of a real document and drops the
//! rest. The kept ranges are concatenated into a virtual text, which is what
//! the grammar parses. [`GapInjector::inject_gaps`] then splices the dropped
//! text back into the virtual tree as [`NodeKind::GAP`] tokens, producing a
//! tree of the real document.
//!
//! Green nodes store lengths, not offsets, so a subtree that no gap crosses
//! is reused as it is; only the nodes on the path to a gap are rebuilt.

use rowan::{GreenNode, GreenNodeData, GreenToken, NodeOrToken};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use text_size::{TextRange, TextSize};
use tracing::trace;

use crate::error::EngineError;
use crate::syntax::{GreenElement, NodeKind};

/// A dropped range of the real document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// Position of the gap in the virtual text.
    pub virtual_offset: TextSize,
    /// The dropped range in the real document.
    pub range: TextRange,
    /// The dropped text.
    pub text: SmolStr,
}

/// A real document seen through its kept ranges.
#[derive(Debug, Clone)]
pub struct GappedDocument {
    virtual_text: String,
    kept: Vec<TextRange>,
    /// Virtual start of each kept range.
    starts: Vec<TextSize>,
    gaps: Vec<Gap>,
    real_len: TextSize,
}

impl GappedDocument {
    /// Creates a document keeping `kept` of `text`.
    ///
    /// Kept ranges must be sorted, disjoint, inside `text` and on character
    /// boundaries. Empty ranges are allowed; gaps meeting at the same virtual
    /// position are merged.
    pub fn new(text: &str, kept: &[TextRange]) -> Result<Self, EngineError> {
        let real_len = TextSize::try_from(text.len())
            .map_err(|_| EngineError::InvalidGapRanges("document too large".to_string()))?;
        let mut virtual_text = String::new();
        let mut starts = Vec::with_capacity(kept.len());
        let mut gaps: Vec<Gap> = Vec::with_capacity(kept.len() + 1);
        let mut real_pos = TextSize::default();

        for (index, range) in kept.iter().enumerate() {
            if range.start() < real_pos {
                return Err(EngineError::InvalidGapRanges(format!(
                    "range {index} ({range:?}) overlaps or precedes the previous range"
                )));
            }
            let Some(slice) = text.get(std::ops::Range::<usize>::from(*range)) else {
                return Err(EngineError::InvalidGapRanges(format!(
                    "range {index} ({range:?}) is outside the text or splits a character"
                )));
            };
            let virtual_offset = virtual_len(&virtual_text);
            if real_pos < range.start() {
                push_gap(
                    &mut gaps,
                    text,
                    virtual_offset,
                    TextRange::new(real_pos, range.start()),
                );
            }
            starts.push(virtual_offset);
            virtual_text.push_str(slice);
            real_pos = range.end();
        }
        if real_pos < real_len {
            push_gap(
                &mut gaps,
                text,
                virtual_len(&virtual_text),
                TextRange::new(real_pos, real_len),
            );
        }

        Ok(Self {
            virtual_text,
            kept: kept.to_vec(),
            starts,
            gaps,
            real_len,
        })
    }

    /// Returns the text the grammar sees.
    #[must_use]
    pub fn virtual_text(&self) -> &str {
        &self.virtual_text
    }

    /// Returns the kept ranges.
    #[must_use]
    pub fn kept(&self) -> &[TextRange] {
        &self.kept
    }

    /// Returns the dropped ranges, in document order.
    #[must_use]
    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    /// Maps a virtual offset to the real document.
    ///
    /// An offset on the boundary of two kept ranges maps to the start of the
    /// later one; the end of the virtual text maps to the end of the last
    /// kept range.
    #[must_use]
    pub fn to_real(&self, offset: TextSize) -> TextSize {
        let index = self.starts.partition_point(|&start| start <= offset);
        let Some(index) = index.checked_sub(1) else {
            return offset;
        };
        let range = self.kept[index];
        let within = offset - self.starts[index];
        range.start() + within.min(range.len())
    }

    /// Returns the real document length.
    #[must_use]
    pub fn real_len(&self) -> TextSize {
        self.real_len
    }

    /// Splices the gaps into a tree of the virtual text.
    pub fn inject(&self, tree: &GreenNode) -> Result<GreenNode, EngineError> {
        GapInjector::new().inject_gaps(self, tree)
    }
}

fn virtual_len(text: &str) -> TextSize {
    TextSize::of(text)
}

fn push_gap(gaps: &mut Vec<Gap>, text: &str, virtual_offset: TextSize, range: TextRange) {
    match gaps.last_mut() {
        Some(last) if last.virtual_offset == virtual_offset && last.range.end() == range.start() => {
            last.range = last.range.cover(range);
            last.text = SmolStr::new(&text[std::ops::Range::<usize>::from(last.range)]);
        }
        _ => gaps.push(Gap {
            virtual_offset,
            range,
            text: SmolStr::new(&text[std::ops::Range::<usize>::from(range)]),
        }),
    }
}

#[derive(Debug)]
struct Memo {
    /// Keeps the source node alive so its address is not reused.
    _source: GreenNode,
    gaps: Vec<(TextSize, SmolStr)>,
    result: GreenNode,
    /// Call in which the entry was last hit or stored.
    used: u64,
}

/// Splices gaps into virtual trees.
///
/// Rebuilt nodes are remembered by identity and virtual offset. Injecting a
/// later tree that shares subtrees with an earlier one, with the same gaps
/// inside those subtrees, returns the earlier results without walking them
/// again. Entries the latest call did not touch are dropped after it.
#[derive(Debug, Default)]
pub struct GapInjector {
    memo: FxHashMap<(usize, TextSize), Memo>,
    generation: u64,
}

impl GapInjector {
    /// Creates an injector with an empty memo.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every remembered node.
    pub fn clear(&mut self) {
        self.memo.clear();
    }

    /// Returns a tree of the real document of `document`.
    ///
    /// `tree` must span exactly the virtual text. Every gap is consumed: it
    /// becomes a [`NodeKind::GAP`] token in the deepest node strictly
    /// containing its position, or splits the token it falls into. Gaps at
    /// the very start or end go to the root.
    pub fn inject_gaps(
        &mut self,
        document: &GappedDocument,
        tree: &GreenNode,
    ) -> Result<GreenNode, EngineError> {
        let covered = virtual_len(&document.virtual_text);
        if tree.text_len() != covered {
            return Err(EngineError::GapRangesExhausted {
                tree_len: tree.text_len(),
                covered,
            });
        }
        let gaps = &document.gaps;
        let mut cursor = 0;
        self.generation += 1;
        let root = self.node(gaps, tree, TextSize::default(), &mut cursor, true);
        let generation = self.generation;
        self.memo.retain(|_, memo| memo.used == generation);
        let root = root?;
        if cursor < gaps.len() {
            return Err(EngineError::GapsUnconsumed(gaps.len() - cursor));
        }
        trace!(gaps = gaps.len(), memo = self.memo.len(), "injected gaps");
        Ok(root)
    }

    fn node(
        &mut self,
        gaps: &[Gap],
        node: &GreenNodeData,
        start: TextSize,
        cursor: &mut usize,
        is_root: bool,
    ) -> Result<GreenNode, EngineError> {
        let end = start + node.text_len();
        let inside = gaps[*cursor..]
            .iter()
            .take_while(|gap| gap.virtual_offset < end || (is_root && gap.virtual_offset == end))
            .count();
        if inside == 0 {
            return Ok(node.to_owned());
        }

        let key = (std::ptr::from_ref(node).cast::<()>() as usize, start);
        let signature: Vec<(TextSize, SmolStr)> = gaps[*cursor..*cursor + inside]
            .iter()
            .map(|gap| (gap.virtual_offset, gap.text.clone()))
            .collect();
        if let Some(memo) = self.memo.get_mut(&key) {
            if memo.gaps == signature {
                memo.used = self.generation;
                *cursor += inside;
                return Ok(memo.result.clone());
            }
        }

        let mut children: Vec<GreenElement> = Vec::new();
        let mut offset = start;
        for child in node.children() {
            if offset > start || is_root {
                take_gaps_at(gaps, cursor, offset, &mut children);
            }
            let child_end = offset
                + match child {
                    NodeOrToken::Node(inner) => inner.text_len(),
                    NodeOrToken::Token(token) => token.text_len(),
                };
            match child {
                NodeOrToken::Node(inner) => {
                    let crossing = gaps
                        .get(*cursor)
                        .is_some_and(|gap| gap.virtual_offset < child_end);
                    if crossing {
                        let rebuilt = self.node(gaps, inner, offset, cursor, false)?;
                        children.push(NodeOrToken::Node(rebuilt));
                    } else {
                        children.push(NodeOrToken::Node(inner.to_owned()));
                    }
                }
                NodeOrToken::Token(token) => {
                    let mut piece = offset;
                    while let Some(gap) = gaps
                        .get(*cursor)
                        .filter(|gap| gap.virtual_offset > offset && gap.virtual_offset < child_end)
                    {
                        let text = &token.text()[range_in(piece, gap.virtual_offset, offset)];
                        children.push(NodeOrToken::Token(GreenToken::new(token.kind(), text)));
                        children.push(gap_token(gap));
                        piece = gap.virtual_offset;
                        *cursor += 1;
                    }
                    if piece == offset {
                        children.push(NodeOrToken::Token(token.to_owned()));
                    } else {
                        let text = &token.text()[range_in(piece, child_end, offset)];
                        children.push(NodeOrToken::Token(GreenToken::new(token.kind(), text)));
                    }
                }
            }
            offset = child_end;
        }
        if is_root {
            take_gaps_at(gaps, cursor, end, &mut children);
        }

        let result = GreenNode::new(node.kind(), children);
        self.memo.insert(
            key,
            Memo {
                _source: node.to_owned(),
                gaps: signature,
                result: result.clone(),
                used: self.generation,
            },
        );
        Ok(result)
    }
}

fn take_gaps_at(gaps: &[Gap], cursor: &mut usize, at: TextSize, children: &mut Vec<GreenElement>) {
    while let Some(gap) = gaps.get(*cursor).filter(|gap| gap.virtual_offset == at) {
        children.push(gap_token(gap));
        *cursor += 1;
    }
}

fn gap_token(gap: &Gap) -> GreenElement {
    NodeOrToken::Token(GreenToken::new(NodeKind::GAP.into(), &gap.text))
}

fn range_in(from: TextSize, to: TextSize, base: TextSize) -> std::ops::Range<usize> {
    usize::from(from - base)..usize::from(to - base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{same_node, SyntaxNode};

    fn range(start: u32, end: u32) -> TextRange {
        TextRange::new(start.into(), end.into())
    }

    fn token(kind: u16, text: &str) -> GreenElement {
        NodeOrToken::Token(GreenToken::new(NodeKind(kind).into(), text))
    }

    fn node(kind: u16, children: Vec<GreenElement>) -> GreenNode {
        GreenNode::new(NodeKind(kind).into(), children)
    }

    fn dump(green: &GreenNode) -> Vec<String> {
        SyntaxNode::new_root(green.clone())
            .descendants_with_tokens()
            .map(|element| match element {
                NodeOrToken::Node(node) => format!("{}@{:?}", node.kind().0, node.text_range()),
                NodeOrToken::Token(token) => {
                    format!("{}@{:?} {:?}", token.kind().0, token.text_range(), token.text())
                }
            })
            .collect()
    }

    #[test]
    fn test_document_virtual_text_and_gaps() {
        let doc = GappedDocument::new("ab<x>cd<y>", &[range(0, 2), range(5, 7)]).expect("valid");
        assert_eq!(doc.virtual_text(), "abcd");
        let gaps: Vec<_> = doc
            .gaps()
            .iter()
            .map(|gap| (u32::from(gap.virtual_offset), gap.text.as_str()))
            .collect();
        assert_eq!(gaps, vec![(2, "<x>"), (4, "<y>")]);
        assert_eq!(doc.to_real(1.into()), TextSize::from(1));
        assert_eq!(doc.to_real(2.into()), TextSize::from(5));
        assert_eq!(doc.to_real(4.into()), TextSize::from(7));
    }

    #[test]
    fn test_empty_kept_ranges_merge_gaps() {
        let doc = GappedDocument::new("ab--cd", &[range(0, 2), range(3, 3), range(4, 6)]).expect("valid");
        assert_eq!(doc.virtual_text(), "abcd");
        assert_eq!(doc.gaps().len(), 1);
        assert_eq!(doc.gaps()[0].range, range(2, 4));
    }

    #[test]
    fn test_invalid_kept_ranges() {
        assert!(GappedDocument::new("abc", &[range(1, 2), range(0, 1)]).is_err());
        assert!(GappedDocument::new("abc", &[range(0, 9)]).is_err());
        assert!(GappedDocument::new("é", &[range(0, 1)]).is_err());
    }

    #[test]
    fn test_gap_at_child_boundary_and_inside_token() {
        // Virtual "abcd": root[ node5["ab"], token6 "cd" ].
        let tree = node(0, vec![NodeOrToken::Node(node(5, vec![token(7, "ab")])), token(6, "cd")]);
        let doc = GappedDocument::new("a_b|cd", &[range(0, 1), range(2, 3), range(4, 6)]).expect("valid");
        let real = doc.inject(&tree).expect("consistent");
        assert_eq!(
            dump(&real),
            vec![
                "0@0..6",
                "5@0..3",
                "7@0..1 \"a\"",
                "3@1..2 \"_\"",
                "7@2..3 \"b\"",
                "3@3..4 \"|\"",
                "6@4..6 \"cd\"",
            ]
        );
    }

    #[test]
    fn test_leading_and_trailing_gaps_go_to_root() {
        let tree = node(0, vec![NodeOrToken::Node(node(5, vec![token(7, "ab")]))]);
        let doc = GappedDocument::new("[ab]", &[range(1, 3)]).expect("valid");
        let real = doc.inject(&tree).expect("consistent");
        assert_eq!(
            dump(&real),
            vec!["0@0..4", "3@0..1 \"[\"", "5@1..3", "7@1..3 \"ab\"", "3@3..4 \"]\""]
        );
        // The untouched child is shared, not rebuilt.
        let Some(NodeOrToken::Node(before)) = tree.children().next() else {
            panic!("node child");
        };
        let Some(NodeOrToken::Node(after)) = real.children().nth(1) else {
            panic!("node child");
        };
        assert!(same_node(before, after));
    }

    #[test]
    fn test_length_mismatch_fails() {
        let tree = node(0, vec![token(6, "abc")]);
        let doc = GappedDocument::new("ab", &[range(0, 2)]).expect("valid");
        assert!(matches!(
            doc.inject(&tree),
            Err(EngineError::GapRangesExhausted { .. })
        ));
    }

    #[test]
    fn test_memo_reuses_rebuilt_subtrees() {
        let inner = node(5, vec![token(7, "ab")]);
        let first = node(0, vec![NodeOrToken::Node(inner.clone())]);
        let doc = GappedDocument::new("a-b", &[range(0, 1), range(2, 3)]).expect("valid");
        let mut injector = GapInjector::new();
        let a = injector.inject_gaps(&doc, &first).expect("consistent");
        let second = node(0, vec![NodeOrToken::Node(inner)]);
        let b = injector.inject_gaps(&doc, &second).expect("consistent");
        let (Some(NodeOrToken::Node(x)), Some(NodeOrToken::Node(y))) =
            (a.children().next(), b.children().next())
        else {
            panic!("node children");
        };
        assert!(same_node(x, y));
    }

    #[test]
    fn test_memo_drops_untouched_entries() {
        let inner = node(5, vec![token(7, "ab")]);
        let first = node(0, vec![NodeOrToken::Node(inner.clone())]);
        let doc = GappedDocument::new("a-b", &[range(0, 1), range(2, 3)]).expect("valid");
        let mut injector = GapInjector::new();
        injector.inject_gaps(&doc, &first).expect("consistent");
        assert_eq!(injector.memo.len(), 2);

        let unrelated = node(0, vec![NodeOrToken::Node(node(5, vec![token(7, "ab")]))]);
        injector.inject_gaps(&doc, &unrelated).expect("consistent");
        assert_eq!(injector.memo.len(), 2);
        assert!(!injector
            .memo
            .values()
            .any(|memo| same_node(&memo._source, &first) || same_node(&memo._source, &inner)));

        injector.clear();
        assert!(injector.memo.is_empty());
    }
}
