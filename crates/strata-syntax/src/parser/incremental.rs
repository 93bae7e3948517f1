//! Incremental reparsing.
//!
//! An edit is described by [`ChangedRange`]s. Each change is widened to a
//! dirty region that starts at the last line start before it where the
//! previous parse recorded a checkpoint. Everything before the first dirty
//! region is replayed from the previous tree. After a region, the session
//! tokenizes until it reaches a line start whose stack equals the previous
//! parse's checkpoint at the matching old position; from there the previous
//! tree is replayed again up to the next region.

use text_size::TextSize;

use super::{Checkpoint, Parse, TreeBuilder};
use crate::error::EngineError;
use crate::syntax::{NodeKind, SyntaxElement, SyntaxNode};
use rowan::NodeOrToken;

/// One change between the previous and the current text.
///
/// `from_a..to_a` is the replaced range in the previous text, `from_b..to_b`
/// the replacement in the current text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedRange {
    /// Start in the previous text.
    pub from_a: TextSize,
    /// End in the previous text.
    pub to_a: TextSize,
    /// Start in the current text.
    pub from_b: TextSize,
    /// End in the current text.
    pub to_b: TextSize,
}

impl ChangedRange {
    /// Creates a change.
    #[must_use]
    pub fn new(from_a: TextSize, to_a: TextSize, from_b: TextSize, to_b: TextSize) -> Self {
        Self {
            from_a,
            to_a,
            from_b,
            to_b,
        }
    }

    /// Describes a single edit replacing `from..to` with `inserted_len` bytes.
    #[must_use]
    pub fn edit(from: TextSize, to: TextSize, inserted_len: TextSize) -> Self {
        Self::new(from, to, from, from + inserted_len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirtyRegion {
    pub(crate) old_start: usize,
    pub(crate) new_start: usize,
    pub(crate) old_end: usize,
    pub(crate) new_end: usize,
    /// `new - old` past the region.
    pub(crate) delta: isize,
}

pub(crate) fn validate(
    changes: &[ChangedRange],
    old_len: usize,
    new_len: usize,
) -> Result<(), EngineError> {
    let mut delta: isize = 0;
    let mut prev_a = 0usize;
    let mut prev_b = 0usize;
    for (index, change) in changes.iter().enumerate() {
        let (from_a, to_a) = (usize::from(change.from_a), usize::from(change.to_a));
        let (from_b, to_b) = (usize::from(change.from_b), usize::from(change.to_b));
        let invalid = |reason: &str| {
            EngineError::InvalidChangedRanges(format!("change {index}: {reason}"))
        };
        if from_a > to_a || from_b > to_b {
            return Err(invalid("range ends before it starts"));
        }
        if from_a < prev_a || from_b < prev_b {
            return Err(invalid("ranges are unsorted or overlapping"));
        }
        if to_a > old_len || to_b > new_len {
            return Err(invalid("range exceeds the text"));
        }
        if signed(from_b) - signed(from_a) != delta {
            return Err(invalid("start is inconsistent with the preceding changes"));
        }
        delta = signed(to_b) - signed(to_a);
        prev_a = to_a;
        prev_b = to_b;
    }
    if signed(old_len) + delta != signed(new_len) {
        return Err(EngineError::InvalidChangedRanges(format!(
            "changes map a text of length {old_len} to {}, not {new_len}",
            signed(old_len) + delta
        )));
    }
    Ok(())
}

/// Widens validated changes to dirty regions, merging regions that touch.
pub(crate) fn dirty_regions(changes: &[ChangedRange], checkpoints: &[Checkpoint]) -> Vec<DirtyRegion> {
    let mut regions: Vec<DirtyRegion> = Vec::with_capacity(changes.len());
    let mut delta: isize = 0;
    for change in changes {
        let from_a = usize::from(change.from_a);
        let old_start = restart_before(checkpoints, from_a);
        let old_end = usize::from(change.to_a);
        let new_end = usize::from(change.to_b);
        let after = signed(new_end) - signed(old_end);
        match regions.last_mut() {
            Some(last) if old_start <= last.old_end => {
                last.old_end = old_end;
                last.new_end = new_end;
                last.delta = after;
            }
            _ => regions.push(DirtyRegion {
                old_start,
                new_start: shift(old_start, delta),
                old_end,
                new_end,
                delta: after,
            }),
        }
        delta = after;
    }
    regions
}

fn restart_before(checkpoints: &[Checkpoint], pos: usize) -> usize {
    let index = checkpoints.partition_point(|checkpoint| usize::from(checkpoint.pos) <= pos);
    index
        .checked_sub(1)
        .map_or(0, |index| usize::from(checkpoints[index].pos))
}

fn signed(value: usize) -> isize {
    value as isize
}

pub(crate) fn shift(pos: usize, delta: isize) -> usize {
    (signed(pos) + delta) as usize
}

/// Where the next replay may start and end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplayPlan {
    pub(crate) old_pos: usize,
    /// Old position to replay up to; `None` replays to the end.
    pub(crate) target: Option<usize>,
    pub(crate) delta: isize,
}

/// The previous parse and the dirty regions of one incremental session.
#[derive(Debug)]
pub(crate) struct Reuse {
    pub(crate) old: Parse,
    regions: Vec<DirtyRegion>,
    cursor: usize,
}

impl Reuse {
    pub(crate) fn new(old: Parse, regions: Vec<DirtyRegion>) -> Self {
        Self {
            old,
            regions,
            cursor: 0,
        }
    }

    /// Plans a replay from the line start `pos` of the current text.
    ///
    /// Returns `None` while `pos` is still inside a dirty region.
    pub(crate) fn plan(&mut self, pos: usize) -> Option<ReplayPlan> {
        while self
            .regions
            .get(self.cursor)
            .is_some_and(|region| region.new_start <= pos)
        {
            self.cursor += 1;
        }
        let delta = match self.cursor.checked_sub(1).map(|index| &self.regions[index]) {
            Some(region) if pos < region.new_end => return None,
            Some(region) => region.delta,
            None => 0,
        };
        let old_pos = signed(pos) - delta;
        if old_pos < 0 {
            return None;
        }
        Some(ReplayPlan {
            old_pos: old_pos as usize,
            target: self.regions.get(self.cursor).map(|region| region.old_start),
            delta,
        })
    }

    pub(crate) fn checkpoint(&self, pos: usize) -> Option<&Checkpoint> {
        let pos = TextSize::try_from(pos).ok()?;
        self.old.checkpoint_at(pos)
    }

    /// Old checkpoints strictly between `from` and `to`.
    pub(crate) fn checkpoints_between(&self, from: usize, to: Option<usize>) -> &[Checkpoint] {
        let checkpoints = self.old.checkpoints();
        let start = checkpoints.partition_point(|checkpoint| usize::from(checkpoint.pos) <= from);
        let end = to.map_or(checkpoints.len(), |to| {
            checkpoints.partition_point(|checkpoint| usize::from(checkpoint.pos) < to)
        });
        &checkpoints[start..end.max(start)]
    }
}

/// Tells whether a kind is the end element of a scope.
pub(crate) type EndKinds<'a> = &'a dyn Fn(NodeKind) -> bool;

/// A node is settled at `at` once nothing at or after `at` can add to it.
///
/// A scope ending at `at` is still open there when its last child is an
/// empty end or the force-close marker, both added at `at`.
fn is_settled(node: &SyntaxNode, at: usize, is_end: EndKinds<'_>) -> bool {
    let end = usize::from(node.text_range().end());
    end < at
        || (end == at
            && !node.last_child_or_token().is_some_and(|last| {
                last.text_range().is_empty()
                    && (last.kind() == NodeKind::UNTERMINATED || is_end(last.kind()))
            }))
}

fn is_open_at(node: &SyntaxNode, at: usize, is_end: EndKinds<'_>) -> bool {
    usize::from(node.text_range().start()) < at && !is_settled(node, at, is_end)
}

/// Kinds of the nodes open at the line start `at`, the root first.
pub(crate) fn open_path(root: &SyntaxNode, at: usize, is_end: EndKinds<'_>) -> Vec<NodeKind> {
    let mut path = vec![root.kind()];
    let mut node = root.clone();
    while let Some(child) = node.children().find(|child| is_open_at(child, at, is_end)) {
        path.push(child.kind());
        node = child;
    }
    path
}

/// Replays the old tree from the line start `from` up to `to` into `builder`.
///
/// The builder must hold the nodes open at `from`. On return it holds the
/// nodes open at `to`; with `to == None` the whole tree is closed and `true`
/// is returned.
pub(crate) fn replay(
    root: &SyntaxNode,
    from: usize,
    to: Option<usize>,
    builder: &mut TreeBuilder,
    is_end: EndKinds<'_>,
) -> Result<bool, EngineError> {
    replay_node(root, from, to, builder, is_end)
}

fn replay_node(
    node: &SyntaxNode,
    from: usize,
    to: Option<usize>,
    builder: &mut TreeBuilder,
    is_end: EndKinds<'_>,
) -> Result<bool, EngineError> {
    for child in node.children_with_tokens() {
        let start = usize::from(child.text_range().start());
        if start < from {
            // Built before `from`, unless it is still open there.
            if let NodeOrToken::Node(inner) = &child {
                if is_open_at(inner, from, is_end) && !replay_node(inner, from, to, builder, is_end)? {
                    return Ok(false);
                }
            }
            continue;
        }
        if to.is_some_and(|to| start >= to) {
            return Ok(false);
        }
        match child {
            SyntaxElement::Token(token) => {
                builder.push(NodeOrToken::Token(token.green().to_owned()));
            }
            SyntaxElement::Node(inner) => {
                if to.is_none_or(|to| is_settled(&inner, to, is_end)) {
                    builder.push(NodeOrToken::Node(inner.green().into_owned()));
                } else {
                    builder.start_node(inner.kind());
                    if !replay_node(&inner, start, to, builder, is_end)? {
                        return Ok(false);
                    }
                }
            }
        }
    }
    builder.finish_node()?;
    Ok(true)
}
