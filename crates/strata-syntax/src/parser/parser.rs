//! Main parser implementation.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use rowan::NodeOrToken;
use rustc_hash::FxHashMap;
use text_size::{TextRange, TextSize};
use tracing::{debug, trace, warn};

use crate::error::EngineError;
use crate::grammar::rule::{substitute_backrefs, Capture, Captures, EndPattern, Rule, ScopeRule};
use crate::grammar::{Grammar, NodeRole, RuleId, RuleListId};
use crate::parser::incremental::{self, Reuse};
use crate::parser::sink::TreeBuilder;
use crate::parser::source::{PatternKey, Scanner};
use crate::parser::stack::{
    DynamicEnd, FrameEnd, GrammarStack, GrammarStackElement, NodeHandle, StackError,
};
use crate::parser::{ChangedRange, Checkpoint, Parse, ParseConfig, Progress};
use crate::syntax::NodeKind;

/// Nesting limit for capture patterns tokenized inside captures.
const MAX_CAPTURE_DEPTH: usize = 16;

/// What a winning match does.
#[derive(Debug, Clone, Copy)]
enum Action {
    /// Apply a `match` or `begin` rule.
    Rule(RuleId),
    /// Close the frame at this index, force-closing the frames above it.
    End(usize),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: usize,
    end: usize,
    action: Action,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    capture: Capture,
}

/// Executes rules over one range of text.
///
/// Positions are byte offsets into `text`. The tokenizer never reads past
/// `limit`.
struct Tokenizer<'g, 't, T> {
    grammar: &'g Grammar<T>,
    text: &'t str,
    limit: usize,
    pos: usize,
    stack: GrammarStack,
    builder: TreeBuilder,
    scanner: Scanner<'t>,
    dynamic: FxHashMap<String, Arc<DynamicEnd>>,
    depth: usize,
}

impl<'g, 't, T> Tokenizer<'g, 't, T> {
    fn new(
        grammar: &'g Grammar<T>,
        text: &'t str,
        range: (usize, usize),
        root: NodeKind,
        rules: RuleListId,
        depth: usize,
    ) -> Self {
        let (pos, limit) = range;
        let mut builder = TreeBuilder::new();
        let slot = builder.start_node(root);
        let mut stack = GrammarStack::new();
        stack.push(GrammarStackElement {
            node: NodeHandle { slot, kind: root },
            rules,
            end: None,
        });
        Self {
            grammar,
            text,
            limit,
            pos,
            stack,
            builder,
            scanner: Scanner::new(text, limit),
            dynamic: FxHashMap::default(),
            depth,
        }
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.text.as_bytes().get(self.pos - 1) == Some(&b'\n')
    }

    /// Makes one decision at the current position.
    fn step(&mut self) -> Result<(), EngineError> {
        let line_end = self.scanner.line_end(self.pos);
        match self.select(line_end)? {
            None => {
                self.text_token(self.pos, line_end);
                self.pos = line_end;
            }
            Some(candidate) => {
                self.text_token(self.pos, candidate.start);
                self.apply(candidate, line_end)?;
            }
        }
        Ok(())
    }

    /// Runs to the limit and closes every frame.
    fn run(&mut self) -> Result<(), EngineError> {
        while self.pos < self.limit {
            self.step()?;
        }
        self.close_at_limit()
    }

    /// Finds the earliest candidate on the current line.
    ///
    /// Candidates are tried in priority order and a later one only wins by
    /// starting strictly earlier.
    fn select(&mut self, line_end: usize) -> Result<Option<Candidate>, EngineError> {
        let grammar = self.grammar;
        let pos = self.pos;
        let top_index = self.stack.len().checked_sub(1).ok_or(StackError::Underflow)?;
        let top = self.stack.get(top_index).ok_or(StackError::Underflow)?;
        let apply_end_last = top
            .end
            .as_ref()
            .and_then(|end| grammar.scope(end.rule))
            .is_some_and(|scope| scope.apply_end_last);

        let mut best: Option<Candidate> = None;
        let offer = |best: &mut Option<Candidate>, found: Option<(usize, usize)>, action: Action| {
            if let Some((start, end)) = found {
                if best.is_none_or(|current| start < current.start) {
                    *best = Some(Candidate { start, end, action });
                }
            }
            best.is_some_and(|current| current.start == pos)
        };

        if !apply_end_last {
            let found = find_end(grammar, &mut self.scanner, top, pos, line_end);
            if offer(&mut best, found, Action::End(top_index)) {
                return Ok(best);
            }
        }

        for index in (1..top_index).rev() {
            let Some(frame) = self.stack.get(index) else {
                continue;
            };
            let closes_nested = frame
                .end
                .as_ref()
                .and_then(|end| grammar.scope(end.rule))
                .is_some_and(|scope| scope.close_nested);
            if closes_nested {
                let found = find_end(grammar, &mut self.scanner, frame, pos, line_end);
                if offer(&mut best, found, Action::End(index)) {
                    return Ok(best);
                }
            }
        }

        for &rule in grammar.candidates(top.rules) {
            let regex = match grammar.rule(rule) {
                Rule::Match(rule) => &rule.regex,
                Rule::Scope(scope) => &scope.begin,
            };
            let found = self
                .scanner
                .find(PatternKey::Rule(rule), regex, pos, line_end, false);
            if offer(&mut best, found, Action::Rule(rule)) {
                return Ok(best);
            }
        }

        if apply_end_last {
            let found = find_end(grammar, &mut self.scanner, top, pos, line_end);
            offer(&mut best, found, Action::End(top_index));
        }

        Ok(best)
    }

    fn apply(&mut self, candidate: Candidate, line_end: usize) -> Result<(), EngineError> {
        let grammar = self.grammar;
        let text = self.text;
        let haystack = &text[..line_end];
        match candidate.action {
            Action::Rule(id) => match grammar.rule(id) {
                Rule::Match(rule) => self.element(
                    rule.kind,
                    &rule.captures,
                    &rule.regex,
                    haystack,
                    (candidate.start, candidate.end),
                )?,
                Rule::Scope(scope) => self.open_scope(id, scope, haystack, candidate)?,
            },
            Action::End(index) => self.close_scope(index, haystack, candidate)?,
        }
        self.pos = candidate.end;
        Ok(())
    }

    fn open_scope(
        &mut self,
        id: RuleId,
        scope: &ScopeRule,
        haystack: &str,
        candidate: Candidate,
    ) -> Result<(), EngineError> {
        let dynamic = match &scope.end {
            EndPattern::Static(_) => None,
            EndPattern::Dynamic(template) => {
                Some(self.dynamic_end(template, &scope.begin, haystack, candidate.start)?)
            }
        };
        let slot = self.builder.start_node(scope.kind);
        self.element(
            scope.begin_kind,
            &scope.begin_captures,
            &scope.begin,
            haystack,
            (candidate.start, candidate.end),
        )?;
        self.stack.push(GrammarStackElement {
            node: NodeHandle {
                slot,
                kind: scope.kind,
            },
            rules: scope.patterns,
            end: Some(FrameEnd { rule: id, dynamic }),
        });
        Ok(())
    }

    fn close_scope(
        &mut self,
        index: usize,
        haystack: &str,
        candidate: Candidate,
    ) -> Result<(), EngineError> {
        let grammar = self.grammar;
        let end = self
            .stack
            .get(index)
            .and_then(|frame| frame.end.clone())
            .ok_or(EngineError::UnbalancedTree)?;
        let scope = grammar.scope(end.rule).ok_or(EngineError::UnbalancedTree)?;
        let regex = match (&end.dynamic, &scope.end) {
            (Some(dynamic), _) => &dynamic.regex,
            (None, EndPattern::Static(regex)) => regex,
            (None, EndPattern::Dynamic(_)) => return Err(EngineError::UnbalancedTree),
        };

        for _ in index + 1..self.stack.len() {
            self.unterminated()?;
        }
        self.element(
            scope.end_kind,
            &scope.end_captures,
            regex,
            haystack,
            (candidate.start, candidate.end),
        )?;
        self.builder.finish_node()?;
        self.stack.close(index)?;
        Ok(())
    }

    /// Closes the innermost open node, marking it unterminated.
    fn unterminated(&mut self) -> Result<(), EngineError> {
        self.builder.token(NodeKind::UNTERMINATED, "");
        self.builder.finish_node()
    }

    /// Tries zero-width ends at the limit, then force-closes what is left.
    fn close_at_limit(&mut self) -> Result<(), EngineError> {
        while let Some(index) = self.end_at_limit() {
            let candidate = Candidate {
                start: self.limit,
                end: self.limit,
                action: Action::End(index),
            };
            self.apply(candidate, self.limit)?;
        }
        while self.stack.len() > 1 {
            self.unterminated()?;
            self.stack.pop()?;
        }
        self.builder.finish_node()?;
        self.stack.pop()?;
        Ok(())
    }

    fn end_at_limit(&self) -> Option<usize> {
        let grammar = self.grammar;
        let top = self.stack.len().checked_sub(1)?;
        (1..=top).rev().find(|&index| {
            let Some(end) = self.stack.get(index).and_then(|frame| frame.end.as_ref()) else {
                return false;
            };
            let Some(scope) = grammar.scope(end.rule) else {
                return false;
            };
            if index != top && !scope.close_nested {
                return false;
            }
            match (&end.dynamic, &scope.end) {
                (Some(dynamic), _) => self.scanner.find_at_limit(&dynamic.regex),
                (None, EndPattern::Static(regex)) => self.scanner.find_at_limit(regex),
                (None, EndPattern::Dynamic(_)) => false,
            }
        })
    }

    fn text_token(&mut self, from: usize, to: usize) {
        if from < to {
            self.builder.token(NodeKind::TEXT, &self.text[from..to]);
        }
    }

    /// Emits a matched element: a token, or a node when captures apply.
    fn element(
        &mut self,
        kind: NodeKind,
        captures: &Captures,
        regex: &Regex,
        haystack: &str,
        (start, end): (usize, usize),
    ) -> Result<(), EngineError> {
        let spans = if captures.is_empty() || start == end {
            Vec::new()
        } else {
            capture_spans(captures, regex, haystack, start, end)
        };
        if spans.is_empty() {
            self.builder.token(kind, &self.text[start..end]);
            return Ok(());
        }
        self.builder.start_node(kind);
        self.spans(&spans, start, end)?;
        self.builder.finish_node()
    }

    /// Emits sorted capture spans between `from` and `to`.
    ///
    /// A span nests the spans it contains; spans overlapping a previous
    /// sibling are dropped.
    fn spans(&mut self, spans: &[Span], from: usize, to: usize) -> Result<(), EngineError> {
        let mut at = from;
        let mut index = 0;
        while index < spans.len() {
            let span = spans[index];
            let mut next = index + 1;
            while next < spans.len() && spans[next].end <= span.end {
                next += 1;
            }
            if span.start >= at {
                self.text_token(at, span.start);
                let nested = &spans[index + 1..next];
                match span.capture.patterns {
                    Some(list) if self.depth < MAX_CAPTURE_DEPTH => {
                        let node = self.sub_parse(span.capture.kind, list, span.start, span.end)?;
                        self.builder.push(NodeOrToken::Node(node));
                    }
                    _ if !nested.is_empty() => {
                        self.builder.start_node(span.capture.kind);
                        self.spans(nested, span.start, span.end)?;
                        self.builder.finish_node()?;
                    }
                    patterns => {
                        if patterns.is_some() {
                            trace!(depth = self.depth, "capture nesting limit reached");
                        }
                        self.builder
                            .token(span.capture.kind, &self.text[span.start..span.end]);
                    }
                }
                at = span.end;
            }
            index = next;
        }
        self.text_token(at, to);
        Ok(())
    }

    /// Tokenizes a captured span with the capture's own patterns.
    fn sub_parse(
        &self,
        kind: NodeKind,
        rules: RuleListId,
        start: usize,
        end: usize,
    ) -> Result<rowan::GreenNode, EngineError> {
        let mut inner = Tokenizer::new(
            self.grammar,
            self.text,
            (start, end),
            kind,
            rules,
            self.depth + 1,
        );
        inner.run()?;
        inner.builder.finish()
    }

    fn dynamic_end(
        &mut self,
        template: &str,
        begin: &Regex,
        haystack: &str,
        start: usize,
    ) -> Result<Arc<DynamicEnd>, EngineError> {
        let captures = begin
            .captures_at(haystack, start)
            .filter(|captures| captures.get(0).is_some_and(|m| m.start() == start));
        let source = substitute_backrefs(template, |group| {
            captures
                .as_ref()
                .and_then(|captures| captures.get(group))
                .map(|m| m.as_str())
        });
        if let Some(end) = self.dynamic.get(&source) {
            return Ok(end.clone());
        }
        let regex = RegexBuilder::new(&source)
            .multi_line(true)
            .build()
            .map_err(|err| EngineError::InvalidDynamicEnd {
                pattern: source.clone(),
                source: err,
            })?;
        let end = Arc::new(DynamicEnd::new(source.clone(), regex));
        self.dynamic.insert(source, end.clone());
        Ok(end)
    }
}

fn find_end<T>(
    grammar: &Grammar<T>,
    scanner: &mut Scanner<'_>,
    frame: &GrammarStackElement,
    pos: usize,
    line_end: usize,
) -> Option<(usize, usize)> {
    let end = frame.end.as_ref()?;
    if let Some(dynamic) = &end.dynamic {
        return scanner.find_uncached(&dynamic.regex, pos, line_end, true);
    }
    match &grammar.scope(end.rule)?.end {
        EndPattern::Static(regex) => {
            scanner.find(PatternKey::End(end.rule), regex, pos, line_end, true)
        }
        EndPattern::Dynamic(_) => None,
    }
}

fn capture_spans(
    captures: &Captures,
    regex: &Regex,
    haystack: &str,
    start: usize,
    end: usize,
) -> Vec<Span> {
    let Some(groups) = regex
        .captures_at(haystack, start)
        .filter(|groups| groups.get(0).is_some_and(|m| m.start() == start))
    else {
        return Vec::new();
    };
    let mut spans: Vec<Span> = captures
        .iter()
        .filter_map(|capture| {
            let m = groups.get(capture.group)?;
            (!m.is_empty() && m.start() >= start && m.end() <= end).then_some(Span {
                start: m.start(),
                end: m.end(),
                capture: *capture,
            })
        })
        .collect();
    spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    spans
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    /// The previous tree was replayed through end of input.
    Replayed,
    Finished,
}

/// A resumable parse of one text.
///
/// A session owns its stack and tree builder; the grammar is only read.
/// Call [`advance`](Self::advance) until it reports
/// [`Progress::Done`], or [`finish`](Self::finish) to run to completion.
pub struct ParseSession<'g, 't, T> {
    tokenizer: Tokenizer<'g, 't, T>,
    config: ParseConfig,
    checkpoints: Vec<Checkpoint>,
    last_checkpoint: Option<usize>,
    reuse: Option<Reuse>,
    offset: TextSize,
    state: State,
}

impl<'g, 't, T> ParseSession<'g, 't, T> {
    /// Starts a fresh parse of `text`.
    #[must_use]
    pub fn new(grammar: &'g Grammar<T>, text: &'t str) -> Self {
        debug!(len = text.len(), "starting parse session");
        Self::start(grammar, text, TextSize::default())
    }

    /// Starts a parse of the sub-range `range` of `text`.
    pub fn with_range(
        grammar: &'g Grammar<T>,
        text: &'t str,
        range: TextRange,
    ) -> Result<Self, EngineError> {
        let slice = text
            .get(usize::from(range.start())..usize::from(range.end()))
            .ok_or_else(|| EngineError::InvalidRange {
                range,
                len: TextSize::try_from(text.len()).unwrap_or(TextSize::from(u32::MAX)),
            })?;
        debug!(?range, "starting ranged parse session");
        Ok(Self::start(grammar, slice, range.start()))
    }

    /// Starts a reparse of `text`, reusing `old` outside `changes`.
    ///
    /// `changes` are validated against the lengths of the previous tree and
    /// of `text`.
    pub fn incremental(
        grammar: &'g Grammar<T>,
        text: &'t str,
        old: &Parse,
        changes: &[ChangedRange],
    ) -> Result<Self, EngineError> {
        let old_len = usize::from(old.green().text_len());
        incremental::validate(changes, old_len, text.len())?;
        let regions = incremental::dirty_regions(changes, old.checkpoints());
        debug!(
            len = text.len(),
            changes = changes.len(),
            regions = regions.len(),
            "starting incremental parse session"
        );
        let mut session = Self::start(grammar, text, old.offset());
        session.reuse = Some(Reuse::new(old.clone(), regions));
        Ok(session)
    }

    fn start(grammar: &'g Grammar<T>, text: &'t str, offset: TextSize) -> Self {
        Self {
            tokenizer: Tokenizer::new(
                grammar,
                text,
                (0, text.len()),
                NodeKind::ROOT,
                grammar.root_list(),
                0,
            ),
            config: ParseConfig::default(),
            checkpoints: Vec::new(),
            last_checkpoint: None,
            reuse: None,
            offset,
            state: State::Running,
        }
    }

    /// Replaces the session settings.
    #[must_use]
    pub fn with_config(mut self, config: ParseConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the current position.
    #[must_use]
    pub fn position(&self) -> TextSize {
        to_size(self.tokenizer.pos)
    }

    /// Returns the execution stack.
    #[must_use]
    pub fn stack(&self) -> &GrammarStack {
        &self.tokenizer.stack
    }

    /// Returns `true` once the session finished or aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Runs at most `budget` steps.
    ///
    /// A replayed region counts as one step. After an error the session is
    /// finished; [`partial`](Self::partial) still returns the tree built so
    /// far.
    pub fn advance(&mut self) -> Result<Progress, EngineError> {
        if self.state == State::Finished {
            return Err(EngineError::SessionFinished);
        }
        match self.run_slice() {
            Ok(progress) => Ok(progress),
            Err(err) => {
                self.state = State::Finished;
                Err(err)
            }
        }
    }

    /// Runs the session to completion.
    pub fn finish(&mut self) -> Result<Parse, EngineError> {
        loop {
            if let Progress::Done(parse) = self.advance()? {
                return Ok(parse);
            }
        }
    }

    /// Returns a best-effort tree of the whole text at the current point.
    ///
    /// Text not yet in the tree is a single text token and open scopes are
    /// marked unterminated.
    #[must_use]
    pub fn partial(&self) -> Parse {
        let tokenizer = &self.tokenizer;
        let mut builder = tokenizer.builder.clone();
        let emitted = builder.text_len();
        if emitted < tokenizer.limit && builder.depth() > 0 {
            if let Some(rest) = tokenizer.text.get(emitted..tokenizer.limit) {
                builder.token(NodeKind::TEXT, rest);
            }
        }
        while builder.depth() > 1 {
            builder.token(NodeKind::UNTERMINATED, "");
            // Depth was checked above.
            let _ = builder.finish_node();
        }
        if builder.depth() == 1 {
            let _ = builder.finish_node();
        }
        let green = builder
            .finish()
            .unwrap_or_else(|_| rowan::GreenNode::new(NodeKind::ROOT.into(), Vec::new()));
        Parse::new(
            tokenizer.grammar,
            green,
            self.checkpoints.clone(),
            self.offset,
        )
    }

    fn run_slice(&mut self) -> Result<Progress, EngineError> {
        let budget = self.config.budget.max(1);
        for _ in 0..budget {
            if self.state == State::Replayed || self.tokenizer.pos >= self.tokenizer.limit {
                return self.complete().map(Progress::Done);
            }
            if self.tokenizer.at_line_start() && self.last_checkpoint != Some(self.tokenizer.pos) {
                self.checkpoint();
                if self.try_reuse()? {
                    continue;
                }
            }
            self.tokenizer.step()?;
        }
        Ok(Progress::Pending)
    }

    fn complete(&mut self) -> Result<Parse, EngineError> {
        if self.state != State::Replayed {
            self.tokenizer.close_at_limit()?;
        }
        self.state = State::Finished;
        let green = self.tokenizer.builder.finish()?;
        let checkpoints = std::mem::take(&mut self.checkpoints);
        debug!(checkpoints = checkpoints.len(), "parse session finished");
        Ok(Parse::new(
            self.tokenizer.grammar,
            green,
            checkpoints,
            self.offset,
        ))
    }

    fn checkpoint(&mut self) {
        let pos = self.tokenizer.pos;
        let stack = match self.checkpoints.last() {
            Some(last) if last.stack.equals(&self.tokenizer.stack) => last.stack.clone(),
            _ => Arc::new(self.tokenizer.stack.clone()),
        };
        self.checkpoints.push(Checkpoint {
            pos: to_size(pos),
            stack,
        });
        self.last_checkpoint = Some(pos);
    }

    /// Replays the previous tree from the current line start if the edit
    /// cannot have influenced what follows.
    fn try_reuse(&mut self) -> Result<bool, EngineError> {
        let pos = self.tokenizer.pos;
        let Some(reuse) = self.reuse.as_mut() else {
            return Ok(false);
        };
        let Some(plan) = reuse.plan(pos) else {
            return Ok(false);
        };
        let Some(from) = reuse.checkpoint(plan.old_pos) else {
            return Ok(false);
        };
        if !from.stack.equals(&self.tokenizer.stack) {
            trace!(pos, old_pos = plan.old_pos, "stack differs, no reuse");
            return Ok(false);
        }
        let target = match plan.target {
            Some(target) => match reuse.checkpoint(target) {
                Some(checkpoint) => Some(checkpoint.clone()),
                None => return Ok(false),
            },
            None => None,
        };

        let grammar = self.tokenizer.grammar;
        let is_end = |kind: NodeKind| grammar.role(kind) == Some(NodeRole::End);
        let old_root = reuse.old.syntax();
        let open_at_from = incremental::open_path(&old_root, plan.old_pos, &is_end);
        let consistent_from = open_at_from.iter().copied().eq(self.tokenizer.builder.open_kinds());
        let consistent_to = target.as_ref().is_none_or(|checkpoint| {
            let open_at_to = incremental::open_path(&old_root, usize::from(checkpoint.pos), &is_end);
            open_at_to
                .iter()
                .copied()
                .eq(checkpoint.stack.iter().map(|frame| frame.node.kind))
        });
        if !consistent_from || !consistent_to {
            warn!(
                pos,
                old_pos = plan.old_pos,
                "previous tree does not match its checkpoints, parsing instead"
            );
            return Ok(false);
        }

        let closed = incremental::replay(
            &old_root,
            plan.old_pos,
            plan.target,
            &mut self.tokenizer.builder,
            &is_end,
        )?;
        for checkpoint in reuse.checkpoints_between(plan.old_pos, plan.target) {
            self.checkpoints.push(Checkpoint {
                pos: to_size(incremental::shift(usize::from(checkpoint.pos), plan.delta)),
                stack: checkpoint.stack.clone(),
            });
        }
        match target {
            Some(checkpoint) => {
                let resume = incremental::shift(usize::from(checkpoint.pos), plan.delta);
                debug!(from = pos, to = resume, "replayed previous tree");
                self.tokenizer.stack = (*checkpoint.stack).clone();
                self.tokenizer.pos = resume;
            }
            None => {
                debug!(from = pos, "replayed previous tree to end of input");
                if !closed {
                    return Err(EngineError::UnbalancedTree);
                }
                self.tokenizer.stack = GrammarStack::new();
                self.tokenizer.pos = self.tokenizer.limit;
                self.state = State::Replayed;
            }
        }
        Ok(true)
    }
}

fn to_size(pos: usize) -> TextSize {
    TextSize::try_from(pos).unwrap_or(TextSize::from(u32::MAX))
}
