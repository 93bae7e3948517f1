//! Line-bounded pattern search.
//!
//! Every search at a position runs on the haystack that ends at the end of
//! that position's line, newline included. Matches never cross a line start,
//! so each decision depends only on the current line and the stack.

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::grammar::RuleId;

/// Cache key of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PatternKey {
    /// The `match` or `begin` pattern of a rule.
    Rule(RuleId),
    /// The static `end` pattern of a scope rule.
    End(RuleId),
}

#[derive(Debug, Clone, Copy)]
struct Search {
    from: usize,
    line_end: usize,
    found: Option<(usize, usize)>,
}

impl Search {
    /// The result of a search from `from` answers a search from `pos` as long
    /// as nothing was found before `pos`.
    fn answers(&self, pos: usize, line_end: usize) -> bool {
        self.line_end == line_end
            && self.from <= pos
            && self.found.is_none_or(|(start, _)| start >= pos)
    }
}

/// Pattern search over one text, with a per-pattern result cache.
pub(crate) struct Scanner<'t> {
    text: &'t str,
    limit: usize,
    line: Option<(usize, usize)>,
    cache: FxHashMap<PatternKey, Search>,
}

impl<'t> Scanner<'t> {
    pub(crate) fn new(text: &'t str, limit: usize) -> Self {
        Self {
            text,
            limit,
            line: None,
            cache: FxHashMap::default(),
        }
    }

    /// Returns the end of the line containing `pos`, newline included,
    /// capped at the limit.
    pub(crate) fn line_end(&mut self, pos: usize) -> usize {
        if let Some((start, end)) = self.line {
            if start <= pos && pos < end {
                return end;
            }
        }
        let end = self.text[pos..self.limit]
            .find('\n')
            .map_or(self.limit, |offset| pos + offset + 1);
        self.line = Some((pos, end));
        end
    }

    /// Searches a cached pattern.
    pub(crate) fn find(
        &mut self,
        key: PatternKey,
        regex: &Regex,
        pos: usize,
        line_end: usize,
        allow_empty: bool,
    ) -> Option<(usize, usize)> {
        if let Some(search) = self.cache.get(&key) {
            if search.answers(pos, line_end) {
                return search.found;
            }
        }
        let found = self.find_uncached(regex, pos, line_end, allow_empty);
        self.cache.insert(
            key,
            Search {
                from: pos,
                line_end,
                found,
            },
        );
        found
    }

    /// Searches without touching the cache.
    ///
    /// A match must start before `line_end`. Empty matches are skipped
    /// unless `allow_empty` is set.
    pub(crate) fn find_uncached(
        &self,
        regex: &Regex,
        pos: usize,
        line_end: usize,
        allow_empty: bool,
    ) -> Option<(usize, usize)> {
        let haystack = &self.text[..line_end];
        let mut at = pos;
        while at < line_end {
            let found = regex.find_at(haystack, at)?;
            if found.start() >= line_end {
                return None;
            }
            if allow_empty || !found.is_empty() {
                return Some((found.start(), found.end()));
            }
            at = found.start() + char_len(haystack, found.start());
        }
        None
    }

    /// Searches for a zero-width match exactly at the limit.
    pub(crate) fn find_at_limit(&self, regex: &Regex) -> bool {
        regex
            .find_at(&self.text[..self.limit], self.limit)
            .is_some_and(|found| found.start() == self.limit)
    }
}

fn char_len(text: &str, at: usize) -> usize {
    text[at..].chars().next().map_or(1, char::len_utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_end_includes_newline() {
        let text = "ab\ncd";
        let mut scanner = Scanner::new(text, text.len());
        assert_eq!(scanner.line_end(0), 3);
        assert_eq!(scanner.line_end(2), 3);
        assert_eq!(scanner.line_end(3), 5);
    }

    #[test]
    fn test_empty_matches_are_skipped() {
        let text = "--ab";
        let scanner = Scanner::new(text, text.len());
        let regex = Regex::new("[a-z]*").expect("valid");
        assert_eq!(scanner.find_uncached(&regex, 0, 4, false), Some((2, 4)));
        assert_eq!(scanner.find_uncached(&regex, 0, 4, true), Some((0, 0)));
    }

    #[test]
    fn test_match_does_not_leave_line() {
        let text = "a\nb";
        let mut scanner = Scanner::new(text, text.len());
        let regex = Regex::new("b").expect("valid");
        let line_end = scanner.line_end(0);
        assert_eq!(scanner.find_uncached(&regex, 0, line_end, false), None);
        let dollar = Regex::new("(?m)$").expect("valid");
        // `$` before the newline is on the line; the one at the next line
        // start is not.
        assert_eq!(scanner.find_uncached(&dollar, 0, line_end, true), Some((1, 1)));
        assert_eq!(scanner.find_uncached(&dollar, 2, line_end, true), None);
    }

    #[test]
    fn test_cache_answers_later_positions() {
        let text = "x = 10 + 20\n";
        let mut scanner = Scanner::new(text, text.len());
        let regex = Regex::new("[0-9]+").expect("valid");
        let key = PatternKey::Rule(RuleId(0));
        assert_eq!(scanner.find(key, &regex, 0, 12, false), Some((4, 6)));
        assert_eq!(scanner.find(key, &regex, 3, 12, false), Some((4, 6)));
        // Past the cached match: searched again.
        assert_eq!(scanner.find(key, &regex, 6, 12, false), Some((9, 11)));
        assert_eq!(scanner.find(key, &regex, 11, 12, false), None);
    }

    #[test]
    fn test_zero_width_at_limit() {
        let text = "ab";
        let scanner = Scanner::new(text, text.len());
        assert!(scanner.find_at_limit(&Regex::new("$").expect("valid")));
        assert!(!scanner.find_at_limit(&Regex::new("b").expect("valid")));
    }
}
