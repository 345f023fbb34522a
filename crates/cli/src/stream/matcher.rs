// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use regex::Regex;

type Filter = Box<dyn Fn(&str) -> bool + Send + Sync>;
type OnMatch = Box<dyn FnMut(&str) + Send>;

/// One-shot regex watcher over a text stream.
///
/// A cheap prefilter gates the regex. The first regex hit invokes the
/// callback with the matched text; later input is ignored until [`reset`].
///
/// [`reset`]: StringMatcher::reset
pub struct StringMatcher {
    filter: Filter,
    pattern: Regex,
    on_match: OnMatch,
    matched: bool,
}

impl StringMatcher {
    pub fn new(
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
        pattern: Regex,
        on_match: impl FnMut(&str) + Send + 'static,
    ) -> Self {
        Self { filter: Box::new(filter), pattern, on_match: Box::new(on_match), matched: false }
    }

    pub fn check_for_match(&mut self, data: &str) {
        if self.matched || !(self.filter)(data) {
            return;
        }
        if let Some(found) = self.pattern.find(data) {
            self.matched = true;
            (self.on_match)(found.as_str());
        }
    }

    pub fn reset(&mut self) {
        self.matched = false;
    }

    pub fn has_matched(&self) -> bool {
        self.matched
    }
}

impl std::fmt::Debug for StringMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringMatcher")
            .field("pattern", &self.pattern.as_str())
            .field("matched", &self.matched)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
