// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Any ANSI escape sequence (CSI, OSC, and the short forms), unanchored.
const ANSI_PATTERN: &str = concat!(
    r"[\x1b\x{9b}][\[\]()#;?]*(?:",
    r"(?:(?:(?:;[-a-zA-Z0-9/#&.:=?%@~_]+)*|[a-zA-Z0-9]+(?:;[-a-zA-Z0-9/#&.:=?%@~_]*)*)?(?:\x07|\x1b\\|\x{9c}))",
    r"|(?:(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-PR-TZcf-nq-uy=><~])",
    r")",
);

/// A complete escape sequence at the start of the input.
const COMPLETE_PATTERN: &str = concat!(
    r"^\x1b(?:",
    r"\[[0-?]*[ -/]*[@-~]",
    r"|\][^\x07\x1b]*(?:\x07|\x1b\\)",
    r"|[PX^_][^\x1b]*\x1b\\",
    r"|[()*+\-./#%][ -~]",
    r"|[@-OQ-WYZ\\`a-~]",
    r"|[0-?]",
    r")",
);

/// A strict prefix of some escape sequence spanning the whole input.
const PARTIAL_PATTERN: &str = concat!(
    r"^\x1b(?:",
    r"\[[0-?]*[ -/]*",
    r"|\][^\x07\x1b]*",
    r"|[PX^_][^\x1b]*",
    r"|[()*+\-./#%]",
    r")?$",
);

// Patterns are literals; compilation cannot fail at runtime.
#[allow(clippy::expect_used)]
static ANSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ANSI_PATTERN).expect("ANSI pattern compiles"));
#[allow(clippy::expect_used)]
static COMPLETE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(COMPLETE_PATTERN).expect("complete pattern compiles"));
#[allow(clippy::expect_used)]
static PARTIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PARTIAL_PATTERN).expect("partial pattern compiles"));

const ESC: char = '\x1b';

/// Remove every ANSI escape sequence from `data`.
pub fn strip_ansi(data: &str) -> Cow<'_, str> {
    ANSI.replace_all(data, "")
}

/// Whether `data` ends inside an escape sequence that has not finished
/// arriving yet.
///
/// Only the sequence introduced by the last ESC is inspected. A tail that is
/// neither complete nor a valid prefix (stray ESC followed by garbage) counts
/// as complete so it cannot pin the buffer forever.
pub fn ends_mid_sequence(data: &str) -> bool {
    let Some(last_esc) = data.rfind(ESC) else {
        return false;
    };
    let tail = &data[last_esc..];
    !COMPLETE.is_match(tail) && PARTIAL.is_match(tail)
}

/// Result of [`AnsiSequenceBuffer::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnsiAppend {
    /// Everything buffered so far plus the new chunk, safe to forward.
    Complete(String),
    /// The data ends mid-sequence; it is held until the sequence completes.
    Incomplete,
}

impl AnsiAppend {
    pub fn has_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    pub fn complete(self) -> Option<String> {
        match self {
            Self::Complete(s) => Some(s),
            Self::Incomplete => None,
        }
    }
}

/// Holds back output that ends inside an escape sequence so consumers never
/// see a truncated sequence.
#[derive(Debug, Default)]
pub struct AnsiSequenceBuffer {
    pending: String,
}

impl AnsiSequenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &str) -> AnsiAppend {
        self.pending.push_str(data);
        if ends_mid_sequence(&self.pending) {
            return AnsiAppend::Incomplete;
        }
        AnsiAppend::Complete(std::mem::take(&mut self.pending))
    }

    /// Drop any held partial sequence.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
#[path = "ansi_tests.rs"]
mod tests;
