// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::ansi::strip_ansi;

/// Incremental splitter that turns arbitrary text chunks into complete lines.
///
/// The trailing fragment after the last `\n` is held back until a later
/// chunk completes it or [`LineBuffer::flush`] drains it.
#[derive(Debug, Default)]
pub struct LineBuffer {
    remainder: String,
    strip_ansi: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that removes ANSI escape sequences from each chunk before
    /// splitting.
    pub fn stripping_ansi() -> Self {
        Self { remainder: String::new(), strip_ansi: true }
    }

    /// Append a chunk and return every line it completed, without the `\n`.
    pub fn append(&mut self, data: &str) -> Vec<String> {
        if data.is_empty() {
            return Vec::new();
        }
        if self.strip_ansi {
            self.remainder.push_str(&strip_ansi(data));
        } else {
            self.remainder.push_str(data);
        }

        let Some(last_newline) = self.remainder.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.remainder.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.remainder, tail);
        complete[..complete.len() - 1].split('\n').map(str::to_owned).collect()
    }

    /// Return the pending fragment and clear it.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.remainder)
    }
}

#[cfg(test)]
#[path = "line_tests.rs"]
mod tests;
