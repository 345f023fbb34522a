// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framing primitives shared by the managers: line splitting, ANSI-safe
//! chunking, bounded history, and one-shot output watching.

pub mod ansi;
pub mod line;
pub mod matcher;
pub mod sliding;
pub mod utf8;

pub use ansi::{strip_ansi, AnsiAppend, AnsiSequenceBuffer};
pub use line::LineBuffer;
pub use matcher::StringMatcher;
pub use sliding::SlidingBuffer;
pub use utf8::Utf8Decoder;
