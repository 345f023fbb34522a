// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;

/// Fixed-capacity FIFO that keeps only the most recent items.
///
/// Pushing past capacity silently discards the oldest entry. A capacity of
/// zero keeps nothing.
#[derive(Debug, Clone)]
pub struct SlidingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> SlidingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Current contents, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> SlidingBuffer<T> {
    pub fn get(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl SlidingBuffer<String> {
    /// Concatenate every retained chunk.
    pub fn concat(&self) -> String {
        let mut out = String::with_capacity(self.items.iter().map(String::len).sum());
        for chunk in &self.items {
            out.push_str(chunk);
        }
        out
    }
}

#[cfg(test)]
#[path = "sliding_tests.rs"]
mod tests;
