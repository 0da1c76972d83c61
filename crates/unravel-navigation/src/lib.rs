//! Back/forward navigation history over visited code positions.

use std::collections::VecDeque;
use unravel_core::Position;

/// Default number of positions kept by [`JumpManager::new`].
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// A visited position and its insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpEntry {
    /// Monotonically increasing across the manager's lifetime, including resets.
    pub index: u64,
    pub position: Position,
}

/// Bounded browser-style history with a cursor.
///
/// Pushing a position that differs from the current one discards the forward entries, appends
/// the position and moves the cursor to it. Pushing the current position again is a no-op.
#[derive(Debug, Clone)]
pub struct JumpManager {
    entries: VecDeque<JumpEntry>,
    cursor: usize,
    limit: usize,
    next_index: u64,
}

impl Default for JumpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpManager {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// History keeping at most `limit` positions (at least one).
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            limit: limit.max(1),
            next_index: 0,
        }
    }

    pub fn add_position(&mut self, position: Position) {
        if let Some(current) = self.entries.get(self.cursor) {
            if current.position == position {
                return;
            }
            self.entries.truncate(self.cursor + 1);
        }

        self.entries.push_back(JumpEntry {
            index: self.next_index,
            position,
        });
        self.next_index += 1;

        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
        tracing::trace!(
            target: "unravel.navigation",
            cursor = self.cursor,
            len = self.entries.len(),
            "position added"
        );
    }

    /// Steps back and returns the position now under the cursor.
    pub fn get_prev(&mut self) -> Option<Position> {
        if self.cursor == 0 || self.entries.is_empty() {
            return None;
        }
        self.cursor -= 1;
        Some(self.entries[self.cursor].position.clone())
    }

    /// Steps forward and returns the position now under the cursor.
    pub fn get_next(&mut self) -> Option<Position> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(self.entries[self.cursor].position.clone())
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Index of the cursor in [`JumpManager::entries`]; `0` for an empty history.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&JumpEntry> {
        self.entries.get(self.cursor)
    }

    pub fn entries(&self) -> impl Iterator<Item = &JumpEntry> + '_ {
        self.entries.iter()
    }
}
