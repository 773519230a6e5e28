// Switchboard - JSON-RPC multiplexing proxy
// Copyright (C) 2025 The Switchboard Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Unique-id pools for call ids and connection ids.

use std::collections::VecDeque;

/// Monotonic counter plus a free-list of released ids.
///
/// `acquire` prefers the free-list so id space stays compact under churn.
/// Callers own the release discipline: an id must be released at most once
/// and never while a live record still references it — double release would
/// silently alias two unrelated records, so debug builds reject it.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: i32,
    free: VecDeque<i32>,
}

impl IdGenerator {
    /// Creates a pool whose counter starts at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool whose counter starts at `start`.
    pub fn starting_at(start: i32) -> Self {
        Self { next: start, free: VecDeque::new() }
    }

    /// Returns the oldest released id, or the next counter value.
    pub fn acquire(&mut self) -> i32 {
        if let Some(id) = self.free.pop_front() {
            id
        } else {
            let id = self.next;
            self.next += 1;
            id
        }
    }

    /// Returns a no-longer-referenced id to the pool.
    pub fn release(&mut self, id: i32) {
        debug_assert!(id < self.next, "released id {id} was never acquired");
        debug_assert!(!self.free.contains(&id), "id {id} released twice");
        self.free.push_back(id);
    }
}
