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

//! The abstract bidirectional byte-stream endpoint the wire layer consumes.
//!
//! Physical transports (sockets, TLS, serial, the threaded double-buffering
//! wrapper) live outside this repository; they plug in by implementing
//! [`Endpoint`]. The in-memory [`MemoryEndpoint`] pair stands in for them in
//! tests.

use std::{cell::Cell, cell::RefCell, collections::VecDeque, rc::Rc};

/// A non-blocking bidirectional byte stream.
///
/// Both calls must return immediately; the polling loop above never blocks.
pub trait Endpoint {
    /// Queues bytes for delivery, returning how many were accepted
    /// (0 when the endpoint is closed).
    fn send(&mut self, bytes: &[u8]) -> usize;

    /// Drains pending received bytes into `buf`, returning the count
    /// (0 when nothing is pending or the endpoint is closed and drained).
    fn recv(&mut self, buf: &mut [u8]) -> usize;

    /// False once either side has closed.
    fn is_open(&self) -> bool;

    /// Closes both directions.
    fn close(&mut self);
}

/// One side of an in-memory byte pipe, for tests and in-process wiring.
pub struct MemoryEndpoint {
    inbox: Rc<RefCell<VecDeque<u8>>>,
    outbox: Rc<RefCell<VecDeque<u8>>>,
    open: Rc<Cell<bool>>,
}

impl MemoryEndpoint {
    /// Creates a cross-wired pair: bytes sent on one side arrive on the other.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        let open = Rc::new(Cell::new(true));
        let a = Self { inbox: b_to_a.clone(), outbox: a_to_b.clone(), open: open.clone() };
        let b = Self { inbox: a_to_b, outbox: b_to_a, open };
        (a, b)
    }
}

impl Endpoint for MemoryEndpoint {
    fn send(&mut self, bytes: &[u8]) -> usize {
        if !self.open.get() {
            return 0;
        }
        self.outbox.borrow_mut().extend(bytes);
        bytes.len()
    }

    fn recv(&mut self, buf: &mut [u8]) -> usize {
        let mut inbox = self.inbox.borrow_mut();
        let count = inbox.len().min(buf.len());
        for slot in buf.iter_mut().take(count) {
            *slot = inbox.pop_front().unwrap_or_default();
        }
        count
    }

    fn is_open(&self) -> bool {
        self.open.get()
    }

    fn close(&mut self) {
        self.open.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_cross_wired() {
        let (mut a, mut b) = MemoryEndpoint::pair();
        assert_eq!(a.send(b"ping"), 4);

        let mut buf = [0u8; 16];
        assert_eq!(b.recv(&mut buf), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(b.recv(&mut buf), 0);
    }

    #[test]
    fn test_recv_respects_buffer_size() {
        let (mut a, mut b) = MemoryEndpoint::pair();
        a.send(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(b.recv(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(b.recv(&mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn test_close_is_seen_by_both_sides() {
        let (mut a, b) = MemoryEndpoint::pair();
        assert!(b.is_open());
        a.close();
        assert!(!b.is_open());
        assert_eq!(a.send(b"late"), 0);
    }
}
