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

//! Splits a byte stream into complete top-level JSON frames.
//!
//! JSON-RPC traffic arrives as concatenated `{...}` and `[...]` values with no
//! length prefix, so frame boundaries are found by counting bracket depth
//! (string- and escape-aware). Bytes between frames that open neither `{` nor
//! `[` are skipped; a bare top-level scalar is not valid RPC traffic and is
//! ignored here rather than parsed.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    Value,
    Str,
    StrEscape,
}

/// Incremental frame boundary scanner.
#[derive(Debug)]
pub struct FrameScanner {
    state: ScanState,
    curly: i32,
    square: i32,
    buf: Vec<u8>,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScanner {
    /// Creates an idle scanner.
    pub fn new() -> Self {
        Self { state: ScanState::Idle, curly: 0, square: 0, buf: Vec::new() }
    }

    fn abort_frame(&mut self) {
        debug!("dropping malformed frame with unbalanced brackets");
        self.buf.clear();
        self.curly = 0;
        self.square = 0;
        self.state = ScanState::Idle;
    }

    /// Consumes one byte; returns a frame when this byte completed one.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            ScanState::Idle => {
                match byte {
                    b'{' => {
                        self.curly = 1;
                        self.square = 0;
                    }
                    b'[' => {
                        self.curly = 0;
                        self.square = 1;
                    }
                    // inter-frame garbage (including bare scalars) is skipped
                    _ => return None,
                }
                self.buf.clear();
                self.buf.push(byte);
                self.state = ScanState::Value;
                None
            }
            ScanState::Value => {
                self.buf.push(byte);
                match byte {
                    b'{' => self.curly += 1,
                    b'[' => self.square += 1,
                    b'}' => self.curly -= 1,
                    b']' => self.square -= 1,
                    b'"' => self.state = ScanState::Str,
                    _ => {}
                }
                if self.curly < 0 || self.square < 0 {
                    self.abort_frame();
                    return None;
                }
                if self.curly == 0 && self.square == 0 {
                    self.state = ScanState::Idle;
                    return Some(std::mem::take(&mut self.buf));
                }
                None
            }
            ScanState::Str => {
                self.buf.push(byte);
                match byte {
                    b'\\' => self.state = ScanState::StrEscape,
                    b'"' => self.state = ScanState::Value,
                    _ => {}
                }
                None
            }
            ScanState::StrEscape => {
                self.buf.push(byte);
                self.state = ScanState::Str;
                None
            }
        }
    }

    /// Feeds a chunk, appending every completed frame to `out`.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<Vec<u8>>) {
        for byte in bytes {
            if let Some(frame) = self.push(*byte) {
                out.push(frame);
            }
        }
    }

    /// Drops any partially accumulated frame and returns to idle.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.curly = 0;
        self.square = 0;
        self.state = ScanState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(input: &[u8]) -> Vec<Vec<u8>> {
        let mut scanner = FrameScanner::new();
        let mut frames = Vec::new();
        scanner.feed(input, &mut frames);
        frames
    }

    #[test]
    fn test_single_frame() {
        assert_eq!(scan(b"{\"a\":1}"), vec![b"{\"a\":1}".to_vec()]);
    }

    #[test]
    fn test_concatenated_frames() {
        let frames = scan(b"{\"a\":1}\n[1,2]{\"b\":{}}");
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1], b"[1,2]");
        assert_eq!(frames[2], b"{\"b\":{}}");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut scanner = FrameScanner::new();
        let mut frames = Vec::new();
        scanner.feed(b"{\"key\":[1,", &mut frames);
        assert!(frames.is_empty());
        scanner.feed(b"2]}", &mut frames);
        assert_eq!(frames, vec![b"{\"key\":[1,2]}".to_vec()]);
    }

    #[test]
    fn test_brackets_inside_strings_do_not_count() {
        assert_eq!(scan(br#"{"a":"}]"}"#), vec![br#"{"a":"}]"}"#.to_vec()]);
        assert_eq!(scan(br#"{"a":"\"}"}"#), vec![br#"{"a":"\"}"}"#.to_vec()]);
    }

    #[test]
    fn test_garbage_between_frames_is_skipped() {
        let frames = scan(b"noise {\"a\":1} 42 [true]");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"{\"a\":1}");
        assert_eq!(frames[1], b"[true]");
    }

    #[test]
    fn test_unbalanced_frame_is_dropped() {
        // the stray `]` aborts the first frame; the next one still comes out
        let frames = scan(b"{]}{\"ok\":1}");
        assert_eq!(frames, vec![b"{\"ok\":1}".to_vec()]);
    }
}
