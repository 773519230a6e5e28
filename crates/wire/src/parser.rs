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

//! Character-at-a-time JSON parser.
//!
//! The outer [`JsonParser`] selects one of seven sub-parsers (string, `true`,
//! `false`, `null`, number, array, object) from the first significant
//! character; the grammar alternatives are syntactically disjoint there, so
//! exactly one can remain viable. Each call consumes one byte plus a one-byte
//! lookahead: numbers and bare literals have no terminating character, so
//! completion is decided from what follows. Pass [`END_OF_INPUT`] as the
//! lookahead for the final byte of the stream; it is treated as whitespace.
//!
//! One value per cycle: after a value completes, any non-whitespace byte is an
//! error, and the parser must be [`reset`](JsonParser::reset) before the next
//! value. Array and object parsers recurse through a lazily boxed scratch
//! [`JsonParser`] that is reused (reset) between elements.
//!
//! Known limitation: `\uXXXX` escapes decode a single code unit each and
//! surrogate pairs are not combined, so code points above U+FFFF cannot be
//! expressed through escapes (a lone surrogate half decodes to U+FFFD). Raw
//! UTF-8 in strings passes through untouched and has no such limit.

use switchboard_common::Value;

/// Lookahead sentinel marking the end of the input stream.
pub const END_OF_INPUT: u8 = 0;

/// Outcome of feeding one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More input is needed.
    Parsing,
    /// A complete value is available; only whitespace may follow.
    Success,
    /// The input cannot be a JSON value; reset before reuse.
    Error,
}

fn is_ws(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | END_OF_INPUT)
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn is_sign(c: u8) -> bool {
    c == b'+' || c == b'-'
}

fn is_exp(c: u8) -> bool {
    c == b'e' || c == b'E'
}

// ---------------------------------------------------------------- strings

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrState {
    AwaitQuote,
    Body,
    Escape,
    /// Inside `\uXXXX`, holding how many hex digits were consumed.
    Hex(u8),
    Closed,
    Failed,
}

#[derive(Debug)]
struct StringParser {
    state: StrState,
    buf: Vec<u8>,
    hex: [u8; 4],
    result: Option<Value>,
}

impl StringParser {
    fn new() -> Self {
        Self { state: StrState::AwaitQuote, buf: Vec::new(), hex: [0; 4], result: None }
    }

    fn reset(&mut self) {
        self.state = StrState::AwaitQuote;
        self.buf.clear();
        self.result = None;
    }

    fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    fn push_char(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn close(&mut self) {
        match String::from_utf8(std::mem::take(&mut self.buf)) {
            Ok(text) => {
                self.result = Some(Value::Str(text));
                self.state = StrState::Closed;
            }
            Err(_) => self.state = StrState::Failed,
        }
    }

    fn parse(&mut self, c: u8, _lookahead: u8) -> ParseStatus {
        match self.state {
            StrState::AwaitQuote => {
                if c == b'"' {
                    self.state = StrState::Body;
                } else if !is_ws(c) {
                    self.state = StrState::Failed;
                }
            }
            StrState::Body => match c {
                b'\\' => self.state = StrState::Escape,
                b'"' => self.close(),
                c => self.buf.push(c),
            },
            StrState::Escape => {
                if c == b'u' {
                    self.state = StrState::Hex(0);
                } else {
                    let unescaped = match c {
                        b'b' => 0x08,
                        b'f' => 0x0c,
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        c => c,
                    };
                    self.buf.push(unescaped);
                    self.state = StrState::Body;
                }
            }
            StrState::Hex(consumed) => match (c as char).to_digit(16) {
                Some(nibble) => {
                    self.hex[consumed as usize] = nibble as u8;
                    if consumed == 3 {
                        let code = self.hex.iter().fold(0u32, |acc, n| (acc << 4) | u32::from(*n));
                        // Surrogate halves are not combined; see module docs.
                        self.push_char(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                        self.state = StrState::Body;
                    } else {
                        self.state = StrState::Hex(consumed + 1);
                    }
                }
                None => self.state = StrState::Failed,
            },
            StrState::Closed => {
                if !is_ws(c) {
                    self.result = None;
                    self.state = StrState::Failed;
                }
            }
            StrState::Failed => {}
        }
        match self.state {
            StrState::Closed => ParseStatus::Success,
            StrState::Failed => ParseStatus::Error,
            _ => ParseStatus::Parsing,
        }
    }
}

// --------------------------------------------------------------- literals

#[derive(Debug)]
struct LiteralParser {
    token: &'static [u8],
    make: fn() -> Value,
    pos: usize,
    failed: bool,
    result: Option<Value>,
}

impl LiteralParser {
    fn new(token: &'static [u8], make: fn() -> Value) -> Self {
        Self { token, make, pos: 0, failed: false, result: None }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.failed = false;
        self.result = None;
    }

    fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    fn parse(&mut self, c: u8, _lookahead: u8) -> ParseStatus {
        if self.failed {
            return ParseStatus::Error;
        }
        if self.pos == self.token.len() {
            // Fully matched; only trailing whitespace is allowed.
            if !is_ws(c) {
                self.failed = true;
                self.result = None;
                return ParseStatus::Error;
            }
            return ParseStatus::Success;
        }
        if self.pos == 0 && is_ws(c) {
            return ParseStatus::Parsing;
        }
        if c == self.token[self.pos] {
            self.pos += 1;
            if self.pos == self.token.len() {
                self.result = Some((self.make)());
                return ParseStatus::Success;
            }
            return ParseStatus::Parsing;
        }
        self.failed = true;
        ParseStatus::Error
    }
}

// ---------------------------------------------------------------- numbers

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumState {
    Start,
    IntPart,
    Frac,
    ExpMark,
    ExpBody,
    Failed,
}

/// Also accepts leading zeros.
#[derive(Debug)]
struct NumberParser {
    state: NumState,
    buf: String,
    is_float: bool,
    result: Option<Value>,
}

impl NumberParser {
    fn new() -> Self {
        Self { state: NumState::Start, buf: String::new(), is_float: false, result: None }
    }

    fn reset(&mut self) {
        self.state = NumState::Start;
        self.buf.clear();
        self.is_float = false;
        self.result = None;
    }

    fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    fn materialize(&mut self) -> ParseStatus {
        let parsed = if self.is_float {
            self.buf.parse::<f64>().map(Value::Float).ok()
        } else {
            // i64 overflow degrades to a float rather than failing outright.
            self.buf
                .parse::<i64>()
                .map(Value::Int)
                .ok()
                .or_else(|| self.buf.parse::<f64>().map(Value::Float).ok())
        };
        match parsed {
            Some(value) => {
                self.result = Some(value);
                ParseStatus::Success
            }
            None => {
                self.state = NumState::Failed;
                ParseStatus::Error
            }
        }
    }

    fn parse(&mut self, c: u8, lookahead: u8) -> ParseStatus {
        match self.state {
            NumState::Start => {
                if is_sign(c) || is_digit(c) {
                    self.buf.push(c as char);
                    self.state = NumState::IntPart;
                } else if c == b'.' {
                    self.buf.push('.');
                    self.is_float = true;
                    self.state = NumState::Frac;
                } else {
                    self.state = NumState::Failed;
                }
            }
            NumState::IntPart => {
                if c == b'.' {
                    self.buf.push('.');
                    self.is_float = true;
                    self.state = NumState::Frac;
                } else if is_exp(c) {
                    self.buf.push(c as char);
                    self.is_float = true;
                    self.state = NumState::ExpMark;
                } else if is_digit(c) {
                    self.buf.push(c as char);
                } else {
                    self.state = NumState::Failed;
                }
            }
            NumState::Frac => {
                if is_exp(c) {
                    self.buf.push(c as char);
                    self.state = NumState::ExpMark;
                } else if is_digit(c) {
                    self.buf.push(c as char);
                } else {
                    self.state = NumState::Failed;
                }
            }
            NumState::ExpMark => {
                if is_sign(c) || is_digit(c) {
                    self.buf.push(c as char);
                    self.state = NumState::ExpBody;
                } else {
                    self.state = NumState::Failed;
                }
            }
            NumState::ExpBody => {
                if is_digit(c) {
                    self.buf.push(c as char);
                } else {
                    self.state = NumState::Failed;
                }
            }
            NumState::Failed => {}
        }
        if self.state == NumState::Failed {
            return ParseStatus::Error;
        }
        // Digits never terminate on their own: the lookahead decides.
        let can_continue =
            is_digit(lookahead) || is_sign(lookahead) || is_exp(lookahead) || lookahead == b'.';
        if !can_continue && self.state != NumState::Start {
            return self.materialize();
        }
        ParseStatus::Parsing
    }
}

// ----------------------------------------------------------------- arrays

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrState {
    Start,
    /// After `[`: a value or an immediate `]` may follow.
    AwaitFirst,
    /// After `,`: only a value may follow.
    AwaitNext,
    InValue,
    AwaitDelim,
    Done,
    Failed,
}

struct ArrayParser {
    state: ArrState,
    value_parser: Option<Box<JsonParser>>,
    items: Vec<Value>,
    result: Option<Value>,
}

impl ArrayParser {
    fn new() -> Self {
        Self { state: ArrState::Start, value_parser: None, items: Vec::new(), result: None }
    }

    fn reset(&mut self) {
        self.state = ArrState::Start;
        if let Some(parser) = &mut self.value_parser {
            parser.reset();
        }
        self.items.clear();
        self.result = None;
    }

    fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    fn feed_nested(&mut self, c: u8, lookahead: u8) {
        let parser = self.value_parser.get_or_insert_with(|| Box::new(JsonParser::new()));
        match parser.parse(c, lookahead) {
            ParseStatus::Success => {
                self.items.push(parser.take_result().unwrap_or(Value::Null));
                self.state = ArrState::AwaitDelim;
            }
            ParseStatus::Error => self.state = ArrState::Failed,
            ParseStatus::Parsing => self.state = ArrState::InValue,
        }
    }

    fn parse(&mut self, c: u8, lookahead: u8) -> ParseStatus {
        match self.state {
            ArrState::Start => {
                if c == b'[' {
                    self.value_parser.get_or_insert_with(|| Box::new(JsonParser::new()));
                    self.state = ArrState::AwaitFirst;
                } else if !is_ws(c) {
                    self.state = ArrState::Failed;
                }
            }
            ArrState::AwaitFirst => {
                if c == b']' {
                    self.result = Some(Value::Array(std::mem::take(&mut self.items)));
                    self.state = ArrState::Done;
                } else if !is_ws(c) {
                    self.feed_nested(c, lookahead);
                }
            }
            ArrState::AwaitNext => {
                if !is_ws(c) {
                    self.feed_nested(c, lookahead);
                }
            }
            ArrState::InValue => self.feed_nested(c, lookahead),
            ArrState::AwaitDelim => {
                if c == b',' {
                    if let Some(parser) = &mut self.value_parser {
                        parser.reset();
                    }
                    self.state = ArrState::AwaitNext;
                } else if c == b']' {
                    self.result = Some(Value::Array(std::mem::take(&mut self.items)));
                    self.state = ArrState::Done;
                } else if !is_ws(c) {
                    self.state = ArrState::Failed;
                }
            }
            ArrState::Done => {
                if !is_ws(c) {
                    self.result = None;
                    self.state = ArrState::Failed;
                }
            }
            ArrState::Failed => {}
        }
        match self.state {
            ArrState::Done => ParseStatus::Success,
            ArrState::Failed => ParseStatus::Error,
            _ => ParseStatus::Parsing,
        }
    }
}

// ---------------------------------------------------------------- objects

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjState {
    Start,
    AwaitEntry,
    InKey,
    AwaitColon,
    InValue,
    AwaitDelim,
    AfterComma,
    Done,
    Failed,
}

struct ObjectParser {
    state: ObjState,
    key_parser: StringParser,
    value_parser: Option<Box<JsonParser>>,
    pending_key: Option<String>,
    entries: std::collections::BTreeMap<String, Value>,
    result: Option<Value>,
}

impl ObjectParser {
    fn new() -> Self {
        Self {
            state: ObjState::Start,
            key_parser: StringParser::new(),
            value_parser: None,
            pending_key: None,
            entries: std::collections::BTreeMap::new(),
            result: None,
        }
    }

    fn reset(&mut self) {
        self.state = ObjState::Start;
        self.key_parser.reset();
        if let Some(parser) = &mut self.value_parser {
            parser.reset();
        }
        self.pending_key = None;
        self.entries.clear();
        self.result = None;
    }

    fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    fn start_key(&mut self, c: u8, lookahead: u8) {
        self.key_parser.reset();
        let status = self.key_parser.parse(c, lookahead);
        debug_assert_eq!(status, ParseStatus::Parsing);
        self.state = ObjState::InKey;
    }

    fn parse(&mut self, c: u8, lookahead: u8) -> ParseStatus {
        match self.state {
            ObjState::Start => {
                if c == b'{' {
                    self.state = ObjState::AwaitEntry;
                } else if !is_ws(c) {
                    self.state = ObjState::Failed;
                }
            }
            ObjState::AwaitEntry => {
                if c == b'}' {
                    self.result = Some(Value::Object(std::mem::take(&mut self.entries)));
                    self.state = ObjState::Done;
                } else if c == b'"' {
                    self.start_key(c, lookahead);
                } else if !is_ws(c) {
                    self.state = ObjState::Failed;
                }
            }
            ObjState::InKey => match self.key_parser.parse(c, lookahead) {
                ParseStatus::Success => {
                    let key = self
                        .key_parser
                        .take_result()
                        .and_then(|v| v.into_string().ok())
                        .unwrap_or_default();
                    self.pending_key = Some(key);
                    self.state = ObjState::AwaitColon;
                }
                ParseStatus::Error => self.state = ObjState::Failed,
                ParseStatus::Parsing => {}
            },
            ObjState::AwaitColon => {
                if c == b':' {
                    match &mut self.value_parser {
                        Some(parser) => parser.reset(),
                        None => self.value_parser = Some(Box::new(JsonParser::new())),
                    }
                    self.state = ObjState::InValue;
                } else if !is_ws(c) {
                    self.state = ObjState::Failed;
                }
            }
            ObjState::InValue => {
                let parser = self.value_parser.as_mut().expect("set when ':' was read");
                match parser.parse(c, lookahead) {
                    ParseStatus::Success => {
                        let value = parser.take_result().unwrap_or(Value::Null);
                        let key = self.pending_key.take().unwrap_or_default();
                        // A repeated key is a hard parse error, not last-wins.
                        if self.entries.contains_key(&key) {
                            self.state = ObjState::Failed;
                        } else {
                            self.entries.insert(key, value);
                            self.state = ObjState::AwaitDelim;
                        }
                    }
                    ParseStatus::Error => self.state = ObjState::Failed,
                    ParseStatus::Parsing => {}
                }
            }
            ObjState::AwaitDelim => {
                if c == b'}' {
                    self.result = Some(Value::Object(std::mem::take(&mut self.entries)));
                    self.state = ObjState::Done;
                } else if c == b',' {
                    self.state = ObjState::AfterComma;
                } else if !is_ws(c) {
                    self.state = ObjState::Failed;
                }
            }
            ObjState::AfterComma => {
                if c == b'"' {
                    self.start_key(c, lookahead);
                } else if !is_ws(c) {
                    self.state = ObjState::Failed;
                }
            }
            ObjState::Done => {
                if !is_ws(c) {
                    self.result = None;
                    self.state = ObjState::Failed;
                }
            }
            ObjState::Failed => {}
        }
        match self.state {
            ObjState::Done => ParseStatus::Success,
            ObjState::Failed => ParseStatus::Error,
            _ => ParseStatus::Parsing,
        }
    }
}

// ------------------------------------------------------------ outer parser

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alt {
    Str,
    True,
    False,
    Null,
    Num,
    Arr,
    Obj,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OuterState {
    Idle,
    Running(Alt),
    Done,
    Failed,
}

/// Streaming parser for a single JSON value.
pub struct JsonParser {
    state: OuterState,
    string: StringParser,
    lit_true: LiteralParser,
    lit_false: LiteralParser,
    lit_null: LiteralParser,
    number: NumberParser,
    array: ArrayParser,
    object: ObjectParser,
    result: Option<Value>,
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonParser {
    /// Creates an idle parser.
    pub fn new() -> Self {
        Self {
            state: OuterState::Idle,
            string: StringParser::new(),
            lit_true: LiteralParser::new(b"true", || Value::Bool(true)),
            lit_false: LiteralParser::new(b"false", || Value::Bool(false)),
            lit_null: LiteralParser::new(b"null", || Value::Null),
            number: NumberParser::new(),
            array: ArrayParser::new(),
            object: ObjectParser::new(),
            result: None,
        }
    }

    /// Clears all state to accept new input. Discards an unconsumed result.
    pub fn reset(&mut self) {
        self.state = OuterState::Idle;
        self.string.reset();
        self.lit_true.reset();
        self.lit_false.reset();
        self.lit_null.reset();
        self.number.reset();
        self.array.reset();
        self.object.reset();
        self.result = None;
    }

    fn feed(&mut self, alt: Alt, c: u8, lookahead: u8) -> ParseStatus {
        let status = match alt {
            Alt::Str => self.string.parse(c, lookahead),
            Alt::True => self.lit_true.parse(c, lookahead),
            Alt::False => self.lit_false.parse(c, lookahead),
            Alt::Null => self.lit_null.parse(c, lookahead),
            Alt::Num => self.number.parse(c, lookahead),
            Alt::Arr => self.array.parse(c, lookahead),
            Alt::Obj => self.object.parse(c, lookahead),
        };
        if status == ParseStatus::Success {
            self.result = match alt {
                Alt::Str => self.string.take_result(),
                Alt::True => self.lit_true.take_result(),
                Alt::False => self.lit_false.take_result(),
                Alt::Null => self.lit_null.take_result(),
                Alt::Num => self.number.take_result(),
                Alt::Arr => self.array.take_result(),
                Alt::Obj => self.object.take_result(),
            };
            self.state = OuterState::Done;
        }
        status
    }

    /// Consumes one byte. `lookahead` must be the next byte of the stream, or
    /// [`END_OF_INPUT`] when `c` is the last one.
    pub fn parse(&mut self, c: u8, lookahead: u8) -> ParseStatus {
        match self.state {
            OuterState::Idle => {
                if is_ws(c) {
                    return ParseStatus::Parsing;
                }
                let alt = match c {
                    b'"' => Alt::Str,
                    b't' => Alt::True,
                    b'f' => Alt::False,
                    b'n' => Alt::Null,
                    b'[' => Alt::Arr,
                    b'{' => Alt::Obj,
                    c if c == b'.' || c == b'-' || is_digit(c) => Alt::Num,
                    _ => return ParseStatus::Error,
                };
                self.state = OuterState::Running(alt);
                self.feed(alt, c, lookahead)
            }
            OuterState::Running(alt) => self.feed(alt, c, lookahead),
            OuterState::Done => {
                if is_ws(c) {
                    ParseStatus::Success
                } else {
                    self.state = OuterState::Failed;
                    ParseStatus::Error
                }
            }
            OuterState::Failed => ParseStatus::Error,
        }
    }

    /// Parses a complete in-memory buffer (the final byte is fed with the
    /// [`END_OF_INPUT`] lookahead). Remember to [`reset`](Self::reset) first
    /// when reusing the parser.
    pub fn parse_bytes(&mut self, bytes: &[u8]) -> ParseStatus {
        let mut status = ParseStatus::Parsing;
        for (i, c) in bytes.iter().enumerate() {
            let lookahead = bytes.get(i + 1).copied().unwrap_or(END_OF_INPUT);
            status = self.parse(*c, lookahead);
        }
        status
    }

    /// [`parse_bytes`](Self::parse_bytes) over a string slice.
    pub fn parse_str(&mut self, s: &str) -> ParseStatus {
        self.parse_bytes(s.as_bytes())
    }

    /// Borrows the parsed value, if one has completed.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Removes and returns the parsed value. Subsequent calls return `None`
    /// until another value completes after a reset.
    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_common::logging::ensure_test_logging;

    fn parse_one(input: &str) -> Value {
        let mut parser = JsonParser::new();
        assert_eq!(parser.parse_str(input), ParseStatus::Success, "input: {input}");
        parser.take_result().expect("success must materialize a value")
    }

    fn parse_err(input: &str) {
        let mut parser = JsonParser::new();
        assert_eq!(parser.parse_str(input), ParseStatus::Error, "input: {input}");
    }

    #[test]
    fn test_literals() {
        ensure_test_logging(None);
        assert_eq!(parse_one("true"), Value::Bool(true));
        assert_eq!(parse_one("false"), Value::Bool(false));
        assert_eq!(parse_one("null"), Value::Null);
        parse_err("trux");
        parse_err("truex");
        parse_err("nul l");

        // a clean prefix is incomplete, not wrong
        let mut parser = JsonParser::new();
        assert_eq!(parser.parse_str("tru"), ParseStatus::Parsing);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_one("-10"), Value::Int(-10));
        assert_eq!(parse_one("007"), Value::Int(7)); // leading zeros tolerated
        assert_eq!(parse_one("1.5e2"), Value::Float(150.0));
        assert_eq!(parse_one(" -.3\t"), Value::Float(-0.3));
        assert_eq!(parse_one("2E-2"), Value::Float(0.02));
        parse_err("-");
        parse_err("1e");
        parse_err("1.2.3");
    }

    #[test]
    fn test_integer_overflow_degrades_to_float() {
        assert_eq!(parse_one("99999999999999999999"), Value::Float(1e20));
    }

    #[test]
    fn test_strings() {
        assert_eq!(parse_one(r#""hello""#), Value::from("hello"));
        assert_eq!(parse_one(r#""a\nb\t\"c\"\\""#), Value::from("a\nb\t\"c\"\\"));
        assert_eq!(parse_one(r#""Aé""#), Value::from("Aé"));
        assert_eq!(parse_one("\"Grüße\""), Value::from("Grüße")); // raw UTF-8 passes through
        parse_err(r#""\u00ZZ""#);

        // An unterminated string is not an error yet, just incomplete.
        let mut parser = JsonParser::new();
        assert_eq!(parser.parse_str(r#""unterminated"#), ParseStatus::Parsing);
    }

    #[test]
    fn test_lone_surrogate_escape_is_replaced() {
        // Surrogate halves cannot be combined; each decodes independently.
        assert_eq!(parse_one(r#""\ud834""#), Value::from("\u{fffd}"));
    }

    #[test]
    fn test_arrays() {
        assert_eq!(parse_one("[]"), Value::Array(vec![]));
        assert_eq!(
            parse_one("[1, 2,3]"),
            Value::from(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            parse_one(r#"[1,[2,[3]],{"k":null}]"#),
            Value::from(vec![
                Value::Int(1),
                Value::from(vec![Value::Int(2), Value::from(vec![Value::Int(3)])]),
                [("k".to_string(), Value::Null)].into_iter().collect(),
            ])
        );
        parse_err("[1,]");
        parse_err("[1 2]");
    }

    #[test]
    fn test_objects() {
        let parsed = parse_one(r#"{"a":1,"b":[],"c":true}"#);
        let entries = parsed.as_object().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries["a"], Value::Int(1));
        assert_eq!(entries["b"], Value::Array(vec![]));
        assert_eq!(entries["c"], Value::Bool(true));

        assert_eq!(parse_one("{}"), Value::Object(Default::default()));
        parse_err(r#"{"a":1,}"#);
        parse_err(r#"{"a" 1}"#);
        parse_err(r#"{a:1}"#);
    }

    #[test]
    fn test_duplicate_key_is_hard_error() {
        parse_err(r#"{"a":"a","a":"b"}"#);
    }

    #[test]
    fn test_one_value_per_cycle() {
        let mut parser = JsonParser::new();
        assert_eq!(parser.parse_str("42 "), ParseStatus::Success);
        // Any non-whitespace after a completed value is an error.
        assert_eq!(parser.parse(b'7', END_OF_INPUT), ParseStatus::Error);

        parser.reset();
        assert_eq!(parser.parse_str("7"), ParseStatus::Success);
        assert_eq!(parser.take_result(), Some(Value::Int(7)));
    }

    #[test]
    fn test_leading_whitespace_is_skipped() {
        assert_eq!(parse_one("  \r\n\t 42"), Value::Int(42));
    }

    #[test]
    fn test_garbage_first_char() {
        parse_err("@");
        parse_err("+1"); // a leading plus is not a JSON number
    }

    #[test]
    fn test_incremental_feeding_matches_batch() {
        let input = br#"{"xs":[1,2.5,"three"],"ok":true}"#;
        let mut parser = JsonParser::new();
        let mut status = ParseStatus::Parsing;
        for i in 0..input.len() {
            let lookahead = input.get(i + 1).copied().unwrap_or(END_OF_INPUT);
            status = parser.parse(input[i], lookahead);
        }
        assert_eq!(status, ParseStatus::Success);
        let incremental = parser.take_result().unwrap();

        let mut batch = JsonParser::new();
        batch.parse_bytes(input);
        assert_eq!(incremental, batch.take_result().unwrap());
    }

    #[test]
    fn test_round_trip_with_encoder() {
        let doc = r#"{"a":[-1,0.5,"s\n"],"b":{"c":false,"d":null},"e":1e3}"#;
        let value = parse_one(doc);
        let reparsed = parse_one(&crate::encode::to_json(&value));
        assert_eq!(value, reparsed);
    }
}
