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

//! JSON text encoding of [`Value`] trees and JSON-RPC 2.0 envelopes.

use std::fmt::Write;

use switchboard_common::Value;

/// Rendering knobs for [`to_json_opts`].
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Escape control characters (U+0000..U+001F) as `\u00XX`. Standard
    /// compliant when set; the non-escaping mode is cheaper for binary
    /// payloads smuggled through strings and still round-trips through this
    /// crate's parser.
    pub escape_non_printable: bool,
    /// Decimal digits for floats; `None` uses the shortest representation.
    pub float_precision: Option<u8>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { escape_non_printable: true, float_precision: None }
    }
}

/// Quotes and escapes `s` as a JSON string literal.
pub fn escape_and_quote(s: &str, escape_non_printable: bool) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if escape_non_printable && (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Serializes a value as JSON text with default options.
pub fn to_json(value: &Value) -> String {
    to_json_opts(value, &EncodeOptions::default())
}

/// Serializes a value as JSON text.
pub fn to_json_opts(value: &Value, opts: &EncodeOptions) -> String {
    let mut out = String::new();
    append_value(&mut out, value, opts);
    out
}

fn append_value(out: &mut String, value: &Value, opts: &EncodeOptions) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => append_float(out, *f, opts),
        Value::Str(s) => out.push_str(&escape_and_quote(s, opts.escape_non_printable)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                append_value(out, item, opts);
            }
            out.push(']');
        }
        Value::Object(entries) => {
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&escape_and_quote(key, opts.escape_non_printable));
                out.push(':');
                append_value(out, item, opts);
            }
            out.push('}');
        }
    }
}

fn append_float(out: &mut String, f: f64, opts: &EncodeOptions) {
    if !f.is_finite() {
        // JSON cannot carry these; the historical wire format quotes them.
        let _ = write!(out, "\"{f}\"");
        return;
    }
    let rendered = match opts.float_precision {
        Some(digits) => format!("{f:.prec$}", prec = digits as usize),
        None => format!("{f}"),
    };
    out.push_str(&rendered);
    // Must keep a decimal point (or exponent) to re-parse as a float.
    if !rendered.contains('.') && !rendered.contains(['e', 'E']) {
        out.push_str(".0");
    }
}

/// Builds a JSON-RPC 2.0 request (with `id`) or notification (without).
/// The trailing newline keeps concatenated traffic readable in dumps.
pub fn make_request(procedure: &str, args: &[Value], id: Option<i64>) -> String {
    let mut out = String::new();
    out.push_str("{\"jsonrpc\":\"2.0\",\"method\":");
    out.push_str(&escape_and_quote(procedure, true));
    out.push_str(",\"params\":[");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        append_value(&mut out, arg, &EncodeOptions::default());
    }
    out.push(']');
    if let Some(id) = id {
        let _ = write!(out, ",\"id\":{id}");
    }
    out.push_str("}\n");
    out
}

/// Builds a JSON-RPC 2.0 success envelope.
pub fn make_result_response(result: &Value, id: i64) -> String {
    let mut out = String::from("{\"jsonrpc\":\"2.0\",\"result\":");
    append_value(&mut out, result, &EncodeOptions::default());
    let _ = write!(out, ",\"id\":{id}}}");
    out.push('\n');
    out
}

/// Builds a JSON-RPC 2.0 error envelope.
pub fn make_error_response(code: i64, message: &str, data: Option<&Value>, id: i64) -> String {
    let mut out = String::from("{\"jsonrpc\":\"2.0\",\"error\":{\"code\":");
    let _ = write!(out, "{code},\"message\":");
    out.push_str(&escape_and_quote(message, true));
    if let Some(data) = data {
        out.push_str(",\"data\":");
        append_value(&mut out, data, &EncodeOptions::default());
    }
    let _ = write!(out, "}},\"id\":{id}}}");
    out.push('\n');
    out
}
