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

//! Request dispatch: routes parsed JSON-RPC requests and notifications to
//! registered handlers and shapes response envelopes.

use std::{cell::RefCell, collections::BTreeMap, collections::HashMap, rc::Rc};

use switchboard_common::Value;
use tracing::{debug, warn};

use crate::{
    encode::{make_error_response, make_result_response, to_json},
    parser::{JsonParser, ParseStatus, END_OF_INPUT},
};

/// A registered procedure implementation.
///
/// Handlers receive the procedure name (one handler may serve several names)
/// and own the argument values. Shared so a handler stays callable while the
/// table itself is being mutated, and so a handler may re-enter the endpoint
/// it is registered on.
pub type Handler = Rc<RefCell<dyn FnMut(&str, Vec<Value>) -> Value>>;

/// Wraps a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: FnMut(&str, Vec<Value>) -> Value + 'static,
{
    Rc::new(RefCell::new(f))
}

/// Proof of a registration, for identity-guarded unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerToken(u64);

/// Name → handler mapping with guarded unregistration.
#[derive(Default)]
pub struct HandlerTable {
    entries: HashMap<String, (Handler, HandlerToken)>,
    next_token: u64,
}

/// A handler table shared between a dispatcher and the endpoint feeding it.
pub type SharedHandlerTable = Rc<RefCell<HandlerTable>>;

impl HandlerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `h` under `procedure`, silently replacing any previous
    /// registration. The returned token identifies this registration.
    pub fn register(&mut self, procedure: &str, h: Handler) -> HandlerToken {
        let token = HandlerToken(self.next_token);
        self.next_token += 1;
        self.entries.insert(procedure.to_string(), (h, token));
        token
    }

    /// Removes the registration for `procedure`. With `Some(token)` the entry
    /// is only removed if it still belongs to that registration, so stale
    /// unregistrations cannot evict a newer handler.
    pub fn unregister(&mut self, procedure: &str, token: Option<HandlerToken>) {
        match token {
            Some(token) => {
                if self.entries.get(procedure).is_some_and(|(_, t)| *t == token) {
                    self.entries.remove(procedure);
                }
            }
            None => {
                self.entries.remove(procedure);
            }
        }
    }

    /// Looks up the handler for `procedure`.
    pub fn get(&self, procedure: &str) -> Option<Handler> {
        self.entries.get(procedure).map(|(h, _)| h.clone())
    }
}

/// Dispatches one request/notification object, appending any response
/// envelope to `out`.
///
/// The table borrow is released before the handler runs, so handlers may
/// register, unregister or call procedures themselves.
pub fn dispatch_object(table: &SharedHandlerTable, mut obj: BTreeMap<String, Value>, out: &mut String) {
    let method = match obj.remove("method") {
        Some(Value::Str(method)) => method,
        _ => {
            warn!("invalid JSON-RPC request object (missing method)");
            return;
        }
    };
    // Only integer ids are valid on this wire; anything else makes the
    // request a notification.
    let id = obj.get("id").and_then(|v| v.as_i64().ok());
    let params = match obj.remove("params") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let registered = {
        let table = table.borrow();
        table.get(&method)
    };
    match registered {
        Some(h) => {
            let result = (&mut *h.borrow_mut())(&method, params);
            match id {
                Some(id) => out.push_str(&make_result_response(&result, id)),
                // notifications produce no output; the return value is dropped
                None => drop(result),
            }
        }
        None => match id {
            Some(id) => {
                warn!(%method, "method not found");
                out.push_str(&make_error_response(
                    -32601,
                    "Method not found",
                    Some(&Value::from(method.as_str())),
                    id,
                ));
            }
            None => debug!(%method, "notification for unknown method dropped"),
        },
    }
}

/// Standalone request processor: raw bytes in, response text out.
///
/// Suited to request/response transports where a whole request buffer is
/// available at once; the streaming endpoint in [`crate::link`] shares the
/// same handler table type but frames its own traffic.
pub struct Dispatcher {
    table: SharedHandlerTable,
    parser: JsonParser,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with an empty handler table.
    pub fn new() -> Self {
        Self::with_table(Rc::new(RefCell::new(HandlerTable::new())))
    }

    /// Creates a dispatcher over an existing (possibly shared) table.
    pub fn with_table(table: SharedHandlerTable) -> Self {
        Self { table, parser: JsonParser::new() }
    }

    /// The underlying handler table.
    pub fn table(&self) -> &SharedHandlerTable {
        &self.table
    }

    /// Registers a handler; see [`HandlerTable::register`].
    pub fn register(&self, procedure: &str, h: Handler) -> HandlerToken {
        self.table.borrow_mut().register(procedure, h)
    }

    /// Unregisters a handler; see [`HandlerTable::unregister`].
    pub fn unregister(&self, procedure: &str, token: Option<HandlerToken>) {
        self.table.borrow_mut().unregister(procedure, token)
    }

    /// Processes one parsed top-level entity. Arrays batch: each element is
    /// processed independently.
    pub fn process_value(&self, entity: Value, out: &mut String) {
        match entity {
            Value::Array(items) => {
                for item in items {
                    self.process_value(item, out);
                }
            }
            Value::Object(obj) => dispatch_object(&self.table, obj, out),
            other => warn!("unsupported top-level JSON-RPC entity: {}", to_json(&other)),
        }
    }

    /// Processes a raw buffer holding one or more concatenated top-level JSON
    /// values. A malformed value is reported and processing resumes with the
    /// rest of the buffer.
    pub fn process_buffer(&mut self, bytes: &[u8], out: &mut String) {
        self.parser.reset();
        for (i, c) in bytes.iter().enumerate() {
            let lookahead = bytes.get(i + 1).copied().unwrap_or(END_OF_INPUT);
            match self.parser.parse(*c, lookahead) {
                ParseStatus::Success => {
                    if let Some(entity) = self.parser.take_result() {
                        self.process_value(entity, out);
                    }
                    self.parser.reset();
                }
                ParseStatus::Error => {
                    debug!("skipping malformed JSON in request buffer");
                    self.parser.reset();
                }
                ParseStatus::Parsing => {}
            }
        }
    }
}
