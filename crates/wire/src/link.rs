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

//! Call correlation over a byte-stream endpoint.
//!
//! [`JsonRpcLink`] turns an [`Endpoint`] into an [`RpcConnection`]: outgoing
//! calls are assigned wire ids from a pool and remembered until the matching
//! result or error envelope arrives; incoming requests are dispatched through
//! a shared handler table. Everything is driven by [`update`][RpcConnection::update]
//! polls - nothing blocks, and a call's completion is always delivered from a
//! later `update`, never from within the call that initiated it.

use std::{cell::RefCell, collections::BTreeMap, collections::HashMap, rc::Rc, rc::Weak};

use switchboard_common::{Endpoint, IdGenerator, Value};
use tracing::{debug, info, warn};

use crate::{
    dispatch::{dispatch_object, Handler, HandlerTable, HandlerToken, SharedHandlerTable},
    encode::{make_request, to_json},
    framing::FrameScanner,
    parser::{JsonParser, ParseStatus},
};

/// Liveness of an RPC connection (physical or virtual).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Down; calls are rejected locally.
    NotConnected,
    /// Establishment in flight; not yet usable for calls at the virtual
    /// layer, though a physical link may already queue traffic.
    Connecting,
    /// Fully usable.
    Connected,
}

/// Receives the single resolution of a correlated call.
///
/// The `token` is the caller-supplied correlation value passed alongside the
/// call; it is opaque to the connection.
pub trait ProcedureCaller {
    /// A result arrived. The value is moved in; the pending record is gone.
    fn on_result(&mut self, result: Value, token: u32);

    /// An error arrived instead of a result.
    fn on_error(&mut self, code: i64, message: &str, data: Option<Value>, token: u32) {
        debug!(code, error = message, token, "procedure error dropped");
        drop(data);
    }
}

/// Weak handle to a caller. A pending call holds one of these: when the
/// owning caller is dropped before resolution the record survives, and the
/// eventual result is silently discarded instead of invoking anything.
pub type CallerRef = Weak<RefCell<dyn ProcedureCaller>>;

/// Optional correlation target of a call: `None` makes it a notification.
pub type CallerSlot = Option<(CallerRef, u32)>;

/// The abstract call-correlation connection the proxy layers consume and
/// re-expose one level higher.
pub trait RpcConnection {
    /// Sends a correlated call (with a caller) or a notification (without).
    /// Returns false - releasing the arguments, sending nothing - when the
    /// connection is down.
    fn call(&self, procedure: &str, args: Vec<Value>, caller: CallerSlot) -> bool;

    /// Registers a handler for inbound calls of `procedure`.
    fn register_handler(&self, procedure: &str, handler: Handler) -> HandlerToken;

    /// Removes a handler registration; see
    /// [`HandlerTable::unregister`](crate::dispatch::HandlerTable::unregister).
    fn unregister_handler(&self, procedure: &str, token: Option<HandlerToken>);

    /// Current liveness.
    fn state(&self) -> ConnectionState;

    /// True while calls may be queued.
    fn is_connected(&self) -> bool {
        !matches!(self.state(), ConnectionState::NotConnected)
    }

    /// Polls the connection: ship queued traffic, deliver arrived results and
    /// inbound calls. Must be called periodically; nothing happens between
    /// polls.
    fn update(&self);

    /// Drops the connection and every pending call on it.
    fn disconnect(&self);
}

struct PendingCall {
    procedure: String,
    caller: CallerRef,
    token: u32,
}

struct LinkCore {
    endpoint: Box<dyn Endpoint>,
    scanner: FrameScanner,
    parser: JsonParser,
    // wire id 0 stays reserved, matching the historical framing
    ids: IdGenerator,
    pending: HashMap<i32, PendingCall>,
    out: String,
    state: ConnectionState,
}

/// JSON-RPC 2.0 call correlation over a byte-stream [`Endpoint`].
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct JsonRpcLink {
    core: Rc<RefCell<LinkCore>>,
    handlers: SharedHandlerTable,
}

const RECV_CHUNK: usize = 4096;

impl JsonRpcLink {
    /// Wraps an endpoint. The link is Connected as long as the endpoint is
    /// open.
    pub fn new(endpoint: Box<dyn Endpoint>) -> Self {
        let state =
            if endpoint.is_open() { ConnectionState::Connected } else { ConnectionState::NotConnected };
        Self {
            core: Rc::new(RefCell::new(LinkCore {
                endpoint,
                scanner: FrameScanner::new(),
                parser: JsonParser::new(),
                ids: IdGenerator::starting_at(1),
                pending: HashMap::new(),
                out: String::new(),
                state,
            })),
            handlers: Rc::new(RefCell::new(HandlerTable::new())),
        }
    }

    /// Number of calls awaiting resolution.
    pub fn pending_calls(&self) -> usize {
        self.core.borrow().pending.len()
    }

    fn handle_entity(&self, entity: Value) {
        match entity {
            Value::Array(items) => {
                for item in items {
                    self.handle_entity(item);
                }
            }
            Value::Object(obj) => {
                let version_ok =
                    obj.get("jsonrpc").and_then(|v| v.as_str().ok()) == Some("2.0");
                if !version_ok {
                    warn!("entity without jsonrpc 2.0 tag: {}", to_json(&switchboard_common::Value::Object(obj)));
                    return;
                }
                if obj.contains_key("result") || obj.contains_key("error") {
                    self.handle_response(obj);
                } else if obj.contains_key("method") {
                    self.handle_request(obj);
                } else {
                    warn!("invalid JSON-RPC object: {}", to_json(&switchboard_common::Value::Object(obj)));
                }
            }
            other => warn!("unsupported JSON-RPC entity: {}", to_json(&other)),
        }
    }

    /// Resolves a result/error envelope against the pending-call map.
    fn handle_response(&self, mut obj: BTreeMap<String, Value>) {
        let Some(id) = obj.get("id").and_then(|v| v.as_i32().ok()) else {
            warn!("response with missing or non-integer id");
            return;
        };
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        if has_result && has_error {
            warn!(id, "response carries both result and error");
            return;
        }

        // Remove the record and return the wire id to the pool first: the
        // caller may immediately issue a new call and reuse it.
        let pending = {
            let mut core = self.core.borrow_mut();
            match core.pending.remove(&id) {
                Some(pending) => {
                    core.ids.release(id);
                    pending
                }
                None => {
                    drop(core);
                    warn!(id, "no pending call for response");
                    return;
                }
            }
        };

        if has_result {
            let result = obj.remove("result").unwrap_or(Value::Null);
            match pending.caller.upgrade() {
                Some(caller) => caller.borrow_mut().on_result(result, pending.token),
                None => {
                    debug!(procedure = %pending.procedure, "caller gone; result discarded")
                }
            }
        } else {
            let Some(mut error) = obj.remove("error").and_then(|v| v.into_object().ok()) else {
                warn!(id, "malformed error member in response");
                return;
            };
            let code = error.get("code").and_then(|v| v.as_i64().ok());
            let message = error.remove("message").and_then(|v| v.into_string().ok());
            let (Some(code), Some(message)) = (code, message) else {
                warn!(id, "error object missing code or message");
                return;
            };
            let data = error.remove("data");
            match pending.caller.upgrade() {
                Some(caller) => {
                    caller.borrow_mut().on_error(code, &message, data, pending.token)
                }
                None => debug!(procedure = %pending.procedure, "caller gone; error discarded"),
            }
        }
    }

    /// Dispatches an inbound request or notification and queues any response.
    fn handle_request(&self, obj: BTreeMap<String, Value>) {
        let mut response = String::new();
        dispatch_object(&self.handlers, obj, &mut response);
        if !response.is_empty() {
            self.core.borrow_mut().out.push_str(&response);
        }
    }

    /// Tears down local state after the transport died or was closed.
    fn drop_connection(&self) {
        let mut core = self.core.borrow_mut();
        if core.state == ConnectionState::NotConnected {
            return;
        }
        core.state = ConnectionState::NotConnected;
        let discarded = core.pending.len();
        // Pending calls are discarded without invoking their callers.
        let ids: Vec<i32> = core.pending.drain().map(|(id, _)| id).collect();
        for id in ids {
            core.ids.release(id);
        }
        core.out.clear();
        core.scanner.reset();
        core.parser.reset();
        info!(discarded, "link down");
    }
}

impl RpcConnection for JsonRpcLink {
    fn call(&self, procedure: &str, args: Vec<Value>, caller: CallerSlot) -> bool {
        let mut core = self.core.borrow_mut();
        if core.state == ConnectionState::NotConnected {
            debug!(procedure, "dropping call on dead link");
            return false;
        }
        let request = match caller {
            Some((caller, token)) => {
                let id = core.ids.acquire();
                core.pending
                    .insert(id, PendingCall { procedure: procedure.to_string(), caller, token });
                make_request(procedure, &args, Some(i64::from(id)))
            }
            None => make_request(procedure, &args, None),
        };
        core.out.push_str(&request);
        true
    }

    fn register_handler(&self, procedure: &str, handler: Handler) -> HandlerToken {
        self.handlers.borrow_mut().register(procedure, handler)
    }

    fn unregister_handler(&self, procedure: &str, token: Option<HandlerToken>) {
        self.handlers.borrow_mut().unregister(procedure, token)
    }

    fn state(&self) -> ConnectionState {
        self.core.borrow().state
    }

    fn update(&self) {
        // Drain the endpoint into complete frames.
        let mut frames = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            if core.state == ConnectionState::NotConnected {
                return;
            }
            let mut chunk = [0u8; RECV_CHUNK];
            loop {
                let read = core.endpoint.recv(&mut chunk);
                if read == 0 {
                    break;
                }
                core.scanner.feed(&chunk[..read], &mut frames);
            }
        }

        // Parse frames while the core is borrowed; parsing never calls out.
        let mut entities = Vec::new();
        if !frames.is_empty() {
            let mut core = self.core.borrow_mut();
            for frame in &frames {
                core.parser.reset();
                match core.parser.parse_bytes(frame) {
                    ParseStatus::Success => {
                        if let Some(entity) = core.parser.take_result() {
                            entities.push(entity);
                        }
                    }
                    _ => warn!("discarding malformed frame: {}", String::from_utf8_lossy(frame)),
                }
            }
            core.parser.reset();
        }

        // Handlers and callers run with the core released, so they may call
        // back into this link.
        for entity in entities {
            self.handle_entity(entity);
        }

        // Flush queued writes and notice transport loss.
        let lost = {
            let mut core = self.core.borrow_mut();
            if !core.out.is_empty() && core.endpoint.is_open() {
                let text = std::mem::take(&mut core.out);
                let sent = core.endpoint.send(text.as_bytes());
                if sent < text.len() {
                    let rest = text[sent..].to_string();
                    core.out.push_str(&rest);
                }
            }
            !core.endpoint.is_open()
        };
        if lost {
            self.drop_connection();
        }
    }

    fn disconnect(&self) {
        self.core.borrow_mut().endpoint.close();
        self.drop_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler;
    use crate::testing::RecordingCaller;
    use switchboard_common::{logging::ensure_test_logging, MemoryEndpoint};

    fn pair() -> (JsonRpcLink, JsonRpcLink) {
        let (a, b) = MemoryEndpoint::pair();
        (JsonRpcLink::new(Box::new(a)), JsonRpcLink::new(Box::new(b)))
    }

    fn pump(links: &[&JsonRpcLink]) {
        for _ in 0..4 {
            for link in links {
                link.update();
            }
        }
    }

    #[test]
    fn test_correlated_call_round_trip() {
        ensure_test_logging(None);
        let (a, b) = pair();
        b.register_handler(
            "sum",
            handler(|_, args| {
                Value::from(args.iter().filter_map(|v| v.as_i64().ok()).sum::<i64>())
            }),
        );

        let caller = RecordingCaller::new();
        assert!(a.call(
            "sum",
            vec![Value::from(1), Value::from(2)],
            Some((RecordingCaller::caller_ref(&caller), 5)),
        ));
        pump(&[&a, &b]);

        assert_eq!(caller.borrow().results, vec![(5, Value::from(3))]);
        assert_eq!(a.pending_calls(), 0);
    }

    #[test]
    fn test_notification_is_fire_and_forget() {
        let (a, b) = pair();
        let hits = Rc::new(RefCell::new(0));
        let hits_in = hits.clone();
        b.register_handler(
            "poke",
            handler(move |_, _| {
                *hits_in.borrow_mut() += 1;
                Value::from("ignored")
            }),
        );

        assert!(a.call("poke", vec![], None));
        pump(&[&a, &b]);

        assert_eq!(*hits.borrow(), 1);
        assert_eq!(a.pending_calls(), 0);
    }

    #[test]
    fn test_method_not_found_reaches_caller_as_error() {
        let (a, b) = pair();
        let caller = RecordingCaller::new();
        a.call("missing", vec![], Some((RecordingCaller::caller_ref(&caller), 9)));
        pump(&[&a, &b]);

        let recorded = caller.borrow();
        assert_eq!(recorded.errors.len(), 1);
        let (token, code, message) = &recorded.errors[0];
        assert_eq!(*token, 9);
        assert_eq!(*code, -32601);
        assert_eq!(message, "Method not found");
    }

    #[test]
    fn test_dropped_caller_discards_result_silently() {
        let (a, b) = pair();
        b.register_handler("echo", handler(|_, mut args| args.pop().unwrap_or(Value::Null)));

        let caller = RecordingCaller::new();
        a.call("echo", vec![Value::from(1)], Some((RecordingCaller::caller_ref(&caller), 1)));
        drop(caller);
        pump(&[&a, &b]);

        assert_eq!(a.pending_calls(), 0);
    }

    #[test]
    fn test_wire_id_is_reused_after_resolution() {
        let (a, b) = pair();
        b.register_handler("echo", handler(|_, mut args| args.pop().unwrap_or(Value::Null)));

        let caller = RecordingCaller::new();
        for round in 0..3 {
            a.call(
                "echo",
                vec![Value::from(round)],
                Some((RecordingCaller::caller_ref(&caller), round as u32)),
            );
            pump(&[&a, &b]);
        }
        let recorded = caller.borrow();
        assert_eq!(recorded.results.len(), 3);
        // Every round resolved even though the same wire id served all three.
        for (round, (token, value)) in recorded.results.iter().enumerate() {
            assert_eq!(*token, round as u32);
            assert_eq!(*value, Value::from(round as i64));
        }
    }

    #[test]
    fn test_disconnect_rejects_calls_and_discards_pending() {
        let (a, b) = pair();
        let caller = RecordingCaller::new();
        a.call("void", vec![], Some((RecordingCaller::caller_ref(&caller), 1)));
        assert_eq!(a.pending_calls(), 1);

        a.disconnect();
        assert_eq!(a.state(), ConnectionState::NotConnected);
        assert_eq!(a.pending_calls(), 0);
        assert!(!a.call("void", vec![], None));

        // the other side notices on its next poll
        b.update();
        assert_eq!(b.state(), ConnectionState::NotConnected);

        // the never-resolved call must not have produced a callback
        assert!(caller.borrow().results.is_empty());
        assert!(caller.borrow().errors.is_empty());
    }

    #[test]
    fn test_handler_may_call_back_into_the_link() {
        let (a, b) = pair();
        let b_clone = b.clone();
        b.register_handler(
            "chain",
            handler(move |_, _| {
                // a handler queueing a notification on its own link mid-dispatch
                b_clone.call("note", vec![], None);
                Value::from(true)
            }),
        );
        let notes = Rc::new(RefCell::new(0));
        let notes_in = notes.clone();
        a.register_handler(
            "note",
            handler(move |_, _| {
                *notes_in.borrow_mut() += 1;
                Value::Null
            }),
        );

        let caller = RecordingCaller::new();
        a.call("chain", vec![], Some((RecordingCaller::caller_ref(&caller), 2)));
        pump(&[&a, &b]);

        assert_eq!(caller.borrow().results, vec![(2, Value::from(true))]);
        assert_eq!(*notes.borrow(), 1);
    }
}
