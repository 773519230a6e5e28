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

//! The proxy peer: multiplexes virtual connections over one physical link.
//!
//! A [`ProxyPeer`] wraps the physical connection to a hub and hands out
//! [`VirtualConnection`]s, each of which behaves like an ordinary
//! [`RpcConnection`] while its traffic is tunneled through the hub. A
//! connection requested with [`ProxyPeer::connect_to_peer`] starts out
//! Connecting under a locally scoped pending id and is re-keyed under the
//! hub-assigned id once `connectToService` resolves; inbound connections
//! arrive Connected through [`ProxyPeer::accept`].

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    rc::{Rc, Weak},
};

use switchboard_common::{IdGenerator, Value};
use switchboard_wire::{
    handler, CallerRef, CallerSlot, ConnectionState, Handler, HandlerTable, HandlerToken,
    ProcedureCaller, RpcConnection,
};
use tracing::{debug, info, warn};

use crate::names;

type SharedPeerCore = Rc<RefCell<PeerCore>>;
type WeakPeerCore = Weak<RefCell<PeerCore>>;
type ServiceCallback = Box<dyn FnOnce(&[String])>;

/// What a correlated control call to the hub was for.
enum Correlation {
    /// `connectToService`; resolves a pending virtual connection.
    Connect { local_id: i32 },
    /// `getServices`; refreshes the cached list and serves the waiters.
    Services,
    /// `call`; the hub answers with the call id (or -1).
    Dispatch { app: CallerSlot, circuit: i32 },
}

/// A forwarded call that got its hub call id and now awaits `returnResult`.
struct AppCall {
    app: CallerSlot,
    circuit: i32,
}

/// Work that must run outside the core borrow (application callbacks).
enum Deferred {
    ServiceList(ServiceCallback),
    CallRejected { caller: CallerRef, token: u32, circuit: i32 },
}

struct PeerCore {
    link: Rc<dyn RpcConnection>,
    self_weak: WeakPeerCore,
    own_services: HashSet<String>,
    /// Connecting, keyed by locally scoped pending id.
    pending: HashMap<i32, VirtualConnection>,
    /// Connected, keyed by hub-assigned id.
    active: HashMap<i32, VirtualConnection>,
    accepted: VecDeque<VirtualConnection>,
    local_ids: IdGenerator,
    tokens: IdGenerator,
    correlations: HashMap<u32, Correlation>,
    /// hub call id -> caller awaiting `returnResult`
    calls: HashMap<i32, AppCall>,
    remote_services: Vec<String>,
    service_waiters: Vec<ServiceCallback>,
    deferred: Vec<Deferred>,
    handler_tokens: Vec<(&'static str, HandlerToken)>,
}

impl PeerCore {
    fn caller_ref(&self) -> CallerRef {
        let caller: CallerRef = self.self_weak.clone();
        caller
    }

    /// The physical link died: every virtual connection fails, every pending
    /// record is discarded without resolution.
    fn fail_all(&mut self) {
        let had_connections = !self.active.is_empty() || !self.pending.is_empty();
        for (_, vc) in self.active.drain() {
            vc.mark_not_connected();
        }
        let pending: Vec<(i32, VirtualConnection)> = self.pending.drain().collect();
        let pending_ids: HashSet<i32> = pending.iter().map(|(local_id, _)| *local_id).collect();
        for (local_id, vc) in pending {
            vc.mark_not_connected();
            self.local_ids.release(local_id);
        }
        for vc in self.accepted.drain(..) {
            vc.mark_not_connected();
        }
        let correlations: Vec<(u32, Correlation)> = self.correlations.drain().collect();
        for (token, correlation) in correlations {
            self.tokens.release(token as i32);
            // a connect whose pending record was locally disconnected still
            // owns its id; everything else released through the drain above
            if let Correlation::Connect { local_id } = correlation {
                if !pending_ids.contains(&local_id) {
                    self.local_ids.release(local_id);
                }
            }
        }
        self.calls.clear();
        self.remote_services.clear();
        self.service_waiters.clear();
        if had_connections {
            info!("physical link lost; all virtual connections failed");
        }
    }
}

impl ProcedureCaller for PeerCore {
    fn on_result(&mut self, result: Value, token: u32) {
        let Some(correlation) = self.correlations.remove(&token) else {
            debug!(token, "result for unknown control call");
            return;
        };
        self.tokens.release(token as i32);
        match correlation {
            Correlation::Connect { local_id } => {
                let Some(vc) = self.pending.remove(&local_id) else {
                    // disconnected locally while the request was in flight;
                    // the hub may have opened a circuit regardless
                    self.local_ids.release(local_id);
                    if let Ok(id) = result.as_i32() {
                        if id >= 0 {
                            self.link.call(names::DISCONNECT, vec![Value::from(id)], None);
                        }
                    }
                    return;
                };
                self.local_ids.release(local_id);
                match result.as_i32() {
                    // a negative id is a refusal, never a usable connection
                    Ok(id) if id >= 0 => {
                        vc.promote(id);
                        self.active.insert(id, vc);
                    }
                    _ => {
                        warn!(service = %vc.service_name(), "connect refused by hub");
                        vc.mark_not_connected();
                    }
                }
            }
            Correlation::Services => {
                self.remote_services = result
                    .into_array()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|v| v.into_string().ok())
                    .collect();
                let waiters = std::mem::take(&mut self.service_waiters);
                self.deferred.extend(waiters.into_iter().map(Deferred::ServiceList));
            }
            Correlation::Dispatch { app, circuit } => match result.as_i32() {
                Ok(call_id) if call_id >= 0 => {
                    // a circuit torn down meanwhile forcibly released its
                    // calls; the record is dropped without resolution
                    if self.active.contains_key(&circuit) {
                        self.calls.insert(call_id, AppCall { app, circuit });
                    } else {
                        debug!(circuit, call_id, "call resolved after its circuit died");
                    }
                }
                _ => {
                    debug!(circuit, "hub rejected forwarded call");
                    if let Some((caller, token)) = app {
                        self.deferred.push(Deferred::CallRejected { caller, token, circuit });
                    }
                }
            },
        }
    }

    fn on_error(&mut self, code: i64, message: &str, _data: Option<Value>, token: u32) {
        warn!(code, error = message, "proxy control call failed");
        let Some(correlation) = self.correlations.remove(&token) else {
            return;
        };
        self.tokens.release(token as i32);
        match correlation {
            Correlation::Connect { local_id } => {
                if let Some(vc) = self.pending.remove(&local_id) {
                    vc.mark_not_connected();
                }
                self.local_ids.release(local_id);
            }
            Correlation::Services => {}
            Correlation::Dispatch { app, circuit } => {
                if let Some((caller, token)) = app {
                    self.deferred.push(Deferred::CallRejected { caller, token, circuit });
                }
            }
        }
    }
}

/// A peer endpoint on one physical connection to a hub.
pub struct ProxyPeer {
    core: SharedPeerCore,
}

impl ProxyPeer {
    /// Wraps the established physical connection to a hub and registers the
    /// peer-side control handlers on it.
    pub fn new(link: Rc<dyn RpcConnection>) -> Self {
        let core = Rc::new(RefCell::new(PeerCore {
            link: link.clone(),
            self_weak: Weak::new(),
            own_services: HashSet::new(),
            pending: HashMap::new(),
            active: HashMap::new(),
            accepted: VecDeque::new(),
            local_ids: IdGenerator::new(),
            tokens: IdGenerator::new(),
            correlations: HashMap::new(),
            calls: HashMap::new(),
            remote_services: Vec::new(),
            service_waiters: Vec::new(),
            deferred: Vec::new(),
            handler_tokens: Vec::new(),
        }));
        core.borrow_mut().self_weak = Rc::downgrade(&core);

        let mut tokens = Vec::new();
        tokens.push((
            names::CONNECT_PEER,
            link.register_handler(names::CONNECT_PEER, on_connect_peer(Rc::downgrade(&core))),
        ));
        tokens.push((
            names::DISCONNECT_PEER,
            link.register_handler(
                names::DISCONNECT_PEER,
                on_disconnect_peer(Rc::downgrade(&core)),
            ),
        ));
        tokens.push((
            names::CALL,
            link.register_handler(names::CALL, on_inbound_call(Rc::downgrade(&core))),
        ));
        tokens.push((
            names::RETURN_RESULT,
            link.register_handler(names::RETURN_RESULT, on_return_result(Rc::downgrade(&core))),
        ));
        core.borrow_mut().handler_tokens = tokens;

        Self { core }
    }

    /// Offers a service under `name`. Other peers may connect to it; inbound
    /// connections surface through [`accept`](Self::accept).
    pub fn register_service(&self, name: &str) {
        let link = {
            let mut core = self.core.borrow_mut();
            core.own_services.insert(name.to_string());
            core.link.clone()
        };
        link.call(names::REGISTER_SERVICE, vec![Value::from(name)], None);
    }

    /// Requests a circuit to `service`. The returned connection is Connecting
    /// until the hub answers; it becomes Connected (or NotConnected on
    /// refusal) during a later [`update`](Self::update).
    pub fn connect_to_peer(&self, service: &str) -> VirtualConnection {
        let (vc, link, slot) = {
            let mut core = self.core.borrow_mut();
            let local_id = core.local_ids.acquire();
            let vc = VirtualConnection::connecting(core.self_weak.clone(), service, local_id);
            core.pending.insert(local_id, vc.clone());
            let token = core.tokens.acquire() as u32;
            core.correlations.insert(token, Correlation::Connect { local_id });
            (vc, core.link.clone(), (core.caller_ref(), token))
        };
        let sent =
            link.call(names::CONNECT_TO_SERVICE, vec![Value::from(service)], Some(slot.clone()));
        if !sent {
            let mut core = self.core.borrow_mut();
            core.correlations.remove(&slot.1);
            core.tokens.release(slot.1 as i32);
            let local_id = vc.connection_id();
            if core.pending.remove(&local_id).is_some() {
                core.local_ids.release(local_id);
            }
            vc.mark_not_connected();
        }
        vc
    }

    /// Takes the next inbound connection, if any arrived. Inbound connections
    /// are already Connected: the hub only announces them after establishing
    /// the circuit.
    pub fn accept(&self) -> Option<VirtualConnection> {
        self.core.borrow_mut().accepted.pop_front()
    }

    /// Asynchronously fetches the hub's service list; `on_received` runs
    /// during a later [`update`](Self::update) with the fresh list.
    pub fn request_services(&self, on_received: impl FnOnce(&[String]) + 'static) {
        let (link, slot) = {
            let mut core = self.core.borrow_mut();
            let token = core.tokens.acquire() as u32;
            core.correlations.insert(token, Correlation::Services);
            core.service_waiters.push(Box::new(on_received));
            (core.link.clone(), (core.caller_ref(), token))
        };
        let sent = link.call(names::GET_SERVICES, Vec::new(), Some(slot.clone()));
        if !sent {
            let mut core = self.core.borrow_mut();
            core.correlations.remove(&slot.1);
            core.tokens.release(slot.1 as i32);
            core.service_waiters.pop();
        }
    }

    /// The service list from the most recent answer.
    pub fn services(&self) -> Vec<String> {
        self.core.borrow().remote_services.clone()
    }

    /// Liveness of the underlying physical connection.
    pub fn link_state(&self) -> ConnectionState {
        self.core.borrow().link.state()
    }

    /// Polls the physical connection, then runs any application callbacks
    /// that resolved during the poll. Virtual connections are updated
    /// through here; they need no polling of their own.
    pub fn update(&self) {
        let link = self.core.borrow().link.clone();
        link.update();
        if !link.is_connected() {
            self.core.borrow_mut().fail_all();
        }
        loop {
            let deferred = std::mem::take(&mut self.core.borrow_mut().deferred);
            if deferred.is_empty() {
                break;
            }
            for item in deferred {
                match item {
                    Deferred::ServiceList(callback) => {
                        let snapshot = self.core.borrow().remote_services.clone();
                        callback(&snapshot);
                    }
                    Deferred::CallRejected { caller, token, circuit } => {
                        if let Some(caller) = caller.upgrade() {
                            caller.borrow_mut().on_error(
                                -1,
                                "unknown connection",
                                None,
                                token,
                            );
                        } else {
                            debug!(circuit, "rejected call's caller is gone");
                        }
                    }
                }
            }
        }
    }
}

impl Drop for ProxyPeer {
    fn drop(&mut self) {
        let core = self.core.borrow();
        for (name, token) in &core.handler_tokens {
            core.link.unregister_handler(name, Some(*token));
        }
    }
}

// ------------------------------------------------- peer-side control handlers

fn on_connect_peer(weak: WeakPeerCore) -> Handler {
    handler(move |_, args| {
        let Some(core_rc) = weak.upgrade() else {
            return Value::Null;
        };
        let mut args = args.into_iter();
        let (Some(Ok(service)), Some(Ok(id))) = (
            args.next().map(|v| v.into_string()),
            args.next().map(|v| v.as_i32()),
        ) else {
            warn!("malformed connectPeer");
            return Value::Null;
        };

        let offered = core_rc.borrow().own_services.contains(&service);
        if offered {
            let vc =
                VirtualConnection::connected(Rc::downgrade(&core_rc), &service, id);
            let mut core = core_rc.borrow_mut();
            core.active.insert(id, vc.clone());
            core.accepted.push_back(vc);
            info!(service = %service, circuit = id, "inbound connection");
        } else {
            // not offered here: ask the hub to tear the circuit down again
            warn!(service = %service, circuit = id, "connectPeer for unoffered service");
            let link = core_rc.borrow().link.clone();
            link.call(names::DISCONNECT, vec![Value::from(id)], None);
        }
        Value::Null
    })
}

fn on_disconnect_peer(weak: WeakPeerCore) -> Handler {
    handler(move |_, args| {
        let Some(core_rc) = weak.upgrade() else {
            return Value::Null;
        };
        let Some(Ok(id)) = args.first().map(|v| v.as_i32()) else {
            warn!("malformed disconnectPeer");
            return Value::Null;
        };
        let removed = {
            let mut core = core_rc.borrow_mut();
            let removed = core.active.remove(&id);
            if removed.is_some() {
                // in-flight calls on the circuit are forgotten, not resolved
                core.calls.retain(|_, call| call.circuit != id);
            }
            removed
        };
        match removed {
            // a notification, not a request: no hub interaction from here
            Some(vc) => {
                vc.mark_not_connected();
                debug!(circuit = id, "circuit closed by hub");
            }
            None => debug!(circuit = id, "disconnectPeer for unknown circuit"),
        }
        Value::Null
    })
}

fn on_inbound_call(weak: WeakPeerCore) -> Handler {
    handler(move |_, args| {
        let Some(core_rc) = weak.upgrade() else {
            return Value::Null;
        };
        let mut args = args.into_iter();
        let (Some(Ok(id)), Some(Ok(procedure)), params) = (
            args.next().map(|v| v.as_i32()),
            args.next().map(|v| v.into_string()),
            args.next().map(|v| v.into_array().unwrap_or_default()).unwrap_or_default(),
        ) else {
            warn!("malformed inbound call");
            return Value::Null;
        };

        let vc = core_rc.borrow().active.get(&id).cloned();
        match vc {
            // the handler's return value travels back through the hub's call
            Some(vc) => vc.call_locally(&procedure, params),
            None => {
                debug!(circuit = id, procedure = %procedure, "call for unknown circuit");
                Value::Null
            }
        }
    })
}

fn on_return_result(weak: WeakPeerCore) -> Handler {
    handler(move |_, args| {
        let Some(core_rc) = weak.upgrade() else {
            return Value::Null;
        };
        let mut args = args.into_iter();
        let (Some(Ok(call_id)), Some(result)) =
            (args.next().map(|v| v.as_i32()), args.next())
        else {
            warn!("malformed returnResult");
            return Value::Null;
        };

        let entry = core_rc.borrow_mut().calls.remove(&call_id);
        match entry {
            Some(AppCall { app: Some((caller, token)), .. }) => match caller.upgrade() {
                // the value is moved into the caller, never copied
                Some(caller) => caller.borrow_mut().on_result(result, token),
                None => debug!(call_id, "caller gone; result discarded"),
            },
            Some(AppCall { app: None, .. }) => {}
            None => debug!(call_id, "returnResult for unknown call"),
        }
        Value::Null
    })
}

// ----------------------------------------------------------- virtual circuit

struct VcInner {
    peer: WeakPeerCore,
    service: String,
    /// Locally scoped pending id while Connecting, hub-assigned afterwards.
    id: i32,
    state: ConnectionState,
    handlers: HandlerTable,
}

/// A logical RPC channel to another peer, brokered by the hub.
///
/// Indistinguishable from a direct [`RpcConnection`] to its users: calls are
/// correlated, handlers serve the remote side's calls, disconnects propagate.
/// Clones share the same circuit.
#[derive(Clone)]
pub struct VirtualConnection {
    inner: Rc<RefCell<VcInner>>,
}

impl VirtualConnection {
    fn connecting(peer: WeakPeerCore, service: &str, local_id: i32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(VcInner {
                peer,
                service: service.to_string(),
                id: local_id,
                state: ConnectionState::Connecting,
                handlers: HandlerTable::new(),
            })),
        }
    }

    fn connected(peer: WeakPeerCore, service: &str, id: i32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(VcInner {
                peer,
                service: service.to_string(),
                id,
                state: ConnectionState::Connected,
                handlers: HandlerTable::new(),
            })),
        }
    }

    /// The service this circuit belongs to.
    pub fn service_name(&self) -> String {
        self.inner.borrow().service.clone()
    }

    /// The circuit id: hub-assigned once Connected, locally scoped before.
    pub fn connection_id(&self) -> i32 {
        self.inner.borrow().id
    }

    /// Connecting -> Connected under the hub-assigned id.
    fn promote(&self, id: i32) {
        let mut inner = self.inner.borrow_mut();
        inner.id = id;
        inner.state = ConnectionState::Connected;
    }

    fn mark_not_connected(&self) {
        self.inner.borrow_mut().state = ConnectionState::NotConnected;
    }

    /// Dispatches an inbound forwarded call to the locally registered
    /// handler, answering the hub synchronously.
    fn call_locally(&self, procedure: &str, args: Vec<Value>) -> Value {
        let registered = self.inner.borrow().handlers.get(procedure);
        match registered {
            Some(h) => (&mut *h.borrow_mut())(procedure, args),
            None => {
                debug!(procedure, "no local handler on virtual connection");
                Value::Null
            }
        }
    }
}

impl RpcConnection for VirtualConnection {
    /// Only succeeds while Connected; otherwise the arguments are released
    /// locally and nothing is sent.
    fn call(&self, procedure: &str, args: Vec<Value>, caller: CallerSlot) -> bool {
        let (peer, id, connected) = {
            let inner = self.inner.borrow();
            (inner.peer.clone(), inner.id, inner.state == ConnectionState::Connected)
        };
        if !connected {
            debug!(procedure, "call on unconnected virtual connection dropped");
            return false;
        }
        let Some(core_rc) = peer.upgrade() else {
            return false;
        };

        let (link, slot) = {
            let mut core = core_rc.borrow_mut();
            let token = core.tokens.acquire() as u32;
            core.correlations.insert(token, Correlation::Dispatch { app: caller, circuit: id });
            (core.link.clone(), (core.caller_ref(), token))
        };
        let sent = link.call(
            names::CALL,
            vec![Value::from(id), Value::from(procedure), Value::Array(args)],
            Some(slot.clone()),
        );
        if !sent {
            let mut core = core_rc.borrow_mut();
            core.correlations.remove(&slot.1);
            core.tokens.release(slot.1 as i32);
        }
        sent
    }

    fn register_handler(&self, procedure: &str, handler: Handler) -> HandlerToken {
        self.inner.borrow_mut().handlers.register(procedure, handler)
    }

    fn unregister_handler(&self, procedure: &str, token: Option<HandlerToken>) {
        self.inner.borrow_mut().handlers.unregister(procedure, token)
    }

    fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    /// Virtual connections are driven by their peer's update; this is a
    /// no-op so generic connection users may still call it.
    fn update(&self) {}

    /// Notifies the hub (which in turn notifies the remote side) and tears
    /// down local records of the circuit.
    fn disconnect(&self) {
        let (peer, id, previous) = {
            let mut inner = self.inner.borrow_mut();
            let previous = inner.state;
            inner.state = ConnectionState::NotConnected;
            (inner.peer.clone(), inner.id, previous)
        };
        if previous == ConnectionState::NotConnected {
            return;
        }
        let Some(core_rc) = peer.upgrade() else {
            return;
        };

        // In-flight correlations are left to resolve on their own; resolution
        // notices the circuit is gone and drops the records.
        let link = {
            let mut core = core_rc.borrow_mut();
            match previous {
                ConnectionState::Connected => {
                    core.active.remove(&id);
                    core.calls.retain(|_, call| call.circuit != id);
                }
                ConnectionState::Connecting => {
                    // the pending id stays allocated until the connect
                    // correlation resolves, or two connects could alias
                    core.pending.remove(&id);
                }
                ConnectionState::NotConnected => {}
            }
            core.link.clone()
        };
        if previous == ConnectionState::Connected {
            link.call(names::DISCONNECT, vec![Value::from(id)], None);
        }
        info!(circuit = id, "virtual connection disconnected");
    }
}
