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

//! The proxy hub: the rendezvous point physical peers attach to.
//!
//! The hub tracks advertised services, brokers circuits between two physical
//! connections and forwards calls and results across them. It is itself just
//! a set of RPC handlers plus a [`ProcedureCaller`] for the calls it forwards;
//! all activity is driven by [`ProxyHub::update`] polls.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
    rc::{Rc, Weak},
};

use itertools::Itertools;
use switchboard_common::{IdGenerator, Value};
use switchboard_wire::{handler, CallerRef, HandlerToken, ProcedureCaller, RpcConnection};
use tracing::{debug, info, warn};

use crate::names;

/// Id of an attached physical connection, local to one hub.
type PeerId = u64;

struct PeerEntry {
    link: Rc<dyn RpcConnection>,
    services: HashSet<String>,
    circuits: Vec<i32>,
    handler_tokens: Vec<(&'static str, HandlerToken)>,
}

/// A brokered connection between two attached peers.
struct Circuit {
    initiator: PeerId,
    target: PeerId,
    calls: Vec<i32>,
}

/// A call in flight between two peers.
struct ForwardedCall {
    /// Receives the `returnResult` once the target answers.
    originator: PeerId,
    circuit: i32,
}

struct HubCore {
    self_weak: Weak<RefCell<HubCore>>,
    peers: BTreeMap<PeerId, PeerEntry>,
    next_peer: PeerId,
    /// service name -> offering peer; later registrations overwrite silently
    services: BTreeMap<String, PeerId>,
    circuits: HashMap<i32, Circuit>,
    circuit_ids: IdGenerator,
    calls: HashMap<i32, ForwardedCall>,
    call_ids: IdGenerator,
}

/// The rendezvous hub. See the [module docs](self).
pub struct ProxyHub {
    core: Rc<RefCell<HubCore>>,
}

impl Default for ProxyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        let core = Rc::new(RefCell::new(HubCore {
            self_weak: Weak::new(),
            peers: BTreeMap::new(),
            next_peer: 0,
            services: BTreeMap::new(),
            circuits: HashMap::new(),
            circuit_ids: IdGenerator::new(),
            calls: HashMap::new(),
            call_ids: IdGenerator::new(),
        }));
        core.borrow_mut().self_weak = Rc::downgrade(&core);
        Self { core }
    }

    /// Attaches a freshly established physical connection and registers the
    /// control procedures on it.
    pub fn attach(&self, link: Rc<dyn RpcConnection>) {
        let peer = {
            let mut core = self.core.borrow_mut();
            let peer = core.next_peer;
            core.next_peer += 1;
            core.peers.insert(
                peer,
                PeerEntry {
                    link: link.clone(),
                    services: HashSet::new(),
                    circuits: Vec::new(),
                    handler_tokens: Vec::new(),
                },
            );
            peer
        };

        let weak = Rc::downgrade(&self.core);
        let mut tokens = Vec::new();

        let core = weak.clone();
        tokens.push((
            names::REGISTER_SERVICE,
            link.register_handler(
                names::REGISTER_SERVICE,
                handler(move |_, args| match core.upgrade() {
                    Some(core) => core.borrow_mut().register_service(peer, args),
                    None => Value::from(false),
                }),
            ),
        ));

        let core = weak.clone();
        tokens.push((
            names::GET_SERVICES,
            link.register_handler(
                names::GET_SERVICES,
                handler(move |_, _| match core.upgrade() {
                    Some(core) => core.borrow().service_list(),
                    None => Value::Array(Vec::new()),
                }),
            ),
        ));

        let core = weak.clone();
        tokens.push((
            names::CONNECT_TO_SERVICE,
            link.register_handler(
                names::CONNECT_TO_SERVICE,
                handler(move |_, args| match core.upgrade() {
                    Some(core) => core.borrow_mut().connect_to_service(peer, args),
                    None => Value::from(-1),
                }),
            ),
        ));

        let core = weak.clone();
        tokens.push((
            names::DISCONNECT,
            link.register_handler(
                names::DISCONNECT,
                handler(move |_, args| match core.upgrade() {
                    Some(core) => core.borrow_mut().disconnect_circuit(args),
                    None => Value::from(false),
                }),
            ),
        ));

        let core = weak;
        tokens.push((
            names::CALL,
            link.register_handler(
                names::CALL,
                handler(move |_, args| match core.upgrade() {
                    Some(core) => core.borrow_mut().forward_call(peer, args),
                    None => Value::from(-1),
                }),
            ),
        ));

        let mut core = self.core.borrow_mut();
        if let Some(entry) = core.peers.get_mut(&peer) {
            entry.handler_tokens = tokens;
        }
        info!(peer, "peer attached");
    }

    /// Polls every attached connection and sweeps out the physically dead
    /// ones, tearing down their services and circuits.
    pub fn update(&self) {
        let links: Vec<Rc<dyn RpcConnection>> =
            self.core.borrow().peers.values().map(|p| p.link.clone()).collect();
        for link in &links {
            if link.is_connected() {
                link.update();
            }
        }

        let dead: Vec<PeerId> = self
            .core
            .borrow()
            .peers
            .iter()
            .filter(|(_, p)| !p.link.is_connected())
            .map(|(id, _)| *id)
            .collect();
        for peer in dead {
            self.core.borrow_mut().detach_peer(peer);
        }
    }

    /// Number of currently attached peers.
    pub fn peer_count(&self) -> usize {
        self.core.borrow().peers.len()
    }

    /// Currently registered service names.
    pub fn services(&self) -> Vec<String> {
        self.core.borrow().services.keys().cloned().collect()
    }
}

impl Drop for ProxyHub {
    fn drop(&mut self) {
        let core = self.core.borrow();
        for entry in core.peers.values() {
            for (name, token) in &entry.handler_tokens {
                entry.link.unregister_handler(name, Some(*token));
            }
        }
    }
}

impl HubCore {
    fn register_service(&mut self, peer: PeerId, args: Vec<Value>) -> Value {
        // shape-checked: the hub never trusts its peers
        let name = match args.first().map(|v| v.as_str()) {
            Some(Ok(name)) if args.len() == 1 => name.to_string(),
            _ => return Value::from(false),
        };
        if let Some(previous) = self.services.insert(name.clone(), peer) {
            if previous != peer {
                if let Some(entry) = self.peers.get_mut(&previous) {
                    entry.services.remove(&name);
                }
                debug!(service = %name, previous, peer, "service re-registered");
            }
        }
        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.services.insert(name.clone());
        }
        info!(service = %name, peer, "service registered");
        Value::from(true)
    }

    fn service_list(&self) -> Value {
        Value::Array(self.services.keys().map(|name| Value::from(name.as_str())).collect())
    }

    fn connect_to_service(&mut self, initiator: PeerId, args: Vec<Value>) -> Value {
        let name = match args.first().map(|v| v.as_str()) {
            Some(Ok(name)) if args.len() == 1 => name.to_string(),
            _ => return Value::from(-1),
        };
        let Some(&target) = self.services.get(&name) else {
            debug!(service = %name, "connect to unknown service");
            return Value::from(-1);
        };

        let id = self.circuit_ids.acquire();
        self.circuits.insert(id, Circuit { initiator, target, calls: Vec::new() });
        if let Some(entry) = self.peers.get_mut(&initiator) {
            entry.circuits.push(id);
        }
        if let Some(entry) = self.peers.get_mut(&target) {
            entry.circuits.push(id);
        }

        let target_link = self.peers.get(&target).map(|entry| entry.link.clone());
        if let Some(link) = target_link {
            link.call(
                names::CONNECT_PEER,
                vec![Value::from(name.as_str()), Value::from(id)],
                None,
            );
        }
        info!(service = %name, circuit = id, initiator, target, "circuit established");
        Value::from(id)
    }

    fn disconnect_circuit(&mut self, args: Vec<Value>) -> Value {
        match args.first().map(|v| v.as_i32()) {
            Some(Ok(id)) if args.len() == 1 => Value::from(self.remove_circuit(id)),
            _ => Value::from(false),
        }
    }

    /// Notifies both live sides, releases the circuit id and every call id
    /// still scoped to the circuit.
    fn remove_circuit(&mut self, id: i32) -> bool {
        let Some(circuit) = self.circuits.remove(&id) else {
            return false;
        };
        for side in [circuit.initiator, circuit.target] {
            if let Some(entry) = self.peers.get_mut(&side) {
                entry.circuits.retain(|c| *c != id);
                // a side whose transport already died is skipped
                if entry.link.is_connected() {
                    entry.link.call(names::DISCONNECT_PEER, vec![Value::from(id)], None);
                }
            }
        }
        self.circuit_ids.release(id);
        for call_id in circuit.calls {
            self.calls.remove(&call_id);
            self.call_ids.release(call_id);
        }
        info!(circuit = id, "circuit removed");
        true
    }

    fn forward_call(&mut self, from: PeerId, args: Vec<Value>) -> Value {
        let mut args = args.into_iter();
        let (circuit_id, procedure, params) = match (args.next(), args.next(), args.next()) {
            (Some(id), Some(procedure @ Value::Str(_)), Some(params @ Value::Array(_)))
                if args.next().is_none() =>
            {
                match id.as_i32() {
                    Ok(id) => (id, procedure, params),
                    Err(_) => return Value::from(-1),
                }
            }
            _ => return Value::from(-1),
        };

        let Some(circuit) = self.circuits.get_mut(&circuit_id) else {
            debug!(circuit = circuit_id, "call on unknown circuit");
            return Value::from(-1);
        };
        let target =
            if circuit.initiator == from { circuit.target } else { circuit.initiator };

        let call_id = self.call_ids.acquire();
        circuit.calls.push(call_id);
        self.calls.insert(call_id, ForwardedCall { originator: from, circuit: circuit_id });

        let caller: CallerRef = self.self_weak.clone();
        if let Some(entry) = self.peers.get(&target) {
            entry.link.call(
                names::CALL,
                vec![Value::from(circuit_id), procedure, params],
                Some((caller, call_id as u32)),
            );
        }
        Value::from(call_id)
    }

    fn detach_peer(&mut self, peer: PeerId) {
        let Some(entry) = self.peers.remove(&peer) else {
            return;
        };
        for (name, token) in &entry.handler_tokens {
            entry.link.unregister_handler(name, Some(*token));
        }
        for service in &entry.services {
            if self.services.get(service) == Some(&peer) {
                self.services.remove(service);
            }
        }
        if !entry.services.is_empty() {
            info!(peer, services = %entry.services.iter().join(", "), "services withdrawn");
        }
        for circuit in entry.circuits.clone() {
            self.remove_circuit(circuit);
        }
        info!(peer, "peer detached");
    }
}

impl ProcedureCaller for HubCore {
    /// A forwarded call came back from its target: route the value to the
    /// originator and recycle the call id.
    fn on_result(&mut self, result: Value, token: u32) {
        let call_id = token as i32;
        let Some(forwarded) = self.calls.remove(&call_id) else {
            debug!(call_id, "result for unknown forwarded call");
            return;
        };
        if let Some(circuit) = self.circuits.get_mut(&forwarded.circuit) {
            circuit.calls.retain(|c| *c != call_id);
        }
        if let Some(entry) = self.peers.get(&forwarded.originator) {
            entry.link.call(
                names::RETURN_RESULT,
                vec![Value::from(call_id), result],
                None,
            );
        }
        self.call_ids.release(call_id);
    }

    fn on_error(&mut self, code: i64, message: &str, _data: Option<Value>, token: u32) {
        // The target errored instead of answering. There is no error leg in
        // the peer protocol; the originator's call stays unresolved until its
        // circuit goes away.
        let call_id = token as i32;
        warn!(call_id, code, error = message, "forwarded call failed at target");
        if let Some(forwarded) = self.calls.remove(&call_id) {
            if let Some(circuit) = self.circuits.get_mut(&forwarded.circuit) {
                circuit.calls.retain(|c| *c != call_id);
            }
            self.call_ids.release(call_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_common::{logging::ensure_test_logging, MemoryEndpoint};
    use switchboard_wire::{testing::RecordingCaller, JsonRpcLink};

    /// Hub plus N raw far-side links playing the role of peers.
    fn hub_with_links(n: usize) -> (ProxyHub, Vec<JsonRpcLink>) {
        let hub = ProxyHub::new();
        let mut far = Vec::new();
        for _ in 0..n {
            let (a, b) = MemoryEndpoint::pair();
            hub.attach(Rc::new(JsonRpcLink::new(Box::new(a))));
            far.push(JsonRpcLink::new(Box::new(b)));
        }
        (hub, far)
    }

    fn pump(hub: &ProxyHub, far: &[JsonRpcLink]) {
        for _ in 0..5 {
            hub.update();
            for link in far {
                link.update();
            }
        }
    }

    #[test]
    fn test_register_and_list_services() {
        ensure_test_logging(None);
        let (hub, far) = hub_with_links(2);
        let caller = RecordingCaller::new();

        far[0].call(
            names::REGISTER_SERVICE,
            vec![Value::from("camera")],
            Some((RecordingCaller::caller_ref(&caller), 1)),
        );
        pump(&hub, &far);
        assert_eq!(caller.borrow().results, vec![(1, Value::from(true))]);

        far[1].call(
            names::GET_SERVICES,
            vec![],
            Some((RecordingCaller::caller_ref(&caller), 2)),
        );
        pump(&hub, &far);
        assert_eq!(caller.borrow().results[1], (2, Value::from(vec!["camera"])));
    }

    #[test]
    fn test_register_rejects_bad_arguments() {
        let (hub, far) = hub_with_links(1);
        let caller = RecordingCaller::new();
        far[0].call(
            names::REGISTER_SERVICE,
            vec![Value::from(7)],
            Some((RecordingCaller::caller_ref(&caller), 1)),
        );
        pump(&hub, &far);
        assert_eq!(caller.borrow().results, vec![(1, Value::from(false))]);
    }

    #[test]
    fn test_connect_to_unknown_service_returns_minus_one() {
        let (hub, far) = hub_with_links(1);
        let caller = RecordingCaller::new();
        far[0].call(
            names::CONNECT_TO_SERVICE,
            vec![Value::from("ghost")],
            Some((RecordingCaller::caller_ref(&caller), 1)),
        );
        pump(&hub, &far);
        assert_eq!(caller.borrow().results, vec![(1, Value::from(-1))]);
    }

    #[test]
    fn test_connect_notifies_target_peer() {
        let (hub, far) = hub_with_links(2);
        let caller = RecordingCaller::new();

        // far[0] offers, and watches for connectPeer
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in = seen.clone();
        far[0].register_handler(
            names::CONNECT_PEER,
            handler(move |_, args| {
                seen_in.borrow_mut().push(args);
                Value::Null
            }),
        );
        far[0].call(names::REGISTER_SERVICE, vec![Value::from("svc")], None);
        pump(&hub, &far);

        far[1].call(
            names::CONNECT_TO_SERVICE,
            vec![Value::from("svc")],
            Some((RecordingCaller::caller_ref(&caller), 1)),
        );
        pump(&hub, &far);

        let circuit = caller.borrow().results[0].1.as_i32().unwrap();
        assert!(circuit >= 0);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0], Value::from("svc"));
        assert_eq!(seen[0][1], Value::from(circuit));
    }

    #[test]
    fn test_call_is_forwarded_and_result_returned() {
        let (hub, far) = hub_with_links(2);
        let caller = RecordingCaller::new();

        far[0].call(names::REGISTER_SERVICE, vec![Value::from("svc")], None);
        far[0].register_handler(names::CONNECT_PEER, handler(|_, _| Value::Null));
        // the service side answers forwarded calls
        far[0].register_handler(
            names::CALL,
            handler(|_, mut args| {
                let params = args.pop().and_then(|v| v.into_array().ok()).unwrap_or_default();
                Value::from(params.iter().filter_map(|v| v.as_i64().ok()).sum::<i64>())
            }),
        );
        pump(&hub, &far);

        far[1].call(
            names::CONNECT_TO_SERVICE,
            vec![Value::from("svc")],
            Some((RecordingCaller::caller_ref(&caller), 1)),
        );
        pump(&hub, &far);
        let circuit = caller.borrow().results[0].1.as_i32().unwrap();

        // returnResult lands back on the initiator side
        let returned = Rc::new(RefCell::new(Vec::new()));
        let returned_in = returned.clone();
        far[1].register_handler(
            names::RETURN_RESULT,
            handler(move |_, args| {
                returned_in.borrow_mut().push(args);
                Value::Null
            }),
        );

        far[1].call(
            names::CALL,
            vec![
                Value::from(circuit),
                Value::from("sum"),
                Value::from(vec![Value::from(2), Value::from(3)]),
            ],
            Some((RecordingCaller::caller_ref(&caller), 2)),
        );
        pump(&hub, &far);

        // the call id came back, then the result arrived via returnResult
        let call_id = caller.borrow().results[1].1.as_i32().unwrap();
        assert!(call_id >= 0);
        let returned = returned.borrow();
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0][0], Value::from(call_id));
        assert_eq!(returned[0][1], Value::from(5));
    }

    #[test]
    fn test_call_id_is_reused_after_completion() {
        let (hub, far) = hub_with_links(2);
        let caller = RecordingCaller::new();

        far[0].call(names::REGISTER_SERVICE, vec![Value::from("svc")], None);
        far[0].register_handler(names::CONNECT_PEER, handler(|_, _| Value::Null));
        far[0].register_handler(names::CALL, handler(|_, _| Value::from("ok")));
        far[1].register_handler(names::RETURN_RESULT, handler(|_, _| Value::Null));
        pump(&hub, &far);

        far[1].call(
            names::CONNECT_TO_SERVICE,
            vec![Value::from("svc")],
            Some((RecordingCaller::caller_ref(&caller), 1)),
        );
        pump(&hub, &far);
        let circuit = caller.borrow().results[0].1.as_i32().unwrap();

        let call_args = || {
            vec![Value::from(circuit), Value::from("p"), Value::Array(Vec::new())]
        };
        far[1].call(names::CALL, call_args(), Some((RecordingCaller::caller_ref(&caller), 2)));
        pump(&hub, &far);
        far[1].call(names::CALL, call_args(), Some((RecordingCaller::caller_ref(&caller), 3)));
        pump(&hub, &far);

        let results = &caller.borrow().results;
        // the first forwarded call completed, so its id serves the second one
        assert_eq!(results[1].1, results[2].1);
    }

    #[test]
    fn test_dead_peer_is_swept_with_services_and_circuits() {
        let (hub, far) = hub_with_links(2);
        let caller = RecordingCaller::new();

        far[0].call(names::REGISTER_SERVICE, vec![Value::from("svc")], None);
        far[0].register_handler(names::CONNECT_PEER, handler(|_, _| Value::Null));
        pump(&hub, &far);

        let dropped = Rc::new(RefCell::new(Vec::new()));
        let dropped_in = dropped.clone();
        far[1].register_handler(
            names::DISCONNECT_PEER,
            handler(move |_, args| {
                dropped_in.borrow_mut().push(args);
                Value::Null
            }),
        );
        far[1].call(
            names::CONNECT_TO_SERVICE,
            vec![Value::from("svc")],
            Some((RecordingCaller::caller_ref(&caller), 1)),
        );
        pump(&hub, &far);
        let circuit = caller.borrow().results[0].1.as_i32().unwrap();

        far[0].disconnect();
        pump(&hub, &far);

        assert_eq!(hub.peer_count(), 1);
        assert!(hub.services().is_empty());
        // the surviving side was told its circuit is gone
        assert_eq!(dropped.borrow().as_slice(), &[vec![Value::from(circuit)]]);

        // the freed circuit id is available again after re-registration
        far[1].call(names::REGISTER_SERVICE, vec![Value::from("other")], None);
        far[1].register_handler(names::CONNECT_PEER, handler(|_, _| Value::Null));
        pump(&hub, &far);
        far[1].call(
            names::CONNECT_TO_SERVICE,
            vec![Value::from("other")],
            Some((RecordingCaller::caller_ref(&caller), 2)),
        );
        pump(&hub, &far);
        assert_eq!(caller.borrow().results[1].1, Value::from(circuit));
    }
}
