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

//! End-to-end proxy scenarios: a real hub, real peers, in-memory transports.

use std::{cell::RefCell, rc::Rc};

use eyre::{eyre, Result};
use switchboard_common::{logging::ensure_test_logging, Value};
use switchboard_integration_tests::TestNet;
use switchboard_proxy::VirtualConnection;
use switchboard_wire::{handler, testing::RecordingCaller, ConnectionState, RpcConnection};
use tracing::info;

/// Registers `service` on peer 0 and connects peer 1 to it, returning both
/// ends of the established circuit.
fn establish(net: &TestNet, service: &str) -> Result<(VirtualConnection, VirtualConnection)> {
    net.peers[0].register_service(service);
    net.pump();

    let outbound = net.peers[1].connect_to_peer(service);
    assert_eq!(outbound.state(), ConnectionState::Connecting);
    net.pump();

    let inbound =
        net.peers[0].accept().ok_or_else(|| eyre!("no inbound connection on the service side"))?;
    assert_eq!(outbound.state(), ConnectionState::Connected);
    assert_eq!(inbound.state(), ConnectionState::Connected);
    assert_eq!(inbound.connection_id(), outbound.connection_id());
    Ok((outbound, inbound))
}

#[test]
fn test_call_travels_through_the_hub_and_back() -> Result<()> {
    ensure_test_logging(None);
    let net = TestNet::new(2);
    let (outbound, inbound) = establish(&net, "svc")?;

    inbound.register_handler(
        "sum",
        handler(|_, args| Value::from(args.iter().filter_map(|v| v.as_i64().ok()).sum::<i64>())),
    );

    let caller = RecordingCaller::new();
    assert!(outbound.call(
        "sum",
        vec![Value::from(1), Value::from(2)],
        Some((RecordingCaller::caller_ref(&caller), 42)),
    ));
    net.pump();

    assert_eq!(caller.borrow().results, vec![(42, Value::from(3))]);

    // the released call id serves the next call just as well
    assert!(outbound.call(
        "sum",
        vec![Value::from(40), Value::from(2)],
        Some((RecordingCaller::caller_ref(&caller), 43)),
    ));
    net.pump();
    assert_eq!(caller.borrow().results[1], (43, Value::from(42)));
    Ok(())
}

#[test]
fn test_calls_flow_in_both_directions() -> Result<()> {
    ensure_test_logging(None);
    let net = TestNet::new(2);
    let (outbound, inbound) = establish(&net, "svc")?;

    inbound.register_handler("ping", handler(|_, _| Value::from("pong")));
    outbound.register_handler("who", handler(|_, _| Value::from("initiator")));

    let caller = RecordingCaller::new();
    outbound.call("ping", vec![], Some((RecordingCaller::caller_ref(&caller), 1)));
    inbound.call("who", vec![], Some((RecordingCaller::caller_ref(&caller), 2)));
    net.pump();

    let results = caller.borrow().results.clone();
    assert!(results.contains(&(1, Value::from("pong"))));
    assert!(results.contains(&(2, Value::from("initiator"))));
    Ok(())
}

#[test]
fn test_service_discovery_across_peers() {
    ensure_test_logging(None);
    let net = TestNet::new(3);
    net.peers[0].register_service("camera");
    net.peers[1].register_service("gps");
    net.pump();

    assert_eq!(net.hub.services(), vec!["camera", "gps"]);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_in = seen.clone();
    net.peers[2].request_services(move |services| {
        seen_in.borrow_mut().extend(services.to_vec());
    });
    net.pump();

    assert_eq!(seen.borrow().as_slice(), ["camera", "gps"]);
    assert_eq!(net.peers[2].services(), vec!["camera", "gps"]);
}

#[test]
fn test_connecting_to_a_missing_service_fails_the_connection() {
    ensure_test_logging(None);
    let net = TestNet::new(2);

    let vc = net.peers[1].connect_to_peer("nowhere");
    assert_eq!(vc.state(), ConnectionState::Connecting);
    net.pump();

    // refused with -1: the connection fails instead of pretending
    assert_eq!(vc.state(), ConnectionState::NotConnected);
    assert!(!vc.call("anything", vec![], None));
}

#[test]
fn test_remote_physical_death_propagates() -> Result<()> {
    ensure_test_logging(None);
    let net = TestNet::new(2);
    let (outbound, _inbound) = establish(&net, "svc")?;

    info!("dropping the service peer's transport");
    net.kill_link(0);
    net.pump();

    // the survivor's circuit died and the service is gone from discovery
    assert_eq!(outbound.state(), ConnectionState::NotConnected);
    assert!(net.hub.services().is_empty());
    assert_eq!(net.hub.peer_count(), 1);

    let seen = Rc::new(RefCell::new(None));
    let seen_in = seen.clone();
    net.peers[1].request_services(move |services| {
        *seen_in.borrow_mut() = Some(services.to_vec());
    });
    net.pump();
    assert_eq!(seen.borrow().as_deref(), Some(&[][..]));
    Ok(())
}

#[test]
fn test_local_disconnect_reaches_the_other_side() -> Result<()> {
    ensure_test_logging(None);
    let net = TestNet::new(2);
    let (outbound, inbound) = establish(&net, "svc")?;

    outbound.disconnect();
    assert_eq!(outbound.state(), ConnectionState::NotConnected);
    net.pump();

    assert_eq!(inbound.state(), ConnectionState::NotConnected);
    // both ends now reject calls locally
    assert!(!inbound.call("x", vec![], None));
    Ok(())
}

#[test]
fn test_circuits_are_independent() -> Result<()> {
    ensure_test_logging(None);
    let net = TestNet::new(3);
    net.peers[0].register_service("svc");
    net.pump();

    let from_b = net.peers[1].connect_to_peer("svc");
    let from_c = net.peers[2].connect_to_peer("svc");
    net.pump();

    let to_b = net.peers[0].accept().ok_or_else(|| eyre!("missing first inbound"))?;
    let to_c = net.peers[0].accept().ok_or_else(|| eyre!("missing second inbound"))?;
    assert_ne!(from_b.connection_id(), from_c.connection_id());

    to_b.register_handler("tag", handler(|_, _| Value::from("b")));
    to_c.register_handler("tag", handler(|_, _| Value::from("c")));

    let caller = RecordingCaller::new();
    from_b.call("tag", vec![], Some((RecordingCaller::caller_ref(&caller), 1)));
    from_c.call("tag", vec![], Some((RecordingCaller::caller_ref(&caller), 2)));
    net.pump();

    let results = caller.borrow().results.clone();
    assert!(results.contains(&(1, Value::from("b"))));
    assert!(results.contains(&(2, Value::from("c"))));

    // dropping one circuit leaves the other alive
    from_b.disconnect();
    net.pump();
    assert_eq!(to_b.state(), ConnectionState::NotConnected);
    assert_eq!(to_c.state(), ConnectionState::Connected);

    from_c.call("tag", vec![], Some((RecordingCaller::caller_ref(&caller), 3)));
    net.pump();
    assert!(caller.borrow().results.contains(&(3, Value::from("c"))));
    Ok(())
}

#[test]
fn test_dropped_caller_never_hears_back() -> Result<()> {
    ensure_test_logging(None);
    let net = TestNet::new(2);
    let (outbound, inbound) = establish(&net, "svc")?;
    inbound.register_handler("slow", handler(|_, _| Value::from("late")));

    let caller = RecordingCaller::new();
    outbound.call("slow", vec![], Some((RecordingCaller::caller_ref(&caller), 1)));
    drop(caller);
    // the result arrives, finds no caller, and is silently discarded
    net.pump();
    Ok(())
}

#[test]
fn test_unanswered_call_survives_until_its_circuit_dies() -> Result<()> {
    ensure_test_logging(None);
    let net = TestNet::new(2);
    let (outbound, inbound) = establish(&net, "svc")?;
    // no handler for "void" on the inbound side: the forwarded call answers
    // null, which still resolves the chain; instead leave the circuit idle
    // and tear it down with the call correlation outstanding.
    let _ = inbound;

    let caller = RecordingCaller::new();
    outbound.call("void", vec![], Some((RecordingCaller::caller_ref(&caller), 9)));
    outbound.disconnect();
    net.pump();

    // forced cleanup releases the record without resolving it
    assert!(caller.borrow().results.is_empty());
    assert!(caller.borrow().errors.is_empty());
    Ok(())
}
