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

//! Shared harness for the end-to-end proxy tests.

use std::rc::Rc;

use switchboard_common::MemoryEndpoint;
use switchboard_proxy::{ProxyHub, ProxyPeer};
use switchboard_wire::{JsonRpcLink, RpcConnection};

/// A hub with N peers attached over in-memory byte pipes.
pub struct TestNet {
    /// The rendezvous hub.
    pub hub: ProxyHub,
    /// Peer endpoints, in attach order.
    pub peers: Vec<ProxyPeer>,
    links: Vec<JsonRpcLink>,
}

impl TestNet {
    /// Builds a hub and `peer_count` attached peers.
    pub fn new(peer_count: usize) -> Self {
        let hub = ProxyHub::new();
        let mut peers = Vec::new();
        let mut links = Vec::new();
        for _ in 0..peer_count {
            let (hub_side, peer_side) = MemoryEndpoint::pair();
            hub.attach(Rc::new(JsonRpcLink::new(Box::new(hub_side))));
            let link = JsonRpcLink::new(Box::new(peer_side));
            links.push(link.clone());
            peers.push(ProxyPeer::new(Rc::new(link)));
        }
        Self { hub, peers, links }
    }

    /// Polls the whole network long enough for any in-flight exchange
    /// (request, forward, answer, return) to settle.
    pub fn pump(&self) {
        for _ in 0..6 {
            self.hub.update();
            for peer in &self.peers {
                peer.update();
            }
        }
    }

    /// Forces the physical connection of peer `index` down, as a transport
    /// failure would.
    pub fn kill_link(&self, index: usize) {
        self.links[index].disconnect();
    }
}
