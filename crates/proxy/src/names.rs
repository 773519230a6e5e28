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

//! Reserved procedure names for proxy control traffic.
//!
//! Control messages share the physical connection with application calls; the
//! `rpx:` prefix keeps them out of the application namespace.

/// Namespace prefix of every control procedure.
pub const CONTROL_PREFIX: &str = "rpx:";

/// Hub-side: advertise a service offered by the calling peer. `(name) -> bool`
pub const REGISTER_SERVICE: &str = "rpx:registerService";
/// Hub-side: list every registered service. `() -> array<string>`
pub const GET_SERVICES: &str = "rpx:getServices";
/// Hub-side: open a circuit to a service. `(name) -> connId` (-1 = not found)
pub const CONNECT_TO_SERVICE: &str = "rpx:connectToService";
/// Hub-side: tear down a circuit. `(connId) -> bool`
pub const DISCONNECT: &str = "rpx:disconnect";
/// Both sides: forward a call across a circuit.
/// `(connId, procedure, args) -> callId` (-1 = unknown circuit)
pub const CALL: &str = "rpx:call";
/// Peer-side: deliver the result of a forwarded call. `(callId, result)`
pub const RETURN_RESULT: &str = "rpx:returnResult";
/// Peer-side: announce an inbound circuit for an offered service.
/// `(serviceName, connId)`
pub const CONNECT_PEER: &str = "rpx:connectPeer";
/// Peer-side: announce that a circuit is gone. `(connId)`
pub const DISCONNECT_PEER: &str = "rpx:disconnectPeer";
