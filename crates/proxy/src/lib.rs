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

//! Switchboard proxy - the virtual-circuit switch.
//!
//! Many physical RPC connections share one [`hub::ProxyHub`]; each
//! [`peer::ProxyPeer`] turns its physical connection into a factory of
//! independent [`peer::VirtualConnection`]s that look like ordinary RPC
//! connections to application code while their traffic is tunneled through
//! the hub.

/// The rendezvous hub (server side).
pub mod hub;
/// Reserved control procedure names.
pub mod names;
/// The peer endpoint and its virtual connections (client side).
pub mod peer;

pub use hub::ProxyHub;
pub use peer::{ProxyPeer, VirtualConnection};
