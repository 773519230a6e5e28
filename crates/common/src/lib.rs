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

//! Switchboard common - shared building blocks for the wire and proxy crates.
//!
//! Home of the tagged [`value::Value`] model every layer passes around, the
//! unique-id pools used for call and connection ids, the byte-stream
//! [`endpoint::Endpoint`] abstraction the transports implement, and logging
//! setup.

/// The abstract byte-stream endpoint and its in-memory test double.
pub mod endpoint;
/// Unique-id pools (monotonic counter + free-list).
pub mod id;
/// Logging setup and utilities for consistent logging across components.
pub mod logging;
/// The tagged RPC value model.
pub mod value;

pub use endpoint::{Endpoint, MemoryEndpoint};
pub use id::IdGenerator;
pub use value::{Kind, TypeMismatchError, Value};
