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

//! Switchboard wire - the JSON-RPC 2.0 engine.
//!
//! Bytes flow in from an endpoint, through the frame scanner and the
//! character-at-a-time parser into [`switchboard_common::Value`] trees; the
//! dispatcher routes request objects to handlers and shapes response
//! envelopes; [`link::JsonRpcLink`] ties it all together as a polled
//! call-correlation connection.

/// Request dispatch and the shared handler table.
pub mod dispatch;
/// JSON text encoding and JSON-RPC envelope builders.
pub mod encode;
/// Top-level frame boundary scanning for concatenated JSON values.
pub mod framing;
/// Call correlation over a byte-stream endpoint.
pub mod link;
/// The character-at-a-time JSON parser.
pub mod parser;
/// Test doubles.
pub mod testing;

pub use dispatch::{handler, Dispatcher, Handler, HandlerTable, HandlerToken};
pub use encode::{escape_and_quote, to_json, to_json_opts, EncodeOptions};
pub use framing::FrameScanner;
pub use link::{CallerRef, CallerSlot, ConnectionState, JsonRpcLink, ProcedureCaller, RpcConnection};
pub use parser::{JsonParser, ParseStatus, END_OF_INPUT};
