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

//! Test doubles for the correlation layer.

use std::{cell::RefCell, rc::Rc};

use switchboard_common::Value;

use crate::link::{CallerRef, ProcedureCaller};

/// A [`ProcedureCaller`] that records every resolution it receives.
#[derive(Default)]
pub struct RecordingCaller {
    /// `(token, result)` pairs, in arrival order.
    pub results: Vec<(u32, Value)>,
    /// `(token, code, message)` triples, in arrival order.
    pub errors: Vec<(u32, i64, String)>,
}

impl RecordingCaller {
    /// Creates a shared recorder.
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Weak caller handle suitable for a call's caller slot.
    pub fn caller_ref(this: &Rc<RefCell<Self>>) -> CallerRef {
        let concrete = Rc::downgrade(this);
        let weak: CallerRef = concrete;
        weak
    }
}

impl ProcedureCaller for RecordingCaller {
    fn on_result(&mut self, result: Value, token: u32) {
        self.results.push((token, result));
    }

    fn on_error(&mut self, code: i64, message: &str, _data: Option<Value>, token: u32) {
        self.errors.push((token, code, message.to_string()));
    }
}
