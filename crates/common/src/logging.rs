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

//! Logging setup shared by binaries and tests.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

fn env_filter(default_directives: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives.unwrap_or("info")))
}

/// Initializes the global tracing subscriber once.
///
/// `RUST_LOG` wins over `default_directives`; with neither, `info` is used.
pub fn init_logging(default_directives: Option<&str>) {
    LOGGING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(default_directives))
            .try_init();
    });
}

/// Test variant of [`init_logging`]: safe to call from every test, captures
/// output per test via the libtest writer.
pub fn ensure_test_logging(default_directives: Option<&str>) {
    LOGGING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(default_directives))
            .with_test_writer()
            .try_init();
    });
}
