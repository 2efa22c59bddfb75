// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Logging setup shared by the library and the `s19-chain` tool
//!
//! Library code logs via the global `slog-scope` logger; when no logger has been installed
//! (e.g. in unit tests) all records are discarded.

use slog::Drain;

pub mod macros {
    pub use slog_scope::{crit, debug, error, info, trace, warn};
}

/// Keeps the global logger installed, dropping it flushes the asynchronous drain
pub struct LogGuard {
    _scope_guard: slog_scope::GlobalLoggerGuard,
}

/// Build the terminal logger: `slog-term` formatting, `RUST_LOG` filtering via
/// `slog-envlogger` and an asynchronous drain with `channel_size` slots
pub fn build_logger(channel_size: usize) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain)
        .chan_size(channel_size)
        .build()
        .fuse();
    slog::Logger::root(drain, slog::o!())
}

/// Install the global logger for an application
pub fn setup_for_app(channel_size: usize) -> LogGuard {
    let logger = build_logger(channel_size);
    LogGuard {
        _scope_guard: slog_scope::set_global_logger(logger),
    }
}
