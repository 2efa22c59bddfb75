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

//! The Antminer S19 hash chain driver errors

use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Debug, Display};

use std::io;

use crate::chain::Stage;

pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    /// General error used for more specific input/output error.
    #[fail(display = "{}", _0)]
    General(String),

    /// Standard input/output error.
    #[fail(display = "IO: {}", _0)]
    Io(String),

    /// Memory-mapped register window could not be mapped or was accessed out of bounds.
    #[fail(display = "Register window: {}", _0)]
    Window(String),

    /// Configuration file errors.
    #[fail(display = "Config: {}", _0)]
    Config(String),

    /// Command transmission or register read polling exhausted its time budget.
    #[fail(display = "Bus timeout: {}", _0)]
    BusTimeout(String),

    /// PLL VCO frequency out of the supported range.
    #[fail(display = "Frequency out of range: {}", _0)]
    FrequencyOutOfRange(String),

    /// Baud rate clock divisor does not fit the register fields.
    #[fail(display = "Baud rate unreachable: {}", _0)]
    BaudUnreachable(String),

    /// Chip address assignment failed.
    #[fail(display = "Enumeration failed: {}", _0)]
    EnumerationFailed(String),

    /// Sequencing-critical step of chain bring-up failed.
    #[fail(display = "{} stage failed: {}", _0, _1)]
    StageFailed(Stage, String),

    /// Error concerning hash chain with specific index.
    #[fail(display = "Hash chain {}: {}", _0, _1)]
    Chain(usize, String),

    /// Invalid work submission.
    #[fail(display = "Work: {}", _0)]
    Work(String),
}

/// Implement Fail trait instead of use Derive to get more control over custom type.
/// The main advantage is customization of Context type which allows conversion of
/// any error types to this custom error with general error kind by calling context
/// method on any result type.
impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.inner.get_context().clone()
    }

    /// Kind of the innermost driver error in the cause chain
    ///
    /// Stage failures wrap the error of the step that failed, this digs it out.
    pub fn root_kind(&self) -> ErrorKind {
        let mut kind = self.kind();
        let mut cause = self.inner.cause();
        while let Some(fail) = cause {
            if let Some(error) = fail.downcast_ref::<Error>() {
                kind = error.kind();
            }
            cause = fail.cause();
        }
        kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Self {
        Self { inner }
    }
}

impl From<Context<String>> for Error {
    fn from(context: Context<String>) -> Self {
        Self {
            inner: context.map(|info| ErrorKind::General(info)),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        ErrorKind::General(msg).into()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let msg = e.to_string();
        Self {
            inner: e.context(ErrorKind::Io(msg)),
        }
    }
}

/// A specialized `Result` type bound to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
