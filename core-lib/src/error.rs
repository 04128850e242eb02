// Copyright 2018 The dirwatch Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::io;

use dirwatch_audit::{AuditError, ParseError};

use crate::config::ConfigError;
use crate::event::ResolveError;
use crate::watch::TreeError;

/// Any failure the daemon can hit, at startup or per record.
///
/// Startup failures are fatal; failures inside the pipeline are logged
/// and swallowed so one bad event cannot halt the daemon.
#[derive(Debug)]
pub enum Error {
    /// The configuration could not be read or was malformed.
    Config(ConfigError),
    /// Talking to the audit subsystem failed.
    Source(AuditError),
    /// A record body did not parse.
    Parse(ParseError),
    /// An event's paths or actions could not be resolved.
    Resolve(ResolveError),
    /// A watch-tree lookup or mutation failed.
    Tree(TreeError),
    /// The output log or a directory walk failed.
    Io(io::Error),
}

impl Error {
    /// True when the underlying read was cut short by a signal; the run
    /// loop treats this as a wakeup, not a fault.
    pub fn is_interrupted(&self) -> bool {
        match *self {
            Error::Source(ref e) => e.is_interrupted(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Config(ref e) => write!(f, "{}", e),
            Error::Source(ref e) => write!(f, "audit source error: {}", e),
            Error::Parse(ref e) => write!(f, "record parse error: {}", e),
            Error::Resolve(ref e) => write!(f, "can't resolve event: {}", e),
            Error::Tree(ref e) => write!(f, "watch tree error: {}", e),
            Error::Io(ref e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Error {
        Error::Config(e)
    }
}

impl From<AuditError> for Error {
    fn from(e: AuditError) -> Error {
        Error::Source(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Error {
        Error::Parse(e)
    }
}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Error {
        Error::Resolve(e)
    }
}

impl From<TreeError> for Error {
    fn from(e: TreeError) -> Error {
        Error::Tree(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
