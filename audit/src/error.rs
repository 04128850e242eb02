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

/// Errors that can occur talking to the audit subsystem.
#[derive(Debug)]
pub enum AuditError {
    /// A socket operation failed; carries the call and the raw `errno`.
    Os { call: &'static str, errno: i32 },
    /// A blocking read was cut short by a signal.
    Interrupted,
    /// The source handed back a frame too short to carry a header.
    Truncated { len: usize },
}

impl AuditError {
    /// Captures `errno` for a failed `call`.
    pub fn from_errno(call: &'static str) -> AuditError {
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno == libc::EINTR {
            AuditError::Interrupted
        } else {
            AuditError::Os { call, errno }
        }
    }

    pub fn is_interrupted(&self) -> bool {
        match *self {
            AuditError::Interrupted => true,
            _ => false,
        }
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AuditError::Os { call, errno } => {
                write!(f, "{} failed: {}", call, io::Error::from_raw_os_error(errno))
            }
            AuditError::Interrupted => write!(f, "read interrupted by signal"),
            AuditError::Truncated { len } => {
                write!(f, "truncated netlink frame ({} bytes)", len)
            }
        }
    }
}
