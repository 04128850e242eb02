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

//! Plumbing for the kernel audit subsystem.
//!
//! This crate knows about the *wire*: the text grammar of audit records
//! ([`parse`]), the shape of an installable watch rule ([`WatchRule`]),
//! and the netlink transport that carries both ([`netlink`]). It assigns
//! no meaning to what it carries; interpreting records as filesystem
//! events is the business of the core library.

pub mod error;
pub mod netlink;
pub mod parse;
pub mod test_utils;

pub use crate::error::AuditError;
pub use crate::netlink::NetlinkAudit;
pub use crate::parse::{ParseError, Record};

/// Lowest message type code treated as a real audit record.
pub const RECORD_TYPE_MIN: u32 = 1000;
/// Highest message type code treated as a real audit record.
pub const RECORD_TYPE_MAX: u32 = 1807;

/// Type code of a syscall record, the first record of an event.
pub const AUDIT_SYSCALL: u32 = 1300;
/// Type code of a path record.
pub const AUDIT_PATH: u32 = 1302;
/// Type code of a working-directory record.
pub const AUDIT_CWD: u32 = 1307;
/// Type code of the end-of-event sentinel.
pub const AUDIT_EOE: u32 = 1320;

/// Watch rule permission bit: execute.
pub const PERM_EXEC: u32 = 0x1;
/// Watch rule permission bit: write.
pub const PERM_WRITE: u32 = 0x2;
/// Watch rule permission bit: read.
pub const PERM_READ: u32 = 0x4;
/// Watch rule permission bit: attribute change.
pub const PERM_ATTR: u32 = 0x8;

/// One message pulled off the audit socket, before parsing.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub type_code: u32,
    pub body: String,
}

/// Classification of a raw record's type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Syscall,
    Path,
    Cwd,
    EndOfEvent,
    /// A record type the daemon has no use for.
    Other,
}

impl RecordKind {
    pub fn from_code(code: u32) -> RecordKind {
        match code {
            AUDIT_SYSCALL => RecordKind::Syscall,
            AUDIT_PATH => RecordKind::Path,
            AUDIT_CWD => RecordKind::Cwd,
            AUDIT_EOE => RecordKind::EndOfEvent,
            _ => RecordKind::Other,
        }
    }
}

/// Description of one audit rule attached to a watched path.
///
/// Removal must present the identical description that was installed,
/// so whoever installs a rule keeps the `WatchRule` for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRule {
    /// Absolute path the rule watches.
    pub path: String,
    /// Directory rules watch the whole entry; file rules a single inode.
    pub directory: bool,
    /// Permission bits (`PERM_*`) the rule matches on.
    pub permissions: u32,
    /// Synthetic key, `<class char><path>`, echoed back in syscall records.
    pub key: String,
}

/// Connection to the host audit subsystem.
///
/// The production implementation is [`NetlinkAudit`]; tests use
/// [`test_utils::ScriptedSource`].
pub trait AuditSource {
    /// Blocks until the next raw record is available.
    fn read_record(&mut self) -> Result<RawRecord, AuditError>;

    /// Installs one audit rule.
    fn install_rule(&mut self, rule: &WatchRule) -> Result<(), AuditError>;

    /// Removes one previously installed rule.
    fn remove_rule(&mut self, rule: &WatchRule) -> Result<(), AuditError>;
}
