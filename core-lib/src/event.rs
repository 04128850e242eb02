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

//! Reassembling records into events.
//!
//! All records carrying the same sequence number describe one syscall.
//! An `Event` absorbs them one at a time, in wire order, and tells the
//! pipeline when the set is complete: normally on the end-of-event
//! sentinel, or immediately when the opening syscall record is missing
//! the fields that would make the event loggable.

use std::fmt;

use dirwatch_audit::{Record, RecordKind};

/// What kind of access an event attributes to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Execute,
    Attribute,
    Create,
    Delete,
}

impl AccessType {
    /// The form used in log lines.
    pub fn as_str(&self) -> &'static str {
        match *self {
            AccessType::Read => "read",
            AccessType::Write => "write",
            AccessType::Execute => "exec",
            AccessType::Attribute => "attr",
            AccessType::Create => "create",
            AccessType::Delete => "delete",
        }
    }

    /// Decodes the access class character leading a rule key.
    fn from_class(c: char) -> Option<AccessType> {
        match c {
            'r' => Some(AccessType::Read),
            'w' => Some(AccessType::Write),
            'x' => Some(AccessType::Execute),
            'a' => Some(AccessType::Attribute),
            _ => None,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits a rule key into its access class and the watched path.
fn split_key(key: &str) -> Option<(AccessType, &str)> {
    let mut chars = key.chars();
    let access = AccessType::from_class(chars.next()?)?;
    let path = chars.as_str();
    if path.is_empty() {
        return None;
    }
    Some((access, path))
}

/// The errors that can occur resolving an event's paths and actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A path record carried an empty name.
    EmptyName,
    /// A relative name with no working directory to resolve against.
    MissingBasePath(String),
    /// A nametype the daemon does not understand.
    UnknownAction(String),
    /// A NORMAL nametype before any access class was recorded.
    MissingAccessClass,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ResolveError::EmptyName => write!(f, "empty path name"),
            ResolveError::MissingBasePath(ref name) => {
                write!(f, "relative name '{}' with no working directory", name)
            }
            ResolveError::UnknownAction(ref nametype) => {
                write!(f, "unrecognized nametype '{}'", nametype)
            }
            ResolveError::MissingAccessClass => {
                write!(f, "path record with no access class on the event")
            }
        }
    }
}

/// Accumulator for the records of one sequence number.
#[derive(Debug, Default)]
pub struct Event {
    /// The watched path encoded in the rule key. Recorded for
    /// completeness; the effective paths come from path records.
    key_path: Option<String>,
    /// Working directory, for resolving relative names.
    base_path: Option<String>,
    /// Access class decoded from the rule key.
    access_type: Option<AccessType>,
    /// `(nametype, name)` pairs, in wire order, PARENT entries excluded.
    additional_paths: Vec<(String, String)>,
    timestamp: i64,
    uid: String,
    pid: String,
}

impl Event {
    /// Absorbs one record. Returns `true` when the event is complete
    /// and ready to process; the pipeline must not feed it further.
    pub fn absorb(&mut self, kind: RecordKind, record: &Record) -> bool {
        match kind {
            RecordKind::Syscall => {
                let key = match record.param("key") {
                    Some(key) => key,
                    None => return true,
                };
                let (access, path) = match split_key(key) {
                    Some(pair) => pair,
                    None => return true,
                };
                self.access_type = Some(access);
                self.key_path = Some(path.to_string());
                self.timestamp = record.timestamp;
                match (record.param("uid"), record.param("pid")) {
                    (Some(uid), Some(pid)) => {
                        self.uid = uid.to_string();
                        self.pid = pid.to_string();
                        false
                    }
                    _ => true,
                }
            }
            RecordKind::Path => {
                if let (Some(name), Some(nametype)) =
                    (record.param("name"), record.param("nametype"))
                {
                    if nametype != "PARENT" {
                        self.additional_paths
                            .push((nametype.to_string(), name.to_string()));
                    }
                }
                false
            }
            RecordKind::Cwd => {
                if let Some(cwd) = record.param("cwd") {
                    self.base_path = Some(cwd.to_string());
                }
                false
            }
            RecordKind::EndOfEvent => true,
            RecordKind::Other => false,
        }
    }

    /// Resolves the accumulated path records into `(absolute path,
    /// action)` pairs, in the order they arrived.
    pub fn calculate_actions(&self) -> Result<Vec<(String, AccessType)>, ResolveError> {
        let mut actions = Vec::with_capacity(self.additional_paths.len());
        for (nametype, name) in &self.additional_paths {
            let path = self.resolve_path(name)?;
            let action = self.resolve_action(nametype)?;
            actions.push((path, action));
        }
        Ok(actions)
    }

    fn resolve_path(&self, name: &str) -> Result<String, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        if name.starts_with('/') {
            return Ok(name.to_string());
        }
        match self.base_path {
            Some(ref base) => Ok(format!("{}/{}", base, name)),
            None => Err(ResolveError::MissingBasePath(name.to_string())),
        }
    }

    fn resolve_action(&self, nametype: &str) -> Result<AccessType, ResolveError> {
        match nametype {
            "NORMAL" => self.access_type.ok_or(ResolveError::MissingAccessClass),
            "CREATE" => Ok(AccessType::Create),
            "DELETE" => Ok(AccessType::Delete),
            other => Err(ResolveError::UnknownAction(other.to_string())),
        }
    }

    pub fn key_path(&self) -> Option<&str> {
        self.key_path.as_ref().map(|s| s.as_str())
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }
}
