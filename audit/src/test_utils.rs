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

//! Types and helpers used for testing.

use std::collections::VecDeque;

use crate::error::AuditError;
use crate::{AuditSource, RawRecord, WatchRule};

/// An `AuditSource` fed from a script of canned records.
///
/// Rules are tracked as they are installed and removed, so tests can
/// assert on rule accounting. Reading past the end of the script
/// reports an interrupted read, which a pipeline treats as a benign
/// wakeup.
pub struct ScriptedSource {
    records: VecDeque<RawRecord>,
    live: Vec<WatchRule>,
    installs: usize,
    removals: usize,
    fail_install_after: Option<usize>,
}

impl ScriptedSource {
    pub fn new() -> ScriptedSource {
        ScriptedSource {
            records: VecDeque::new(),
            live: Vec::new(),
            installs: 0,
            removals: 0,
            fail_install_after: None,
        }
    }

    /// Appends one raw record to the script.
    pub fn push(&mut self, type_code: u32, body: &str) {
        self.records.push_back(RawRecord { type_code, body: body.to_string() });
    }

    /// How many scripted records have not been read yet.
    pub fn remaining_records(&self) -> usize {
        self.records.len()
    }

    /// Makes every install after the first `n` fail.
    pub fn fail_install_after(&mut self, n: usize) {
        self.fail_install_after = Some(n);
    }

    /// The rules currently installed.
    pub fn live_rules(&self) -> &[WatchRule] {
        &self.live
    }

    /// Whether a rule with the given key is currently installed.
    pub fn has_rule(&self, key: &str) -> bool {
        self.live.iter().any(|r| r.key == key)
    }

    /// Total installs performed, including rules since removed.
    pub fn install_count(&self) -> usize {
        self.installs
    }

    /// Total removals performed.
    pub fn removal_count(&self) -> usize {
        self.removals
    }
}

impl AuditSource for ScriptedSource {
    fn read_record(&mut self) -> Result<RawRecord, AuditError> {
        self.records.pop_front().ok_or(AuditError::Interrupted)
    }

    fn install_rule(&mut self, rule: &WatchRule) -> Result<(), AuditError> {
        if let Some(n) = self.fail_install_after {
            if self.installs >= n {
                return Err(AuditError::Os { call: "sendto", errno: 1 });
            }
        }
        self.installs += 1;
        self.live.push(rule.clone());
        Ok(())
    }

    fn remove_rule(&mut self, rule: &WatchRule) -> Result<(), AuditError> {
        match self.live.iter().position(|r| r == rule) {
            Some(idx) => {
                self.live.remove(idx);
                self.removals += 1;
                Ok(())
            }
            None => Err(AuditError::Os { call: "sendto", errno: 2 }),
        }
    }
}

impl Default for ScriptedSource {
    fn default() -> ScriptedSource {
        ScriptedSource::new()
    }
}
