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

//! The netlink transport to the kernel audit subsystem.
//!
//! Requests (status changes, rule installs and removals) are fire and
//! forget: the kernel's acknowledgments arrive asynchronously on the
//! same socket, outside the audit record type range, and are dropped by
//! the pipeline's garbage filter. Incoming audit records are plain text
//! behind a netlink header.

use std::mem;
use std::os::unix::io::RawFd;

use log::debug;

use crate::error::AuditError;
use crate::{AuditSource, RawRecord, WatchRule};

const NLMSG_HDRLEN: usize = 16;

// Message types understood by the kernel side.
const AUDIT_SET: u16 = 1001;
const AUDIT_ADD_RULE: u16 = 1011;
const AUDIT_DEL_RULE: u16 = 1012;

// Which audit_status fields a SET message is changing.
const AUDIT_STATUS_ENABLED: u32 = 0x0001;
const AUDIT_STATUS_PID: u32 = 0x0004;

// Rule placement and action.
const AUDIT_FILTER_EXIT: u32 = 0x04;
const AUDIT_ALWAYS: u32 = 2;

// Rule field ids and the equality operator.
const AUDIT_WATCH: u32 = 105;
const AUDIT_PERM: u32 = 106;
const AUDIT_DIR: u32 = 107;
const AUDIT_FILTERKEY: u32 = 210;
const AUDIT_EQUAL: u32 = 0x4000_0000;

const AUDIT_BITMASK_SIZE: usize = 64;
const AUDIT_MAX_FIELDS: usize = 64;

// The kernel caps audit messages just below 9k.
const RECV_BUF_LEN: usize = 9216;

/// Blocking client for the kernel audit socket.
pub struct NetlinkAudit {
    fd: RawFd,
    seq: u32,
}

impl NetlinkAudit {
    /// Opens the audit netlink socket.
    pub fn open() -> Result<NetlinkAudit, AuditError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_AUDIT,
            )
        };
        if fd < 0 {
            return Err(AuditError::from_errno("socket"));
        }
        Ok(NetlinkAudit { fd, seq: 0 })
    }

    /// Turns event generation on or off.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), AuditError> {
        self.set_status(AUDIT_STATUS_ENABLED, enabled as u32, 0)
    }

    /// Registers `pid` as the process the kernel delivers records to.
    pub fn set_listener_pid(&mut self, pid: u32) -> Result<(), AuditError> {
        self.set_status(AUDIT_STATUS_PID, 0, pid)
    }

    fn set_status(&mut self, mask: u32, enabled: u32, pid: u32) -> Result<(), AuditError> {
        // struct audit_status: mask, enabled, failure, pid, rate_limit,
        // backlog_limit, lost, backlog, then three reserved words.
        let mut payload = Vec::with_capacity(11 * 4);
        put_u32(&mut payload, mask);
        put_u32(&mut payload, enabled);
        put_u32(&mut payload, 0);
        put_u32(&mut payload, pid);
        for _ in 0..7 {
            put_u32(&mut payload, 0);
        }
        self.send(AUDIT_SET, &payload)
    }

    fn send(&mut self, msg_type: u16, payload: &[u8]) -> Result<(), AuditError> {
        self.seq = self.seq.wrapping_add(1);

        let mut frame = Vec::with_capacity(NLMSG_HDRLEN + payload.len());
        put_u32(&mut frame, (NLMSG_HDRLEN + payload.len()) as u32);
        put_u16(&mut frame, msg_type);
        put_u16(&mut frame, libc::NLM_F_REQUEST as u16);
        put_u32(&mut frame, self.seq);
        put_u32(&mut frame, 0);
        frame.extend_from_slice(payload);

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        let rc = unsafe {
            libc::sendto(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(AuditError::from_errno("sendto"));
        }
        Ok(())
    }
}

impl AuditSource for NetlinkAudit {
    fn read_record(&mut self) -> Result<RawRecord, AuditError> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let n = unsafe {
            libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
        };
        if n < 0 {
            return Err(AuditError::from_errno("recv"));
        }
        let n = n as usize;
        if n < NLMSG_HDRLEN {
            return Err(AuditError::Truncated { len: n });
        }

        let msg_len = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let msg_type = u16::from_ne_bytes([buf[4], buf[5]]);
        let end = msg_len.min(n);
        if end < NLMSG_HDRLEN {
            return Err(AuditError::Truncated { len: end });
        }

        let body = String::from_utf8_lossy(&buf[NLMSG_HDRLEN..end])
            .trim_end_matches('\0')
            .to_string();

        Ok(RawRecord { type_code: u32::from(msg_type), body })
    }

    fn install_rule(&mut self, rule: &WatchRule) -> Result<(), AuditError> {
        debug!("installing rule {}", rule.key);
        self.send(AUDIT_ADD_RULE, &encode_rule(rule))
    }

    fn remove_rule(&mut self, rule: &WatchRule) -> Result<(), AuditError> {
        debug!("removing rule {}", rule.key);
        self.send(AUDIT_DEL_RULE, &encode_rule(rule))
    }
}

impl Drop for NetlinkAudit {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Serializes a watch rule into the kernel's `audit_rule_data` layout:
/// flags, action, field count, the syscall bitmask, three parallel field
/// arrays, then a string buffer holding the path and key back to back.
fn encode_rule(rule: &WatchRule) -> Vec<u8> {
    let entry_field = if rule.directory { AUDIT_DIR } else { AUDIT_WATCH };
    let path = rule.path.as_bytes();
    let key = rule.key.as_bytes();

    let fields = [entry_field, AUDIT_PERM, AUDIT_FILTERKEY];
    let values = [path.len() as u32, rule.permissions, key.len() as u32];

    let header_len = (3 + AUDIT_BITMASK_SIZE + 3 * AUDIT_MAX_FIELDS + 1) * 4;
    let mut buf = Vec::with_capacity(header_len + path.len() + key.len());

    put_u32(&mut buf, AUDIT_FILTER_EXIT);
    put_u32(&mut buf, AUDIT_ALWAYS);
    put_u32(&mut buf, fields.len() as u32);
    for _ in 0..AUDIT_BITMASK_SIZE {
        // match every syscall; the permission field does the narrowing
        put_u32(&mut buf, !0);
    }
    for i in 0..AUDIT_MAX_FIELDS {
        put_u32(&mut buf, if i < fields.len() { fields[i] } else { 0 });
    }
    for i in 0..AUDIT_MAX_FIELDS {
        put_u32(&mut buf, if i < values.len() { values[i] } else { 0 });
    }
    for i in 0..AUDIT_MAX_FIELDS {
        put_u32(&mut buf, if i < fields.len() { AUDIT_EQUAL } else { 0 });
    }
    put_u32(&mut buf, (path.len() + key.len()) as u32);
    buf.extend_from_slice(path);
    buf.extend_from_slice(key);
    buf
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_ne_bytes());
}
