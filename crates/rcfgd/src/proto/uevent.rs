// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kernel uevent intake.
//!
//! The netlink listener delivers hotplug datagrams of the form
//! `action@devpath` followed by NUL-separated `KEY=VALUE` pairs. The daemon
//! parses and logs them; rule execution on top of the parsed event is the
//! rules engine's business, not the dispatcher's.

use std::io::{self, Read};

use crate::config;
use crate::proto::{is_timeout, HandlerContext};
use crate::socket::Socket;

/// One parsed kernel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    pub action: String,
    pub devpath: String,
    pub env: Vec<(String, String)>,
}

impl Uevent {
    pub fn var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a raw uevent datagram. Returns `None` for payloads that do not
/// carry the `action@devpath` header, such as libudev-tagged messages.
pub fn parse_uevent(data: &[u8]) -> Option<Uevent> {
    let mut segments = data.split(|&b| b == 0).filter(|s| !s.is_empty());

    let header = String::from_utf8_lossy(segments.next()?).to_string();
    let (action, devpath) = header.split_once('@')?;
    if action.is_empty() || devpath.is_empty() {
        return None;
    }

    let mut env = Vec::new();
    for segment in segments {
        let text = String::from_utf8_lossy(segment);
        if let Some((key, value)) = text.split_once('=') {
            env.push((key.to_string(), value.to_string()));
        }
    }

    Some(Uevent {
        action: action.to_string(),
        devpath: devpath.to_string(),
        env,
    })
}

pub struct UeventState {
    buf: Vec<u8>,
    seen: u64,
}

impl UeventState {
    pub(crate) fn new() -> UeventState {
        UeventState {
            buf: vec![0u8; config::DGRAM_BUF_LEN],
            seen: 0,
        }
    }

    pub(crate) fn reset(&mut self) {}
}

pub(crate) fn process(
    state: &mut UeventState,
    sock: &mut Socket,
    _ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let n = match sock.read(&mut state.buf) {
        Ok(0) => return Ok(0),
        Ok(n) => n,
        Err(e) if is_timeout(&e) => return Ok(0),
        Err(e) => return Err(e),
    };

    match parse_uevent(&state.buf[..n]) {
        Some(event) => {
            state.seen += 1;
            log::debug!(
                "[uevent] #{} {}@{} ({} vars)",
                state.seen,
                event.action,
                event.devpath,
                event.env.len()
            );
        }
        None => log::trace!("[uevent] ignoring {} byte non-kernel payload", n),
    }
    Ok(0)
}
