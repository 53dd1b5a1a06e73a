// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LAN discovery responder.
//!
//! Management tools broadcast a short probe datagram; the daemon answers
//! with a one-line advertisement naming itself, its version and the
//! configured locale. Anything that is not a probe is dropped quietly, the
//! segment carries plenty of unrelated broadcast traffic.

use std::io;

use crate::config;
use crate::proto::{is_timeout, HandlerContext};
use crate::socket::Socket;

/// Probe token management tools broadcast.
pub const DISCOVER_PROBE: &str = "RCFG-DISCOVER";
/// First token of the advertisement reply.
pub const SERVICE_PREFIX: &str = "RCFG-SERVICE";

pub struct DiscoveryState {
    buf: Vec<u8>,
    peer: Option<String>,
}

impl DiscoveryState {
    pub(crate) fn new() -> DiscoveryState {
        DiscoveryState {
            buf: vec![0u8; config::DGRAM_BUF_LEN],
            peer: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.peer = None;
    }
}

pub(crate) fn process(
    state: &mut DiscoveryState,
    sock: &mut Socket,
    ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let (n, peer) = match sock.recv_from(&mut state.buf) {
        Ok(pair) => pair,
        // A sibling clone may have raced us to the datagram; there is
        // nothing to answer then.
        Err(e) if is_timeout(&e) => return Ok(0),
        Err(e) => return Err(e),
    };

    let text = String::from_utf8_lossy(&state.buf[..n]);
    if !text.trim_start().starts_with(DISCOVER_PROBE) {
        log::trace!("[discovery] ignoring {} byte non-probe datagram", n);
        return Ok(0);
    }

    let locale = ctx
        .nvram
        .get(config::KEY_LOCALE)
        .unwrap_or_else(|| config::DEF_LOCALE.to_string());
    let reply = format!(
        "{} rcfgd/{} locale={}\r\n",
        SERVICE_PREFIX,
        crate::VERSION,
        locale
    );
    let sent = sock.send_to(reply.as_bytes(), &peer)?;
    state.peer = peer.as_socket().map(|sa| sa.to_string());
    log::debug!(
        "[discovery] advertised to {}",
        state.peer.as_deref().unwrap_or("peer")
    );
    Ok(sent as u64)
}
