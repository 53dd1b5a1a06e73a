// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UPnP surfaces: SSDP search responses, the device description document
//! and GENA subscription bookkeeping.
//!
//! Three listeners, three states. SSDP rides the multicast datagram
//! socket; description and GENA ride plain TCP. All three stay at the
//! envelope level, control-point interoperability beyond search, describe
//! and subscribe belongs to a real UPnP stack.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;
use crate::proto::{
    is_timeout, read_request, version_supported, write_response, HandlerContext,
};
use crate::socket::Socket;

// ===== SSDP =====

/// SSDP responder state. Location and USN come from nvram once per
/// connection so a reload shows up on the next advert.
pub struct SsdpState {
    location: String,
    usn: String,
    buf: Vec<u8>,
}

impl SsdpState {
    pub(crate) fn new(ctx: &HandlerContext<'_>) -> SsdpState {
        SsdpState {
            location: ctx
                .nvram
                .get(config::KEY_UPNP_LOCATION)
                .unwrap_or_else(|| config::DEF_UPNP_LOCATION.to_string()),
            usn: ctx
                .nvram
                .get(config::KEY_UPNP_USN)
                .unwrap_or_else(|| config::DEF_UPNP_USN.to_string()),
            buf: vec![0u8; config::DGRAM_BUF_LEN],
        }
    }

    pub(crate) fn reset(&mut self) {}
}

pub(crate) fn process_ssdp(
    state: &mut SsdpState,
    sock: &mut Socket,
    _ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let (n, peer) = match sock.recv_from(&mut state.buf) {
        Ok(pair) => pair,
        Err(e) if is_timeout(&e) => return Ok(0),
        Err(e) => return Err(e),
    };

    let text = String::from_utf8_lossy(&state.buf[..n]).to_string();
    let first = text.lines().next().unwrap_or_default();
    if first.starts_with("M-SEARCH") {
        let st = search_target(&text).unwrap_or("upnp:rootdevice");
        let reply = format!(
            "HTTP/1.1 200 OK\r\n\
             CACHE-CONTROL: max-age=120\r\n\
             EXT:\r\n\
             LOCATION: {}\r\n\
             SERVER: rcfgd/{} UPnP/1.0\r\n\
             ST: {}\r\n\
             USN: {}\r\n\r\n",
            state.location,
            crate::VERSION,
            st,
            state.usn
        );
        let sent = sock.send_to(reply.as_bytes(), &peer)?;
        log::debug!("[upnp] answered M-SEARCH for {}", st);
        return Ok(sent as u64);
    }
    if first.starts_with("NOTIFY") {
        log::trace!("[upnp] peer NOTIFY ignored");
        return Ok(0);
    }
    log::trace!("[upnp] ignoring {} byte datagram", n);
    Ok(0)
}

fn search_target(text: &str) -> Option<&str> {
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("st") {
            Some(value.trim())
        } else {
            None
        }
    })
}

// ===== Device description =====

pub struct UpnpHttpState {
    target: String,
}

impl UpnpHttpState {
    pub(crate) fn new() -> UpnpHttpState {
        UpnpHttpState {
            target: String::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.target.clear();
    }
}

pub(crate) fn process_http(
    state: &mut UpnpHttpState,
    sock: &mut Socket,
    ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let head = match read_request(sock, ctx.closing) {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(0),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return write_response(sock, "400 Bad Request", "text/plain", &[], b"bad request\n");
        }
        Err(e) => return Err(e),
    };
    state.target = head.target.clone();

    if !version_supported(&head) {
        return write_response(
            sock,
            "505 HTTP Version Not Supported",
            "text/plain",
            &[],
            b"version not supported\n",
        );
    }
    if head.method != "GET" {
        return write_response(
            sock,
            "501 Not Implemented",
            "text/plain",
            &[],
            b"method not implemented\n",
        );
    }
    if state.target != config::UPNP_DESC_PATH {
        log::debug!("[upnp] no document at {}", state.target);
        return write_response(sock, "404 Not Found", "text/plain", &[], b"not found\n");
    }

    let body = description_document(ctx);
    write_response(sock, "200 OK", "text/xml", &[], body.as_bytes())
}

fn description_document(ctx: &HandlerContext<'_>) -> String {
    let friendly = ctx
        .nvram
        .get(config::KEY_UPNP_FRIENDLY_NAME)
        .unwrap_or_else(|| config::DEF_UPNP_FRIENDLY_NAME.to_string());
    let usn = ctx
        .nvram
        .get(config::KEY_UPNP_USN)
        .unwrap_or_else(|| config::DEF_UPNP_USN.to_string());
    format!(
        "<?xml version=\"1.0\"?>\r\n\
         <root xmlns=\"urn:schemas-upnp-org:device-1-0\">\r\n\
         <specVersion><major>1</major><minor>0</minor></specVersion>\r\n\
         <device>\r\n\
         <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>\r\n\
         <friendlyName>{}</friendlyName>\r\n\
         <manufacturer>naskel.com</manufacturer>\r\n\
         <modelName>rcfgd</modelName>\r\n\
         <modelNumber>{}</modelNumber>\r\n\
         <UDN>{}</UDN>\r\n\
         </device>\r\n\
         </root>\r\n",
        friendly,
        crate::VERSION,
        usn
    )
}

// ===== GENA =====

pub struct GenaState {
    last_sid: Option<String>,
}

impl GenaState {
    pub(crate) fn new() -> GenaState {
        GenaState { last_sid: None }
    }

    pub(crate) fn reset(&mut self) {
        self.last_sid = None;
    }
}

pub(crate) fn process_gena(
    state: &mut GenaState,
    sock: &mut Socket,
    ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let head = match read_request(sock, ctx.closing) {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(0),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return write_response(sock, "400 Bad Request", "text/plain", &[], b"bad request\n");
        }
        Err(e) => return Err(e),
    };

    match head.method.as_str() {
        "SUBSCRIBE" => {
            let sid = make_sid();
            let n = write_response(
                sock,
                "200 OK",
                "",
                &[("SID", sid.as_str()), ("TIMEOUT", "Second-1800")],
                b"",
            )?;
            state.last_sid = Some(sid);
            log::debug!(
                "[upnp] subscription {} on {}",
                state.last_sid.as_deref().unwrap_or("-"),
                head.target
            );
            Ok(n)
        }
        "UNSUBSCRIBE" => {
            log::debug!(
                "[upnp] unsubscribe {} on {}",
                head.header("sid").unwrap_or("-"),
                head.target
            );
            write_response(sock, "200 OK", "", &[], b"")
        }
        "NOTIFY" => write_response(sock, "200 OK", "", &[], b""),
        _ => write_response(
            sock,
            "405 Method Not Allowed",
            "text/plain",
            &[],
            b"method not allowed\n",
        ),
    }
}

fn make_sid() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    format!("uuid:rcfgd-{:016x}", nanos)
}
