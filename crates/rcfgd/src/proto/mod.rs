// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol tags, per-protocol connection state and shared envelope IO.
//!
//! Every accepted socket carries a [`ProtocolTag`] inherited from its
//! listener. A worker turns the tag into a [`ProtoState`] variant and hands
//! the connection to the matching handler. Adding a protocol means adding a
//! variant; the compiler then points at every match that needs a new arm
//! (state creation, reset, dispatch), so no dispatch site can be missed.
//!
//! Handlers do envelope-level work only: request line, header presence,
//! token extraction. Deep grammar handling stays outside the daemon.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::auth::AuthRegistry;
use crate::config;
use crate::master::MasterControl;
use crate::nvram::Nvram;
use crate::socket::Socket;

mod ctrl;
mod discovery;
mod http;
mod soap;
mod uevent;
mod upnp;

pub use ctrl::CtrlState;
pub use discovery::DiscoveryState;
pub use http::HttpState;
pub use soap::SoapState;
pub use uevent::{parse_uevent, Uevent, UeventState};
pub use upnp::{GenaState, SsdpState, UpnpHttpState};

// ===== Protocol tag =====

/// Wire protocol selector attached to listening and accepted sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolTag {
    Unknown,
    Ctrl,
    Http,
    SoapHttp,
    Discovery,
    UpnpSsdp,
    UpnpHttp,
    UpnpGena,
    Uevent,
}

impl ProtocolTag {
    /// Parse a configured protocol name; unrecognized names map to
    /// `Unknown` (the caller rejects the row).
    pub fn parse(s: &str) -> ProtocolTag {
        match s.trim().to_ascii_lowercase().as_str() {
            "ctrl" | "control" => ProtocolTag::Ctrl,
            "http" => ProtocolTag::Http,
            "soap-http" | "soap" => ProtocolTag::SoapHttp,
            "discovery" | "isdp" => ProtocolTag::Discovery,
            "upnp-ssdp" | "ssdp" => ProtocolTag::UpnpSsdp,
            "upnp-http" => ProtocolTag::UpnpHttp,
            "upnp-gena" | "gena" => ProtocolTag::UpnpGena,
            "uevent" | "kernel-uevent" => ProtocolTag::Uevent,
            _ => ProtocolTag::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolTag::Unknown => "unknown",
            ProtocolTag::Ctrl => "ctrl",
            ProtocolTag::Http => "http",
            ProtocolTag::SoapHttp => "soap-http",
            ProtocolTag::Discovery => "discovery",
            ProtocolTag::UpnpSsdp => "upnp-ssdp",
            ProtocolTag::UpnpHttp => "upnp-http",
            ProtocolTag::UpnpGena => "upnp-gena",
            ProtocolTag::Uevent => "uevent",
        }
    }

    pub fn is_known(self) -> bool {
        self != ProtocolTag::Unknown
    }
}

// ===== Handler context =====

/// Shared collaborators a handler may consult, passed in by the worker.
/// Handlers never reach for globals.
pub struct HandlerContext<'a> {
    pub nvram: &'a dyn Nvram,
    pub auth: &'a AuthRegistry,
    pub control: &'a dyn MasterControl,
    /// Set when shutdown wants this connection to wind down; read loops
    /// check it on every timeout tick.
    pub closing: &'a AtomicBool,
}

impl HandlerContext<'_> {
    pub(crate) fn closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }
}

// ===== Per-protocol state =====

/// Per-connection protocol state, one variant per supported protocol.
pub enum ProtoState {
    Ctrl(CtrlState),
    Http(HttpState),
    Soap(SoapState),
    Discovery(DiscoveryState),
    UpnpSsdp(SsdpState),
    UpnpHttp(UpnpHttpState),
    UpnpGena(GenaState),
    Uevent(UeventState),
}

impl ProtoState {
    /// Allocate state for `tag`. `Unknown` has no handler; the caller drops
    /// the connection.
    pub fn new(tag: ProtocolTag, ctx: &HandlerContext<'_>) -> Option<ProtoState> {
        match tag {
            ProtocolTag::Ctrl => Some(ProtoState::Ctrl(CtrlState::new())),
            ProtocolTag::Http => Some(ProtoState::Http(HttpState::new())),
            ProtocolTag::SoapHttp => Some(ProtoState::Soap(SoapState::new())),
            ProtocolTag::Discovery => Some(ProtoState::Discovery(DiscoveryState::new())),
            ProtocolTag::UpnpSsdp => Some(ProtoState::UpnpSsdp(SsdpState::new(ctx))),
            ProtocolTag::UpnpHttp => Some(ProtoState::UpnpHttp(UpnpHttpState::new())),
            ProtocolTag::UpnpGena => Some(ProtoState::UpnpGena(GenaState::new())),
            ProtocolTag::Uevent => Some(ProtoState::Uevent(UeventState::new())),
            ProtocolTag::Unknown => None,
        }
    }

    /// Clear per-request fields so the state starts from a clean slate.
    pub fn reset_attributes(&mut self) {
        match self {
            ProtoState::Ctrl(s) => s.reset(),
            ProtoState::Http(s) => s.reset(),
            ProtoState::Soap(s) => s.reset(),
            ProtoState::Discovery(s) => s.reset(),
            ProtoState::UpnpSsdp(s) => s.reset(),
            ProtoState::UpnpHttp(s) => s.reset(),
            ProtoState::UpnpGena(s) => s.reset(),
            ProtoState::Uevent(s) => s.reset(),
        }
    }

    /// Run the protocol handler for one connection. Returns the number of
    /// bytes written back to the peer.
    pub fn process_new_connection(
        &mut self,
        sock: &mut Socket,
        ctx: &HandlerContext<'_>,
    ) -> io::Result<u64> {
        match self {
            ProtoState::Ctrl(s) => ctrl::process(s, sock, ctx),
            ProtoState::Http(s) => http::process(s, sock, ctx),
            ProtoState::Soap(s) => soap::process(s, sock, ctx),
            ProtoState::Discovery(s) => discovery::process(s, sock, ctx),
            ProtoState::UpnpSsdp(s) => upnp::process_ssdp(s, sock, ctx),
            ProtoState::UpnpHttp(s) => upnp::process_http(s, sock, ctx),
            ProtoState::UpnpGena(s) => upnp::process_gena(s, sock, ctx),
            ProtoState::Uevent(s) => uevent::process(s, sock, ctx),
        }
    }
}

// ===== Shared envelope IO =====

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Read one newline-terminated line. `Ok(None)` means the peer closed, sent
/// nothing before the first timeout, or shutdown asked us to let go.
pub(crate) fn read_line(
    sock: &mut Socket,
    max: usize,
    closing: &AtomicBool,
) -> io::Result<Option<String>> {
    let mut line: Vec<u8> = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        match sock.read(&mut byte) {
            Ok(0) => {
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(decode_line(line)));
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    return Ok(Some(decode_line(line)));
                }
                if line.len() >= max {
                    return Err(invalid("line too long"));
                }
                line.push(byte[0]);
            }
            Err(e) if is_timeout(&e) => {
                if closing.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                if line.is_empty() {
                    // Peer connected but said nothing within the read
                    // timeout; treat it as gone.
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn decode_line(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes)
        .trim_end_matches('\r')
        .to_string()
}

/// Parsed HTTP-style request envelope: request line, headers, body bytes.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, p + 4))
        .or_else(|| buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, p + 2)))
}

/// Read and parse one request envelope. `Ok(None)` means the peer went away
/// quietly (nothing read, or shutdown pending); malformed input is an
/// `InvalidData` error the caller answers with a protocol error response.
pub(crate) fn read_request(
    sock: &mut Socket,
    closing: &AtomicBool,
) -> io::Result<Option<RequestHead>> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let (head_len, body_start) = loop {
        if let Some(ends) = find_head_end(&buf) {
            break ends;
        }
        if buf.len() >= config::HTTP_HEAD_MAX {
            return Err(invalid("request head too large"));
        }
        match sock.read(&mut chunk) {
            Ok(0) => {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(invalid("connection closed mid-request"));
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if is_timeout(&e) => {
                if closing.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                if buf.is_empty() {
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    };

    let head_text = String::from_utf8_lossy(&buf[..head_len]).to_string();
    let mut lines = head_text.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    let version = parts.next().unwrap_or_default().to_string();
    if method.is_empty() || target.is_empty() {
        return Err(invalid("malformed request line"));
    }

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut head = RequestHead {
        method,
        target,
        version,
        headers,
        body: buf[body_start..].to_vec(),
    };

    let content_len = match head.header("content-length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| invalid("bad content-length"))?,
        None => 0,
    };
    if content_len > config::HTTP_BODY_MAX {
        return Err(invalid("request body too large"));
    }
    while head.body.len() < content_len {
        match sock.read(&mut chunk) {
            Ok(0) => return Err(invalid("connection closed mid-body")),
            Ok(n) => head.body.extend_from_slice(&chunk[..n]),
            Err(e) if is_timeout(&e) => {
                if closing.load(Ordering::Relaxed) {
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    }
    head.body.truncate(content_len);
    Ok(Some(head))
}

pub(crate) fn version_supported(head: &RequestHead) -> bool {
    head.version == "HTTP/1.1" || head.version == "HTTP/1.0"
}

/// Write a full response envelope; returns the bytes put on the wire.
pub(crate) fn write_response(
    sock: &mut Socket,
    status: &str,
    content_type: &str,
    extra: &[(&str, &str)],
    body: &[u8],
) -> io::Result<u64> {
    let mut head = String::with_capacity(160);
    head.push_str("HTTP/1.1 ");
    head.push_str(status);
    head.push_str("\r\nServer: rcfgd/");
    head.push_str(crate::VERSION);
    head.push_str("\r\n");
    if !content_type.is_empty() {
        head.push_str("Content-Type: ");
        head.push_str(content_type);
        head.push_str("\r\n");
    }
    for (name, value) in extra {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    head.push_str("Connection: close\r\n\r\n");

    sock.write_all(head.as_bytes())?;
    sock.write_all(body)?;
    sock.flush()?;
    Ok((head.len() + body.len()) as u64)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parse_and_canonical_names() {
        assert_eq!(ProtocolTag::parse("ctrl"), ProtocolTag::Ctrl);
        assert_eq!(ProtocolTag::parse("SOAP-HTTP"), ProtocolTag::SoapHttp);
        assert_eq!(ProtocolTag::parse("ssdp"), ProtocolTag::UpnpSsdp);
        assert_eq!(ProtocolTag::parse("kernel-uevent"), ProtocolTag::Uevent);
        assert_eq!(ProtocolTag::parse("gopher"), ProtocolTag::Unknown);
        assert!(!ProtocolTag::parse("gopher").is_known());
        assert_eq!(ProtocolTag::SoapHttp.as_str(), "soap-http");
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some((14, 18)));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\n\nrest"), Some((14, 16)));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[test]
    fn test_request_head_lookup_is_case_insensitive() {
        let head = RequestHead {
            method: "GET".into(),
            target: "/".into(),
            version: "HTTP/1.1".into(),
            headers: vec![("Content-Length".into(), "4".into())],
            body: Vec::new(),
        };
        assert_eq!(head.header("content-length"), Some("4"));
        assert_eq!(head.header("CONTENT-LENGTH"), Some("4"));
        assert_eq!(head.header("host"), None);
    }
}
