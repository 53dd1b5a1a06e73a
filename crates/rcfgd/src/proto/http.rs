// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generic HTTP envelope handler.
//!
//! Serves the plain-text daemon status page and enforces the Auth Registry
//! on listeners that carry credentials. Anything beyond `GET` on a known
//! path is answered with the matching HTTP error status; the daemon never
//! pretends to be a full web server.

use std::io;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::auth::AuthScheme;
use crate::proto::{
    read_request, version_supported, write_response, HandlerContext, RequestHead,
};
use crate::socket::Socket;

/// Per-connection request attributes, kept for the post-reply log line.
pub struct HttpState {
    method: String,
    target: String,
}

impl HttpState {
    pub(crate) fn new() -> HttpState {
        HttpState {
            method: String::new(),
            target: String::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.method.clear();
        self.target.clear();
    }
}

pub(crate) fn process(
    state: &mut HttpState,
    sock: &mut Socket,
    ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let head = match read_request(sock, ctx.closing) {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(0),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            log::debug!("[http] malformed request: {}", e);
            return write_response(
                sock,
                "400 Bad Request",
                "text/plain",
                &[],
                b"bad request\n",
            );
        }
        Err(e) => return Err(e),
    };

    state.method = head.method.clone();
    state.target = head.target.clone();
    let (status, written) = route(&head, sock, ctx)?;
    log::debug!("[http] {} {} -> {}", state.method, state.target, status);
    Ok(written)
}

fn route(
    head: &RequestHead,
    sock: &mut Socket,
    ctx: &HandlerContext<'_>,
) -> io::Result<(&'static str, u64)> {
    if !version_supported(head) {
        let status = "505 HTTP Version Not Supported";
        let n = write_response(sock, status, "text/plain", &[], b"version not supported\n")?;
        return Ok((status, n));
    }

    if let Err(realm) = authorize(head, ctx) {
        let status = "401 Unauthorized";
        let challenge = format!("Basic realm=\"{}\"", realm);
        let n = write_response(
            sock,
            status,
            "text/plain",
            &[("WWW-Authenticate", challenge.as_str())],
            b"authorization required\n",
        )?;
        return Ok((status, n));
    }

    if head.method != "GET" {
        let status = "501 Not Implemented";
        let n = write_response(sock, status, "text/plain", &[], b"method not implemented\n")?;
        return Ok((status, n));
    }

    match head.target.as_str() {
        "/" | "/status" => {
            let body = status_page(ctx);
            let n = write_response(sock, "200 OK", "text/plain", &[], body.as_bytes())?;
            Ok(("200 OK", n))
        }
        _ => {
            let n = write_response(sock, "404 Not Found", "text/plain", &[], b"not found\n")?;
            Ok(("404 Not Found", n))
        }
    }
}

/// Check the request against the Auth Registry snapshot. An empty registry
/// means the listener is open. On failure the realm to challenge with is
/// returned. Shared with the SOAP handler, which rides the same envelope.
pub(crate) fn authorize(head: &RequestHead, ctx: &HandlerContext<'_>) -> Result<(), String> {
    let entries = ctx.auth.snapshot();
    if entries.is_empty() {
        return Ok(());
    }

    if let Some(credentials) = head.header("authorization") {
        for entry in &entries {
            if entry.scheme != AuthScheme::Basic {
                // Digest needs a challenge round-trip this envelope layer
                // does not run; such entries only gate, never match.
                continue;
            }
            let token = BASE64.encode(format!("{}:{}", entry.user, entry.secret));
            if credentials == format!("Basic {}", token) {
                return Ok(());
            }
        }
    }

    let realm = entries
        .first()
        .map(|e| e.realm.clone())
        .unwrap_or_else(|| "rcfgd".to_string());
    Err(realm)
}

fn status_page(ctx: &HandlerContext<'_>) -> String {
    let s = ctx.control.status();
    format!(
        "rcfgd {}\nstate={}\nthreads={}/{} idle={}\nqueue={}\nlisteners={}\n",
        crate::VERSION,
        s.state.as_str(),
        s.num_threads,
        s.threads_max,
        s.num_idle,
        s.queue_len,
        s.num_listeners
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthEntry, AuthRegistry};
    use crate::nvram::NvramStore;
    use crate::proto::testutil::{ctx, TestControl};
    use crate::proto::ProtocolTag;
    use std::io::{Read as _, Write as _};
    use std::sync::atomic::AtomicBool;

    fn serve(request: &str, auth: &AuthRegistry) -> String {
        let nvram = NvramStore::new();
        let control = TestControl::new();
        let closing = AtomicBool::new(false);
        let ctx = ctx(&nvram, auth, &control, &closing);

        let (mut sock, peer) = Socket::test_pair(ProtocolTag::Http);
        (&peer).write_all(request.as_bytes()).unwrap();
        let mut state = HttpState::new();
        let written = process(&mut state, &mut sock, &ctx).unwrap();
        drop(sock);

        let mut reply = String::new();
        (&peer).read_to_string(&mut reply).unwrap();
        assert_eq!(written, reply.len() as u64);
        reply
    }

    fn basic_entry() -> AuthEntry {
        AuthEntry::new(AuthScheme::Basic, "admin", "router", "/", "hunter2")
    }

    #[test]
    fn test_get_root_serves_status_page() {
        let auth = AuthRegistry::new();
        let reply = serve("GET / HTTP/1.1\r\nHost: router\r\n\r\n", &auth);
        assert!(reply.starts_with("HTTP/1.1 200 OK"), "got: {}", reply);
        assert!(reply.contains("state=running"));
        assert!(reply.contains("Connection: close"));
    }

    #[test]
    fn test_malformed_request_line_gets_400() {
        let auth = AuthRegistry::new();
        let reply = serve("garbage\r\n\r\n", &auth);
        assert!(reply.starts_with("HTTP/1.1 400"), "got: {}", reply);
    }

    #[test]
    fn test_unsupported_version_gets_505() {
        let auth = AuthRegistry::new();
        let reply = serve("GET / HTTP/2.0\r\n\r\n", &auth);
        assert!(reply.starts_with("HTTP/1.1 505"), "got: {}", reply);
    }

    #[test]
    fn test_missing_credentials_get_401_with_challenge() {
        let auth = AuthRegistry::new();
        auth.insert(basic_entry());
        let reply = serve("GET / HTTP/1.1\r\n\r\n", &auth);
        assert!(reply.starts_with("HTTP/1.1 401"), "got: {}", reply);
        assert!(reply.contains("WWW-Authenticate: Basic realm=\"router\""));
    }

    #[test]
    fn test_valid_basic_token_is_accepted() {
        let auth = AuthRegistry::new();
        auth.insert(basic_entry());
        let token = BASE64.encode("admin:hunter2");
        let request = format!("GET / HTTP/1.1\r\nAuthorization: Basic {}\r\n\r\n", token);
        let reply = serve(&request, &auth);
        assert!(reply.starts_with("HTTP/1.1 200"), "got: {}", reply);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let auth = AuthRegistry::new();
        auth.insert(basic_entry());
        let token = BASE64.encode("admin:letmein");
        let request = format!("GET / HTTP/1.1\r\nAuthorization: Basic {}\r\n\r\n", token);
        let reply = serve(&request, &auth);
        assert!(reply.starts_with("HTTP/1.1 401"), "got: {}", reply);
    }

    #[test]
    fn test_post_gets_501() {
        let auth = AuthRegistry::new();
        let reply = serve(
            "POST /status HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi",
            &auth,
        );
        assert!(reply.starts_with("HTTP/1.1 501"), "got: {}", reply);
    }

    #[test]
    fn test_unknown_path_gets_404() {
        let auth = AuthRegistry::new();
        let reply = serve("GET /cgi-bin/luci HTTP/1.1\r\n\r\n", &auth);
        assert!(reply.starts_with("HTTP/1.1 404"), "got: {}", reply);
    }
}
