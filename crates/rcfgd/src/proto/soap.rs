// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOAP-over-HTTP nvram access.
//!
//! The web UI posts small SOAP 1.2 envelopes carrying one nvram operation
//! each. Handling is token level: the operation is recognized by its
//! element name and `<name>`/`<value>` children are extracted by scanning,
//! with or without a namespace prefix. No XML tree is built.

use std::io;

use crate::nvram::Nvram;
use crate::proto::{
    http, read_request, version_supported, write_response, HandlerContext,
};
use crate::socket::Socket;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml";

/// Operation element names, most specific first: `unsetNvram` must be
/// probed before `setNvram`, which it contains.
const OPERATIONS: [&str; 5] = [
    "commitNvram",
    "listNvram",
    "unsetNvram",
    "getNvram",
    "setNvram",
];

pub struct SoapState {
    op: Option<&'static str>,
}

impl SoapState {
    pub(crate) fn new() -> SoapState {
        SoapState { op: None }
    }

    pub(crate) fn reset(&mut self) {
        self.op = None;
    }
}

pub(crate) fn process(
    state: &mut SoapState,
    sock: &mut Socket,
    ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let head = match read_request(sock, ctx.closing) {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(0),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            log::debug!("[soap] malformed request: {}", e);
            return fault(sock, "400 Bad Request", "malformed request");
        }
        Err(e) => return Err(e),
    };

    if !version_supported(&head) {
        return fault(sock, "505 HTTP Version Not Supported", "http version");
    }
    if let Err(realm) = http::authorize(&head, ctx) {
        let challenge = format!("Basic realm=\"{}\"", realm);
        return write_response(
            sock,
            "401 Unauthorized",
            SOAP_CONTENT_TYPE,
            &[("WWW-Authenticate", challenge.as_str())],
            envelope("<env:Fault><env:Reason>authorization required</env:Reason></env:Fault>")
                .as_bytes(),
        );
    }
    if head.method != "POST" {
        return fault(sock, "501 Not Implemented", "SOAP rides on POST");
    }

    let body = String::from_utf8_lossy(&head.body).to_string();
    let op = match detect_op(&body) {
        Some(op) => op,
        None => {
            log::debug!("[soap] no nvram operation in request body");
            return fault(sock, "400 Bad Request", "unknown operation");
        }
    };
    state.op = Some(op);

    let written = dispatch(op, &body, sock, ctx.nvram)?;
    log::debug!("[soap] {} -> {} bytes", state.op.unwrap_or("?"), written);
    Ok(written)
}

fn dispatch(
    op: &'static str,
    body: &str,
    sock: &mut Socket,
    nvram: &dyn Nvram,
) -> io::Result<u64> {
    match op {
        "getNvram" => {
            let name = match extract_tag(body, "name") {
                Some(name) if !name.is_empty() => name,
                _ => return fault(sock, "400 Bad Request", "getNvram wants a name"),
            };
            let inner = match nvram.get(&name) {
                Some(value) => format!(
                    "<getNvramResponse><name>{}</name><value>{}</value>\
                     <result>0</result></getNvramResponse>",
                    xml_escape(&name),
                    xml_escape(&value)
                ),
                None => format!(
                    "<getNvramResponse><name>{}</name><result>1</result></getNvramResponse>",
                    xml_escape(&name)
                ),
            };
            respond(sock, &inner)
        }
        "setNvram" => {
            let name = match extract_tag(body, "name") {
                Some(name) if !name.is_empty() => name,
                _ => return fault(sock, "400 Bad Request", "setNvram wants a name"),
            };
            let value = extract_tag(body, "value").unwrap_or_default();
            let inner = match nvram.set(&name, &value) {
                Ok(()) => "<setNvramResponse><result>0</result></setNvramResponse>".to_string(),
                Err(e) => format!(
                    "<setNvramResponse><result>1</result><error>{}</error></setNvramResponse>",
                    xml_escape(&e.to_string())
                ),
            };
            respond(sock, &inner)
        }
        "unsetNvram" => {
            let name = match extract_tag(body, "name") {
                Some(name) if !name.is_empty() => name,
                _ => return fault(sock, "400 Bad Request", "unsetNvram wants a name"),
            };
            let inner = match nvram.unset(&name) {
                Ok(()) => "<unsetNvramResponse><result>0</result></unsetNvramResponse>".to_string(),
                Err(e) => format!(
                    "<unsetNvramResponse><result>1</result><error>{}</error></unsetNvramResponse>",
                    xml_escape(&e.to_string())
                ),
            };
            respond(sock, &inner)
        }
        "listNvram" => {
            let mut inner = String::from("<listNvramResponse><result>0</result>");
            for (name, value) in nvram.list() {
                inner.push_str(&format!(
                    "<entry><name>{}</name><value>{}</value></entry>",
                    xml_escape(&name),
                    xml_escape(&value)
                ));
            }
            inner.push_str("</listNvramResponse>");
            respond(sock, &inner)
        }
        "commitNvram" => {
            let inner = match nvram.commit() {
                Ok(()) => "<commitNvramResponse><result>0</result></commitNvramResponse>"
                    .to_string(),
                Err(e) => format!(
                    "<commitNvramResponse><result>1</result><error>{}</error>\
                     </commitNvramResponse>",
                    xml_escape(&e.to_string())
                ),
            };
            respond(sock, &inner)
        }
        _ => fault(sock, "400 Bad Request", "unknown operation"),
    }
}

fn detect_op(body: &str) -> Option<&'static str> {
    OPERATIONS.iter().copied().find(|op| body.contains(op))
}

fn respond(sock: &mut Socket, inner: &str) -> io::Result<u64> {
    write_response(sock, "200 OK", SOAP_CONTENT_TYPE, &[], envelope(inner).as_bytes())
}

fn fault(sock: &mut Socket, status: &str, reason: &str) -> io::Result<u64> {
    let inner = format!(
        "<env:Fault><env:Reason>{}</env:Reason></env:Fault>",
        xml_escape(reason)
    );
    write_response(sock, status, SOAP_CONTENT_TYPE, &[], envelope(&inner).as_bytes())
}

fn envelope(inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n\
         <env:Envelope xmlns:env=\"http://www.w3.org/2003/05/soap-envelope\">\r\n\
         <env:Body>\r\n{}\r\n</env:Body>\r\n</env:Envelope>\r\n",
        inner
    )
}

/// Pull the text of `<tag>..</tag>` out of `body`, accepting an optional
/// namespace prefix on the element name.
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    if let Some(start) = body.find(&open) {
        let rest = &body[start + open.len()..];
        let end = rest.find(&format!("</{}>", tag))?;
        return Some(xml_unescape(rest[..end].trim()));
    }

    let marker = format!(":{}>", tag);
    let start = body.find(&marker)?;
    let rest = &body[start + marker.len()..];
    let end = rest.find(&marker)?;
    let cut = rest[..end].rfind("</").unwrap_or(end);
    Some(xml_unescape(rest[..cut].trim()))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}
