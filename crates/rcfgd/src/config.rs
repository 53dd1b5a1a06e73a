// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon-wide defaults and configuration key names.
//!
//! Runtime configuration lives in the key/value store (see [`crate::nvram`]);
//! this module only defines the compile-time defaults and the key-name
//! constants under which the master looks its configuration up. Keys use a
//! flat `section.field` scheme; listening sockets and auth entries are
//! numbered rows (`sock.<i>.domain`, `auth.<i>.user`, ...) counted by
//! `common.sock_num` / `common.auth_num`.

use std::time::Duration;

// ===== Filesystem defaults =====

/// Default path of the daemon configuration file.
pub const DEF_CONFIG_PATH: &str = "/etc/rcfgd.conf";

/// Default path of the mandatory local control socket.
///
/// A leading `@` selects the abstract unix namespace instead of a
/// filesystem path.
pub const DEF_CTRL_SOCK_PATH: &str = "/tmp/rcfgd/rcfgd.ctl";

/// Default path of the SOAP/HTTP key-value service socket.
pub const DEF_NVRAM_SOCK_PATH: &str = "/tmp/rcfgd/nvram.sock";

/// Default rules directory handlers may consult for static payloads.
pub const DEF_RULES_PATH: &str = "/etc/rcfgd/rules";

/// Default locale reported to peers.
pub const DEF_LOCALE: &str = "C";

// ===== Engine sizing =====

/// Capacity of the accepted-connection ring between the master and the
/// worker pool. A full ring blocks the accept loop (backpressure); the
/// kernel listen backlog absorbs short bursts.
pub const SOCK_QUEUE_LEN: usize = 20;

/// Default upper bound on concurrently live worker threads.
pub const DEF_THREADS_MAX: usize = 8;

/// Listen backlog requested for stream listeners.
pub const ACCEPT_BACKLOG: i32 = 20;

// ===== Wait bounds =====

/// How long the accept loop waits for listener readiness before re-checking
/// lifecycle state.
pub const MASTER_WAIT: Duration = Duration::from_secs(10);

/// How long an idle worker waits on the connection ring before re-checking
/// lifecycle state.
pub const WORKER_WAIT: Duration = Duration::from_secs(10);

/// Read timeout applied to every accepted connection. Bounds how long a
/// handler can sit in a read while shutdown is pending; handlers re-check
/// their close-request flag on each expiry.
pub const CONN_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Polling interval used by `Master::stop` while waiting for the finish
/// routine to report `Stopped`.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ===== Request size caps =====

/// Maximum accepted length of a control-socket command line.
pub const CTRL_LINE_MAX: usize = 4096;

/// Maximum accepted size of an HTTP-style request head (request line plus
/// headers, including the terminating blank line).
pub const HTTP_HEAD_MAX: usize = 8 * 1024;

/// Maximum accepted size of an HTTP-style request body.
pub const HTTP_BODY_MAX: usize = 64 * 1024;

/// Receive buffer size for datagram handlers (SSDP, discovery, uevent).
pub const DGRAM_BUF_LEN: usize = 4096;

// ===== Common configuration keys =====

/// Log verbosity: `error`/`warn`/`info`/`debug`/`trace`/`off`, or a
/// syslog-style digit 0-7.
pub const KEY_LOG_LEVEL: &str = "common.log_level";

/// Locale announced by protocol handlers.
pub const KEY_LOCALE: &str = "common.locale";

/// Rules directory override.
pub const KEY_RULES_PATH: &str = "common.rules_path";

/// Number of configured listening-socket rows.
pub const KEY_SOCK_NUM: &str = "common.sock_num";

/// Number of configured auth rows.
pub const KEY_AUTH_NUM: &str = "common.auth_num";

// ===== Numbered-row fields =====

pub const SOCK_FIELD_DOMAIN: &str = "domain";
pub const SOCK_FIELD_TYPE: &str = "type";
pub const SOCK_FIELD_PROTOCOL: &str = "protocol";
pub const SOCK_FIELD_ADDRESS: &str = "address";

pub const AUTH_FIELD_TYPE: &str = "type";
pub const AUTH_FIELD_USER: &str = "user";
pub const AUTH_FIELD_REALM: &str = "realm";
pub const AUTH_FIELD_DOMAIN: &str = "domain";
pub const AUTH_FIELD_SECRET: &str = "secret";

/// Key of field `field` in listening-socket row `index`.
pub fn sock_key(index: usize, field: &str) -> String {
    format!("sock.{}.{}", index, field)
}

/// Key of field `field` in auth row `index`.
pub fn auth_key(index: usize, field: &str) -> String {
    format!("auth.{}.{}", index, field)
}

// ===== UPnP keys =====

/// Device description URL advertised in SSDP responses.
pub const KEY_UPNP_LOCATION: &str = "upnp.location";

/// Unique service name advertised in SSDP responses.
pub const KEY_UPNP_USN: &str = "upnp.usn";

/// Friendly device name embedded in the description document.
pub const KEY_UPNP_FRIENDLY_NAME: &str = "upnp.friendly_name";

/// Request path under which the device description is served.
pub const UPNP_DESC_PATH: &str = "/desc.xml";

/// Fallback description URL when `upnp.location` is unset.
pub const DEF_UPNP_LOCATION: &str = "http://192.168.1.1/desc.xml";

/// Fallback unique service name when `upnp.usn` is unset.
pub const DEF_UPNP_USN: &str = "uuid:rcfgd-router::upnp:rootdevice";

/// Fallback friendly name when `upnp.friendly_name` is unset.
pub const DEF_UPNP_FRIENDLY_NAME: &str = "rcfgd router";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_keys() {
        assert_eq!(sock_key(0, SOCK_FIELD_DOMAIN), "sock.0.domain");
        assert_eq!(sock_key(12, SOCK_FIELD_ADDRESS), "sock.12.address");
        assert_eq!(auth_key(3, AUTH_FIELD_SECRET), "auth.3.secret");
    }
}
