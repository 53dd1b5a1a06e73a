// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line-oriented control channel.
//!
//! One command per connection: a newline-terminated request, one `OK`/`ERR`
//! reply, then the worker closes the socket. This is the surface `rcfgdctl`
//! talks to. Reload and stop are not executed on the worker thread; the
//! handler files a request with the master and the supervising thread picks
//! it up, otherwise the calling worker would be waiting for its own drain.

use std::io::{self, Write};

use crate::config;
use crate::proto::{read_line, HandlerContext};
use crate::socket::Socket;

/// Per-connection control state: the parsed argument vector of the last
/// command, kept for the post-reply log line.
pub struct CtrlState {
    args: Vec<String>,
}

impl CtrlState {
    pub(crate) fn new() -> CtrlState {
        CtrlState { args: Vec::new() }
    }

    pub(crate) fn reset(&mut self) {
        self.args.clear();
    }
}

pub(crate) fn process(
    state: &mut CtrlState,
    sock: &mut Socket,
    ctx: &HandlerContext<'_>,
) -> io::Result<u64> {
    let line = match read_line(sock, config::CTRL_LINE_MAX, ctx.closing)? {
        Some(line) => line,
        None => return Ok(0),
    };
    state.args = line.split_whitespace().map(str::to_string).collect();

    let reply = execute(&state.args, ctx);
    sock.write_all(reply.as_bytes())?;
    sock.flush()?;
    log::debug!(
        "[ctrl] '{}' -> {}",
        state.args.join(" "),
        reply.split_whitespace().next().unwrap_or("?")
    );
    Ok(reply.len() as u64)
}

fn execute(args: &[String], ctx: &HandlerContext<'_>) -> String {
    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    match argv.as_slice() {
        [] => "ERR empty command\n".to_string(),
        ["status"] => {
            let s = ctx.control.status();
            format!(
                "OK state={} threads={} idle={} cap={} queue={} listeners={}\n",
                s.state.as_str(),
                s.num_threads,
                s.num_idle,
                s.threads_max,
                s.queue_len,
                s.num_listeners
            )
        }
        ["reload"] => {
            ctx.control.request_reload();
            "OK reload scheduled\n".to_string()
        }
        ["stop"] => {
            ctx.control.request_stop();
            "OK stopping\n".to_string()
        }
        ["threads", n] => match n.parse::<usize>() {
            Ok(cap) if cap >= 1 => {
                ctx.control.set_thread_cap(cap);
                format!("OK threads_max={}\n", cap)
            }
            _ => "ERR threads wants a positive count\n".to_string(),
        },
        ["nvram", "get", name] => match ctx.nvram.get(name) {
            Some(value) => format!("OK {}\n", value),
            None => "ERR no such name\n".to_string(),
        },
        ["nvram", "set", name, ..] => {
            let value = argv[3..].join(" ");
            match ctx.nvram.set(name, &value) {
                Ok(()) => "OK set\n".to_string(),
                Err(e) => format!("ERR {}\n", e),
            }
        }
        ["nvram", "unset", name] => match ctx.nvram.unset(name) {
            Ok(()) => "OK unset\n".to_string(),
            Err(e) => format!("ERR {}\n", e),
        },
        ["nvram", "list"] => {
            let entries = ctx.nvram.list();
            let mut out = format!("OK n={}\n", entries.len());
            for (name, value) in entries {
                out.push_str(&name);
                out.push('=');
                out.push_str(&value);
                out.push('\n');
            }
            out
        }
        ["nvram", "commit"] => match ctx.nvram.commit() {
            Ok(()) => "OK committed\n".to_string(),
            Err(e) => format!("ERR {}\n", e),
        },
        ["auth", "list"] => {
            let entries = ctx.auth.snapshot();
            let mut out = format!("OK n={}\n", entries.len());
            for e in &entries {
                out.push_str(&format!(
                    "{} {} {} {}\n",
                    e.scheme, e.user, e.realm, e.domain
                ));
            }
            out
        }
        _ => "ERR unknown command\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::testutil::{ctx, TestControl};
    use crate::proto::ProtocolTag;
    use crate::auth::{AuthEntry, AuthRegistry, AuthScheme};
    use crate::nvram::{Nvram, NvramStore};
    use std::io::Read as _;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn run_command(line: &str, nvram: &NvramStore, auth: &AuthRegistry) -> (String, TestControl) {
        let control = TestControl::new();
        let closing = AtomicBool::new(false);
        let reply = {
            let ctx = ctx(nvram, auth, &control, &closing);
            let (mut sock, peer) = Socket::test_pair(ProtocolTag::Ctrl);
            (&peer)
                .write_all(format!("{}\n", line).as_bytes())
                .unwrap();
            let mut state = CtrlState::new();
            let written = process(&mut state, &mut sock, &ctx).unwrap();
            drop(sock);
            let mut reply = String::new();
            (&peer).read_to_string(&mut reply).unwrap();
            assert_eq!(written, reply.len() as u64);
            reply
        };
        (reply, control)
    }

    #[test]
    fn test_status_reports_counts() {
        let nvram = NvramStore::new();
        let auth = AuthRegistry::new();
        let (reply, _) = run_command("status", &nvram, &auth);
        assert!(reply.starts_with("OK state=running"), "got: {}", reply);
        assert!(reply.contains("cap=4"));
    }

    #[test]
    fn test_reload_and_stop_are_requests_not_calls() {
        let nvram = NvramStore::new();
        let auth = AuthRegistry::new();
        let (reply, control) = run_command("reload", &nvram, &auth);
        assert!(reply.starts_with("OK"));
        assert_eq!(control.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(control.stops.load(Ordering::SeqCst), 0);

        let (reply, control) = run_command("stop", &nvram, &auth);
        assert!(reply.starts_with("OK"));
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nvram_commands_round_trip() {
        let nvram = NvramStore::new();
        let auth = AuthRegistry::new();

        let (reply, _) = run_command("nvram set lan.proto static routed", &nvram, &auth);
        assert_eq!(reply, "OK set\n");
        assert_eq!(nvram.list().len(), 1);

        let (reply, _) = run_command("nvram get lan.proto", &nvram, &auth);
        assert_eq!(reply, "OK static routed\n");

        let (reply, _) = run_command("nvram list", &nvram, &auth);
        assert_eq!(reply, "OK n=1\nlan.proto=static routed\n");

        let (reply, _) = run_command("nvram unset lan.proto", &nvram, &auth);
        assert_eq!(reply, "OK unset\n");

        let (reply, _) = run_command("nvram get lan.proto", &nvram, &auth);
        assert!(reply.starts_with("ERR"));
    }

    #[test]
    fn test_threads_validates_count() {
        let nvram = NvramStore::new();
        let auth = AuthRegistry::new();
        let (reply, control) = run_command("threads 6", &nvram, &auth);
        assert_eq!(reply, "OK threads_max=6\n");
        assert_eq!(control.cap.load(Ordering::SeqCst), 6);

        let (reply, _) = run_command("threads zero", &nvram, &auth);
        assert!(reply.starts_with("ERR"));
        let (reply, _) = run_command("threads 0", &nvram, &auth);
        assert!(reply.starts_with("ERR"));
    }

    #[test]
    fn test_auth_list_hides_secrets() {
        let nvram = NvramStore::new();
        let auth = AuthRegistry::new();
        auth.insert(AuthEntry::new(
            AuthScheme::Basic,
            "admin",
            "router",
            "/",
            "hunter2",
        ));
        let (reply, _) = run_command("auth list", &nvram, &auth);
        assert_eq!(reply, "OK n=1\nbasic admin router /\n");
        assert!(!reply.contains("hunter2"));
    }

    #[test]
    fn test_unknown_command_is_err() {
        let nvram = NvramStore::new();
        let auth = AuthRegistry::new();
        let (reply, _) = run_command("frobnicate", &nvram, &auth);
        assert_eq!(reply, "ERR unknown command\n");
    }
}
