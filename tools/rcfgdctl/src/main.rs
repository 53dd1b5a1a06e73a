// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rcfgdctl - Command line client for the rcfgd control socket
//!
//! Speaks the one-line control protocol: one command in, one reply out,
//! connection closed. The exit code follows the reply prefix, so shell
//! scripts can branch on it.
//!
//! # Usage
//!
//! ```bash
//! # Daemon status
//! rcfgdctl status
//!
//! # Query and edit nvram
//! rcfgdctl get lan.ipaddr
//! rcfgdctl set lan.ipaddr 192.168.1.1
//! rcfgdctl commit
//!
//! # Against a non-default control socket
//! rcfgdctl -s /tmp/test.ctl reload
//! ```

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::process::exit;
use std::time::Duration;

use rcfgd::config::DEF_CTRL_SOCK_PATH;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut socket_path = DEF_CTRL_SOCK_PATH.to_string();
    let mut rest: &[String] = &args;
    if let [flag, path, tail @ ..] = rest {
        if flag == "-s" || flag == "--socket" {
            socket_path = path.clone();
            rest = tail;
        }
    }

    let Some(line) = build_line(rest) else {
        usage();
        exit(2);
    };

    match send(&socket_path, &line) {
        Ok(reply) => {
            print!("{}", reply);
            if reply.starts_with("OK") {
                exit(0);
            }
            exit(1);
        }
        Err(e) => {
            eprintln!("rcfgdctl: {}: {}", socket_path, e);
            eprintln!("Is rcfgd running?");
            exit(1);
        }
    }
}

/// Map the command line onto a control protocol line, or None for unknown
/// commands and wrong arity.
fn build_line(args: &[String]) -> Option<String> {
    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    let line = match argv.as_slice() {
        ["status"] => "status".to_string(),
        ["reload"] => "reload".to_string(),
        ["stop"] => "stop".to_string(),
        ["threads", n] => format!("threads {}", n),
        ["get", name] => format!("nvram get {}", name),
        ["set", name, value @ ..] if !value.is_empty() => {
            format!("nvram set {} {}", name, value.join(" "))
        }
        ["unset", name] => format!("nvram unset {}", name),
        ["list"] => "nvram list".to_string(),
        ["commit"] => "nvram commit".to_string(),
        ["auth-list"] => "auth list".to_string(),
        _ => return None,
    };
    Some(line)
}

/// One round trip: connect, send the line, drain the reply to EOF.
fn send(path: &str, line: &str) -> std::io::Result<String> {
    let mut stream = UnixStream::connect(path)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    Ok(reply)
}

fn usage() {
    eprintln!("rcfgdctl - control client for rcfgd");
    eprintln!();
    eprintln!("Usage: rcfgdctl [-s SOCKET] COMMAND");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                 daemon state, thread and queue counters");
    eprintln!("  reload                 schedule a config reload");
    eprintln!("  stop                   schedule a daemon stop");
    eprintln!("  threads N              set the worker thread cap");
    eprintln!("  get NAME               read one nvram value");
    eprintln!("  set NAME VALUE...      write one nvram value");
    eprintln!("  unset NAME             delete one nvram value");
    eprintln!("  list                   dump all nvram rows");
    eprintln!("  commit                 persist nvram to its backing file");
    eprintln!("  auth-list              show access-control rows (no secrets)");
    eprintln!();
    eprintln!("Default socket: {}", DEF_CTRL_SOCK_PATH);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(words: &[&str]) -> Option<String> {
        let owned: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        build_line(&owned)
    }

    #[test]
    fn test_simple_commands_map_straight_through() {
        assert_eq!(line(&["status"]).as_deref(), Some("status"));
        assert_eq!(line(&["reload"]).as_deref(), Some("reload"));
        assert_eq!(line(&["stop"]).as_deref(), Some("stop"));
        assert_eq!(line(&["commit"]).as_deref(), Some("nvram commit"));
        assert_eq!(line(&["auth-list"]).as_deref(), Some("auth list"));
    }

    #[test]
    fn test_set_joins_multi_word_values() {
        assert_eq!(
            line(&["set", "wan.mode", "static", "routed"]).as_deref(),
            Some("nvram set wan.mode static routed")
        );
    }

    #[test]
    fn test_set_without_value_is_rejected() {
        assert_eq!(line(&["set", "wan.mode"]), None);
    }

    #[test]
    fn test_unknown_and_empty_are_rejected() {
        assert_eq!(line(&[]), None);
        assert_eq!(line(&["frobnicate"]), None);
        assert_eq!(line(&["threads"]), None);
    }
}
