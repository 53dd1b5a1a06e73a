// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic

//! End-to-end daemon lifecycle tests
//!
//! Each test drives a real master over its control socket: listeners come up
//! from nvram rows, connections flow through the queue into worker threads,
//! and reload/stop barriers are observed from the outside.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::LevelFilter;
use rcfgd::{Master, MasterOptions, MasterState, Nvram, NvramStore, PendingRequest};
use tempfile::tempdir;

// ===== Helpers =====

fn write_conf(path: &Path, rows: &[(&str, &str)]) {
    let mut text = String::new();
    for (key, value) in rows {
        text.push_str(key);
        text.push('=');
        text.push_str(value);
        text.push('\n');
    }
    fs::write(path, text).expect("write nvram conf");
}

/// Master wired to a tempdir: short poll waits so tests finish quickly,
/// logging off so `cargo test` output stays readable.
fn start_master(dir: &Path, conf_rows: &[(&str, &str)], threads_max: usize) -> (Master, String, Arc<NvramStore>) {
    let conf = dir.join("nvram.conf");
    write_conf(&conf, conf_rows);
    let store = Arc::new(NvramStore::with_file(&conf));
    store.load().expect("load conf");

    let ctrl_path = dir.join("ctl.sock").display().to_string();
    let options = MasterOptions {
        ctrl_path: ctrl_path.clone(),
        nvram_sock_path: None,
        threads_max,
        accept_wait: Duration::from_millis(100),
        worker_wait: Duration::from_millis(200),
        log_level: Some(LevelFilter::Off),
    };
    let master = Master::new(Arc::<NvramStore>::clone(&store), options);
    master.start().expect("master start");
    (master, ctrl_path, store)
}

/// One control protocol round trip: send a line, read the reply to EOF.
fn ctrl(path: &str, line: &str) -> String {
    let mut stream = UnixStream::connect(path).expect("connect ctrl socket");
    stream
        .set_read_timeout(Some(Duration::from_secs(3)))
        .expect("read timeout");
    stream
        .write_all(format!("{}\n", line).as_bytes())
        .expect("send command");
    let mut reply = String::new();
    stream.read_to_string(&mut reply).expect("read reply");
    reply
}

/// Raw HTTP exchange over a unix socket listener.
fn http_get(sock_path: &Path, target: &str, auth: Option<&str>) -> String {
    let mut stream = UnixStream::connect(sock_path).expect("connect http socket");
    stream
        .set_read_timeout(Some(Duration::from_secs(3)))
        .expect("read timeout");
    let mut req = format!("GET {} HTTP/1.1\r\nHost: router\r\n", target);
    if let Some(token) = auth {
        req.push_str(&format!("Authorization: {}\r\n", token));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).expect("send request");
    let mut reply = String::new();
    stream.read_to_string(&mut reply).expect("read response");
    reply
}

// ===== Tests =====

#[test]
fn test_status_and_nvram_over_ctrl_socket() {
    let dir = tempdir().expect("tempdir");
    let (master, ctrl_path, _store) = start_master(dir.path(), &[], 4);

    let status = ctrl(&ctrl_path, "status");
    assert!(status.starts_with("OK state=running"), "got: {}", status);
    assert!(status.contains("listeners=1"), "got: {}", status);

    assert_eq!(ctrl(&ctrl_path, "nvram set lan.ipaddr 10.0.0.1"), "OK set\n");
    assert_eq!(ctrl(&ctrl_path, "nvram get lan.ipaddr"), "OK 10.0.0.1\n");
    assert_eq!(ctrl(&ctrl_path, "nvram commit"), "OK committed\n");

    let persisted = fs::read_to_string(dir.path().join("nvram.conf")).expect("read conf");
    assert!(persisted.contains("lan.ipaddr=10.0.0.1"), "got: {}", persisted);

    master.stop();
    assert_eq!(master.state(), MasterState::Stopped);
}

#[test]
fn test_stop_request_closes_every_listener() {
    let dir = tempdir().expect("tempdir");
    let (master, ctrl_path, _store) = start_master(dir.path(), &[], 4);

    assert_eq!(ctrl(&ctrl_path, "stop"), "OK stopping\n");
    // The handler only files the request; the supervising thread performs it.
    assert_eq!(master.take_request(), Some(PendingRequest::Stop));
    master.stop();

    assert_eq!(master.state(), MasterState::Stopped);
    assert!(
        UnixStream::connect(&ctrl_path).is_err(),
        "ctrl socket still accepting after stop"
    );
    assert!(
        !Path::new(&ctrl_path).exists(),
        "ctrl socket path not unlinked"
    );
}

#[test]
fn test_http_listener_from_nvram_rows() {
    let dir = tempdir().expect("tempdir");
    let web = dir.path().join("web.sock");
    let web_addr = web.display().to_string();
    let (master, ctrl_path, _store) = start_master(
        dir.path(),
        &[
            ("common.sock_num", "1"),
            ("sock.0.domain", "local"),
            ("sock.0.type", "stream"),
            ("sock.0.protocol", "http"),
            ("sock.0.address", &web_addr),
        ],
        4,
    );

    let status = ctrl(&ctrl_path, "status");
    assert!(status.contains("listeners=2"), "got: {}", status);

    let reply = http_get(&web, "/status", None);
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "got: {}", reply);
    assert!(reply.contains("state=running"), "got: {}", reply);

    let missing = http_get(&web, "/nowhere", None);
    assert!(missing.starts_with("HTTP/1.1 404"), "got: {}", missing);

    master.stop();
    assert!(!web.exists(), "web socket path not unlinked after stop");
}

#[test]
fn test_http_auth_rows_gate_requests() {
    let dir = tempdir().expect("tempdir");
    let web = dir.path().join("web.sock");
    let web_addr = web.display().to_string();
    let (master, _ctrl_path, _store) = start_master(
        dir.path(),
        &[
            ("common.sock_num", "1"),
            ("sock.0.domain", "local"),
            ("sock.0.type", "stream"),
            ("sock.0.protocol", "http"),
            ("sock.0.address", &web_addr),
            ("common.auth_num", "1"),
            ("auth.0.type", "basic"),
            ("auth.0.user", "admin"),
            ("auth.0.realm", "router"),
            ("auth.0.domain", "/"),
            ("auth.0.secret", "hunter2"),
        ],
        4,
    );

    let denied = http_get(&web, "/status", None);
    assert!(denied.starts_with("HTTP/1.1 401"), "got: {}", denied);
    assert!(
        denied.contains("WWW-Authenticate: Basic realm=\"router\""),
        "got: {}",
        denied
    );

    let token = format!("Basic {}", BASE64.encode("admin:hunter2"));
    let allowed = http_get(&web, "/status", Some(&token));
    assert!(allowed.starts_with("HTTP/1.1 200 OK"), "got: {}", allowed);

    let wrong = format!("Basic {}", BASE64.encode("admin:wrong"));
    let still_denied = http_get(&web, "/status", Some(&wrong));
    assert!(still_denied.starts_with("HTTP/1.1 401"), "got: {}", still_denied);

    master.stop();
}

#[test]
fn test_reload_applies_rewritten_conf() {
    let dir = tempdir().expect("tempdir");
    let web = dir.path().join("web.sock");
    let web_addr = web.display().to_string();
    let (master, ctrl_path, store) = start_master(
        dir.path(),
        &[
            ("common.locale", "de_DE"),
            ("common.sock_num", "1"),
            ("sock.0.domain", "local"),
            ("sock.0.type", "stream"),
            ("sock.0.protocol", "http"),
            ("sock.0.address", &web_addr),
        ],
        4,
    );
    assert!(ctrl(&ctrl_path, "status").contains("listeners=2"));

    // The daemon re-reads its backing file on reload, so a rewrite followed
    // by reload() swaps the listening set and the store contents together.
    write_conf(
        &dir.path().join("nvram.conf"),
        &[("common.locale", "fr_FR"), ("common.sock_num", "0")],
    );
    master.reload().expect("reload");

    assert_eq!(store.get("common.locale").as_deref(), Some("fr_FR"));
    let status = ctrl(&ctrl_path, "status");
    assert!(status.contains("listeners=1"), "got: {}", status);
    assert!(
        UnixStream::connect(&web).is_err(),
        "dropped listener still accepting after reload"
    );

    master.stop();
}

#[test]
fn test_reload_waits_for_busy_worker() {
    let dir = tempdir().expect("tempdir");
    let (master, ctrl_path, _store) = start_master(dir.path(), &[], 4);

    // A connection that never sends holds its worker until the 1s read
    // timeout fires, so a reload issued meanwhile must sit at the drain
    // barrier for the remainder of that second.
    let silent = UnixStream::connect(&ctrl_path).expect("connect silent");
    thread::sleep(Duration::from_millis(300));
    assert_eq!(master.status().num_threads, 1);

    let begin = Instant::now();
    master.reload().expect("reload");
    let elapsed = begin.elapsed();
    assert!(
        elapsed >= Duration::from_millis(400),
        "reload returned in {:?}, before the busy worker drained",
        elapsed
    );
    assert!(elapsed < Duration::from_secs(5), "reload took {:?}", elapsed);

    // Full drain: the worker exited and nothing was queued to respawn one.
    assert_eq!(master.status().num_threads, 0);
    drop(silent);

    // The daemon keeps serving afterwards.
    assert!(ctrl(&ctrl_path, "status").starts_with("OK state=running"));
    master.stop();
}

#[test]
fn test_thread_cap_is_never_exceeded() {
    let dir = tempdir().expect("tempdir");
    let (master, ctrl_path, _store) = start_master(dir.path(), &[], 2);

    // Three silent connections against a cap of two: at most two workers
    // may exist while the third connection waits its turn in the queue.
    let c1 = UnixStream::connect(&ctrl_path).expect("connect 1");
    let c2 = UnixStream::connect(&ctrl_path).expect("connect 2");
    let c3 = UnixStream::connect(&ctrl_path).expect("connect 3");

    let mut max_threads = 0;
    for _ in 0..12 {
        let s = master.status();
        assert!(
            s.num_threads <= 2,
            "thread cap exceeded: {} workers",
            s.num_threads
        );
        max_threads = max_threads.max(s.num_threads);
        thread::sleep(Duration::from_millis(50));
    }
    assert!(max_threads >= 1, "no worker ever spawned");

    drop(c1);
    drop(c2);
    drop(c3);

    // Once the silent peers are gone the queue drains and a live round
    // trip is served again.
    thread::sleep(Duration::from_millis(300));
    assert!(ctrl(&ctrl_path, "status").starts_with("OK state=running"));
    master.stop();
}
