// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rcfgd - Router Configuration Daemon
//!
//! A pure Rust configuration and control daemon for embedded routers. One
//! master thread accepts connections on a set of listening sockets, a bounded
//! queue hands them to lazily spawned worker threads, and per-protocol
//! handlers serve control, HTTP, SOAP, discovery, UPnP, and kernel uevent
//! traffic against a shared nvram store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rcfgd::{Master, MasterOptions, NvramStore, PendingRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let nvram = Arc::new(NvramStore::with_file("/var/lib/rcfgd/nvram.conf"));
//!     nvram.load()?;
//!
//!     let master = Master::new(nvram, MasterOptions::default());
//!     master.start()?;
//!
//!     // Serve until a handler or signal files a stop request.
//!     loop {
//!         match master.take_request() {
//!             Some(PendingRequest::Stop) => {
//!                 master.stop();
//!                 break;
//!             }
//!             Some(PendingRequest::Reload) => {
//!                 master.reload()?;
//!             }
//!             None => std::thread::sleep(std::time::Duration::from_millis(200)),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Master Thread                              |
//! |   poll() over listening sockets -> accept -> bounded socket queue   |
//! +---------------------------------------------------------------------+
//! |                          Worker Pool                                |
//! |   lazy spawn (queue non-empty, none idle, under cap) | idle reuse   |
//! +---------------------------------------------------------------------+
//! |                        Protocol Handlers                            |
//! |   ctrl | HTTP | SOAP | discovery | UPnP SSDP/HTTP/GENA | uevent     |
//! +---------------------------------------------------------------------+
//! |                         Shared State                                |
//! |   nvram store | auth registry | status snapshots | reload barrier   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Master`] | Owns the listening set, socket queue, and worker pool |
//! | [`MasterOptions`] | Startup knobs (socket paths, thread cap, poll waits) |
//! | [`NvramStore`] | File-backed key/value store the whole daemon configures from |
//! | [`AuthRegistry`] | Access-control rows loaded from nvram, consulted by HTTP/SOAP |
//! | [`SocketQueue`] | Bounded blocking queue between the accept loop and workers |
//! | [`ProtocolTag`] | Which handler a listening socket's connections are routed to |
//!
//! ## Features
//!
//! - **Lazy workers**: threads spawn only when connections wait and nobody idles
//! - **Drain-then-reconfigure reload**: no handler runs while sockets and auth swap
//! - **Self-healing listeners**: a failed listener is re-armed once, then removed
//! - **Line-based control protocol** for scripting and the `rcfgdctl` tool
//!
//! ## Modules Overview
//!
//! - [`master`] - Daemon lifecycle, accept loop, worker pool (start here)
//! - [`proto`] - Per-protocol connection handlers
//! - [`nvram`] - Persistent key/value configuration store
//! - [`auth`] - Access-control registry
//! - [`socket`] - Listening socket setup over unix and inet domains
//! - [`queue`] - Bounded blocking socket queue
//! - [`config`] - Compile-time defaults and nvram key names

/// Access-control registry (scheme, user, realm, domain rows from nvram).
pub mod auth;
/// Compile-time defaults and the nvram key names the daemon reads.
pub mod config;
/// Console logger with runtime level switching.
pub mod logging;
/// Master lifecycle, accept loop, and worker pool.
pub mod master;
/// Persistent key/value configuration store shared by all handlers.
pub mod nvram;
/// Per-protocol connection handlers and the dispatch enum.
pub mod proto;
/// Bounded blocking queue between the accept loop and workers.
pub mod queue;
/// Listening socket setup over unix and inet domains.
pub mod socket;
/// Worker thread body (dequeue, dispatch, detach).
mod worker;

pub use auth::{AuthEntry, AuthRegistry, AuthScheme};
pub use master::{
    Master, MasterControl, MasterError, MasterOptions, MasterState, PendingRequest, StatusSnapshot,
};
pub use nvram::{Nvram, NvramError, NvramStore};
pub use proto::{HandlerContext, ProtoState, ProtocolTag};
pub use queue::SocketQueue;
pub use socket::{SockDomain, SockKind, Socket, SocketError, SocketSpec};

/// rcfgd version string.
pub const VERSION: &str = "0.4.2";
