// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master lifecycle: listener ownership, worker dispatch, reload and stop.
//!
//! The master owns every listening socket, the bounded socket queue, the
//! auth registry and the worker pool. Its life runs Created -> Running ->
//! Stopping -> Stopped, one way. `start` binds the listeners and spawns the
//! accept thread; `reload` drains the workers to zero and reapplies
//! configuration behind the coordination lock; `stop` asks the accept
//! thread to run the finish routine and blocks until the state reads
//! Stopped.
//!
//! Lock order, everywhere: pool coordination -> listening set -> auth
//! registry or queue. At most two of these are ever held at once; reload
//! releases the listening set before it touches auth. Status snapshots read
//! atomics only, so a handler asking for status can never deadlock against
//! a reload that is waiting for that very handler to finish.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::LevelFilter;
use parking_lot::Mutex;

use crate::auth::{AuthEntry, AuthRegistry, AuthScheme};
use crate::config;
use crate::logging;
use crate::nvram::Nvram;
use crate::proto::ProtocolTag;
use crate::queue::SocketQueue;
use crate::socket::{SockDomain, SockKind, Socket, SocketError, SocketSpec};

mod accept;
pub(crate) mod pool;

use pool::WorkerPool;

// ===== Lifecycle state =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MasterState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl MasterState {
    fn from_u8(v: u8) -> MasterState {
        match v {
            0 => MasterState::Created,
            1 => MasterState::Running,
            2 => MasterState::Stopping,
            _ => MasterState::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MasterState::Created => "created",
            MasterState::Running => "running",
            MasterState::Stopping => "stopping",
            MasterState::Stopped => "stopped",
        }
    }
}

/// Deferred control request filed by a handler and consumed by the
/// supervising thread. Stop outranks reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRequest {
    Reload,
    Stop,
}

const PENDING_NONE: u8 = 0;
const PENDING_RELOAD: u8 = 1;
const PENDING_STOP: u8 = 2;

// ===== Status and control surface =====

/// Point-in-time engine counters for status reporting.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub state: MasterState,
    pub num_threads: usize,
    pub num_idle: usize,
    pub threads_max: usize,
    pub queue_len: usize,
    pub num_listeners: usize,
}

/// What protocol handlers may ask of the master. Reload and stop are
/// requests, not calls: the handler runs on a worker thread, and a worker
/// cannot wait for its own drain.
pub trait MasterControl: Send + Sync {
    fn request_reload(&self);
    fn request_stop(&self);
    fn set_thread_cap(&self, threads_max: usize);
    fn status(&self) -> StatusSnapshot;
}

// ===== Errors =====

#[derive(Debug)]
pub enum MasterError {
    /// Binding the mandatory control listener failed.
    Socket(SocketError),
    /// The accept thread could not be spawned.
    Spawn(io::Error),
    AlreadyStarted,
    NotRunning,
}

impl fmt::Display for MasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterError::Socket(e) => write!(f, "listener setup failed: {}", e),
            MasterError::Spawn(e) => write!(f, "accept thread spawn failed: {}", e),
            MasterError::AlreadyStarted => write!(f, "master was already started"),
            MasterError::NotRunning => write!(f, "master is not running"),
        }
    }
}

impl std::error::Error for MasterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MasterError::Socket(e) => Some(e),
            MasterError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SocketError> for MasterError {
    fn from(e: SocketError) -> Self {
        MasterError::Socket(e)
    }
}

// ===== Options =====

/// Tunables fixed at construction. Wait times are configurable so tests can
/// run the full lifecycle in milliseconds.
#[derive(Debug, Clone)]
pub struct MasterOptions {
    pub ctrl_path: String,
    /// SOAP nvram listener; best effort, `None` disables it.
    pub nvram_sock_path: Option<String>,
    pub threads_max: usize,
    /// Upper bound of one accept poll round.
    pub accept_wait: Duration,
    /// How long an idle worker waits for the queue before re-checking state.
    pub worker_wait: Duration,
    /// When set, `common.log_level` from nvram is ignored.
    pub log_level: Option<LevelFilter>,
}

impl Default for MasterOptions {
    fn default() -> Self {
        MasterOptions {
            ctrl_path: config::DEF_CTRL_SOCK_PATH.to_string(),
            nvram_sock_path: Some(config::DEF_NVRAM_SOCK_PATH.to_string()),
            threads_max: config::DEF_THREADS_MAX,
            accept_wait: config::MASTER_WAIT,
            worker_wait: config::WORKER_WAIT,
            log_level: None,
        }
    }
}

// ===== Shared engine state =====

pub(crate) struct MasterShared {
    state: AtomicU8,
    pending: AtomicU8,
    /// Reload wants the worker count at zero; workers leave instead of
    /// retrying while this is set.
    drain_requested: AtomicBool,
    /// Shutdown wants open connections to wind down at their next timeout.
    pub(crate) closing: AtomicBool,
    pub(crate) listeners: Mutex<Vec<Socket>>,
    listener_count: AtomicUsize,
    pub(crate) queue: SocketQueue,
    pub(crate) auth: AuthRegistry,
    pub(crate) nvram: Arc<dyn Nvram>,
    pub(crate) pool: WorkerPool,
    ctrl_path: String,
    nvram_sock_path: Option<String>,
    pub(crate) accept_wait: Duration,
    pub(crate) worker_wait: Duration,
    log_override: Option<LevelFilter>,
}

impl MasterShared {
    pub(crate) fn state(&self) -> MasterState {
        MasterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: MasterState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Worker loop condition: keep serving while the master runs and no
    /// drain is in progress.
    pub(crate) fn workers_should_run(&self) -> bool {
        self.state() == MasterState::Running && !self.drain_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn take_request(&self) -> Option<PendingRequest> {
        match self.pending.swap(PENDING_NONE, Ordering::SeqCst) {
            PENDING_RELOAD => Some(PendingRequest::Reload),
            PENDING_STOP => Some(PendingRequest::Stop),
            _ => None,
        }
    }

    pub(crate) fn set_listener_count(&self, n: usize) {
        self.listener_count.store(n, Ordering::Relaxed);
    }

    /// Spawn one worker if the queue has work, nobody idle will take it and
    /// the cap leaves room. Returns whether a worker was spawned.
    pub(crate) fn maybe_spawn(self: &Arc<Self>) -> bool {
        if self.state() != MasterState::Running || self.drain_requested.load(Ordering::SeqCst) {
            return false;
        }
        if self.queue.is_empty() {
            return false;
        }
        let Some(handle) = self.pool.try_reserve() else {
            return false;
        };
        let shared = Arc::clone(self);
        let worker = Arc::clone(&handle);
        let spawned = thread::Builder::new()
            .name(format!("rcfgd-worker-{}", handle.id))
            .spawn(move || crate::worker::run(shared, worker));
        match spawned {
            Ok(_) => true,
            Err(e) => {
                log::error!("[master] worker spawn failed: {}", e);
                self.pool.detach(handle.id);
                false
            }
        }
    }

    /// Reload parks accepted sockets in the queue while the pool is empty;
    /// kick workers for whatever is waiting.
    fn spawn_for_backlog(self: &Arc<Self>) {
        while self.maybe_spawn() {}
    }

    /// Apply `common.*` settings from nvram: log level (unless overridden
    /// on the command line), locale and rules path.
    fn apply_common_conf(&self) {
        if self.log_override.is_none() {
            if let Some(value) = self.nvram.get(config::KEY_LOG_LEVEL) {
                match logging::parse_level(&value) {
                    Some(level) => logging::apply_level(level),
                    None => log::warn!("[master] unusable log level '{}'", value),
                }
            }
        }
        let locale = self
            .nvram
            .get(config::KEY_LOCALE)
            .unwrap_or_else(|| config::DEF_LOCALE.to_string());
        let rules = self
            .nvram
            .get(config::KEY_RULES_PATH)
            .unwrap_or_else(|| config::DEF_RULES_PATH.to_string());
        log::info!("[master] locale {}, rules at {}", locale, rules);
    }

    /// Bind every configured `sock.<i>.*` listener into `ls`. Rows with
    /// missing fields, unknown protocols or failing binds are skipped with
    /// a warning; one bad row never takes the daemon down.
    fn load_socket_conf(&self, ls: &mut Vec<Socket>) -> (usize, usize) {
        let count = self
            .nvram
            .get(config::KEY_SOCK_NUM)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut added = 0;
        let mut skipped = 0;
        for i in 0..count {
            let domain = self.nvram.get(&config::sock_key(i, config::SOCK_FIELD_DOMAIN));
            let kind = self.nvram.get(&config::sock_key(i, config::SOCK_FIELD_TYPE));
            let protocol = self.nvram.get(&config::sock_key(i, config::SOCK_FIELD_PROTOCOL));
            let address = self.nvram.get(&config::sock_key(i, config::SOCK_FIELD_ADDRESS));
            let (Some(domain), Some(kind), Some(protocol), Some(address)) =
                (domain, kind, protocol, address)
            else {
                log::warn!("[master] sock.{} is incomplete, skipping", i);
                skipped += 1;
                continue;
            };

            let spec = match SocketSpec::parse(&domain, &kind, &protocol, &address) {
                Ok(spec) => spec,
                Err(e) => {
                    log::warn!("[master] sock.{}: {}, skipping", i, e);
                    skipped += 1;
                    continue;
                }
            };
            if ls.iter().any(|s| s.address() == spec.address) {
                log::debug!("[master] sock.{} address {} already bound", i, spec.address);
                skipped += 1;
                continue;
            }
            match Socket::listen(&spec) {
                Ok(sock) => {
                    log::info!("[master] listening on {}", sock);
                    ls.push(sock);
                    added += 1;
                }
                Err(e) => {
                    log::warn!("[master] sock.{} bind {}: {}, skipping", i, spec.address, e);
                    skipped += 1;
                }
            }
        }
        (added, skipped)
    }

    /// Replace the auth registry from `auth.<i>.*` rows. Invalid rows and
    /// duplicate identities are dropped quietly, matching how the registry
    /// itself treats them.
    fn load_auth_conf(&self) {
        self.auth.clear();
        let count = self
            .nvram
            .get(config::KEY_AUTH_NUM)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut skipped = 0;
        for i in 0..count {
            let scheme = self.nvram.get(&config::auth_key(i, config::AUTH_FIELD_TYPE));
            let user = self.nvram.get(&config::auth_key(i, config::AUTH_FIELD_USER));
            let realm = self.nvram.get(&config::auth_key(i, config::AUTH_FIELD_REALM));
            let domain = self.nvram.get(&config::auth_key(i, config::AUTH_FIELD_DOMAIN));
            let secret = self.nvram.get(&config::auth_key(i, config::AUTH_FIELD_SECRET));
            let (Some(scheme), Some(user), Some(realm), Some(domain), Some(secret)) =
                (scheme, user, realm, domain, secret)
            else {
                log::warn!("[master] auth.{} is incomplete, skipping", i);
                skipped += 1;
                continue;
            };
            let Some(scheme) = AuthScheme::parse(&scheme) else {
                log::warn!("[master] auth.{} has unknown scheme '{}', skipping", i, scheme);
                skipped += 1;
                continue;
            };
            if !self
                .auth
                .insert(AuthEntry::new(scheme, &user, &realm, &domain, &secret))
            {
                log::debug!("[master] auth.{} rejected (invalid or duplicate)", i);
                skipped += 1;
            }
        }
        log::info!(
            "[master] auth registry holds {} entries ({} rows skipped)",
            self.auth.len(),
            skipped
        );
    }

    fn snapshot(&self) -> StatusSnapshot {
        let counts = self.pool.counts();
        StatusSnapshot {
            state: self.state(),
            num_threads: counts.num_threads,
            num_idle: counts.num_idle,
            threads_max: counts.threads_max,
            queue_len: self.queue.len(),
            num_listeners: self.listener_count.load(Ordering::Relaxed),
        }
    }

    /// Finish routine, run on the accept thread once the state leaves
    /// Running: close listeners, clear auth, wind down connections, wait
    /// for the pool to drain, then advertise Stopped.
    pub(crate) fn finish(&self) {
        log::info!("[master] finishing: closing listeners, draining workers");
        {
            let mut ls = self.listeners.lock();
            ls.clear();
            self.set_listener_count(0);
        }
        self.auth.clear();
        self.closing.store(true, Ordering::SeqCst);
        self.queue.wake_all();
        {
            let mut pool = self.pool.lock();
            self.pool.wait_drained(&mut pool);
        }
        while let Some(sock) = self.queue.dequeue(Duration::ZERO) {
            log::debug!("[master] dropping undispatched {}", sock);
        }
        self.set_state(MasterState::Stopped);
        log::info!("[master] stopped");
    }

    #[cfg(test)]
    pub(crate) fn inject(self: &Arc<Self>, sock: Socket) {
        self.queue.enqueue(sock);
        self.maybe_spawn();
    }
}

impl MasterControl for MasterShared {
    fn request_reload(&self) {
        self.pending.fetch_max(PENDING_RELOAD, Ordering::SeqCst);
    }

    fn request_stop(&self) {
        self.pending.fetch_max(PENDING_STOP, Ordering::SeqCst);
    }

    fn set_thread_cap(&self, threads_max: usize) {
        self.pool.set_cap(threads_max);
    }

    fn status(&self) -> StatusSnapshot {
        self.snapshot()
    }
}

// ===== Master =====

/// The connection-acceptance and dispatch engine. One per process, owned
/// explicitly by whoever runs the daemon; nothing here lives in a global.
pub struct Master {
    shared: Arc<MasterShared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Master {
    pub fn new(nvram: Arc<dyn Nvram>, options: MasterOptions) -> Master {
        Master {
            shared: Arc::new(MasterShared {
                state: AtomicU8::new(MasterState::Created as u8),
                pending: AtomicU8::new(PENDING_NONE),
                drain_requested: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                listener_count: AtomicUsize::new(0),
                queue: SocketQueue::new(config::SOCK_QUEUE_LEN),
                auth: AuthRegistry::new(),
                nvram,
                pool: WorkerPool::new(options.threads_max),
                ctrl_path: options.ctrl_path,
                nvram_sock_path: options.nvram_sock_path,
                accept_wait: options.accept_wait,
                worker_wait: options.worker_wait,
                log_override: options.log_level,
            }),
            accept_thread: Mutex::new(None),
        }
    }

    /// Bind the control listener (mandatory), the SOAP nvram listener (best
    /// effort) and every configured listener, then spawn the accept thread.
    pub fn start(&self) -> Result<(), MasterError> {
        let shared = &self.shared;
        if shared.state() != MasterState::Created {
            return Err(MasterError::AlreadyStarted);
        }
        shared.apply_common_conf();

        let ctrl_spec = SocketSpec::new(
            SockDomain::Local,
            SockKind::Stream,
            ProtocolTag::Ctrl,
            &shared.ctrl_path,
        );
        let ctrl = Socket::listen(&ctrl_spec)?;
        log::info!("[master] control listener at {}", shared.ctrl_path);
        {
            let mut ls = shared.listeners.lock();
            ls.push(ctrl);
            if let Some(path) = &shared.nvram_sock_path {
                let spec = SocketSpec::new(
                    SockDomain::Local,
                    SockKind::Stream,
                    ProtocolTag::SoapHttp,
                    path,
                );
                match Socket::listen(&spec) {
                    Ok(sock) => ls.push(sock),
                    Err(e) => log::warn!("[master] nvram listener at {}: {}", path, e),
                }
            }
            let (added, skipped) = shared.load_socket_conf(&mut ls);
            log::info!(
                "[master] {} listeners up ({} configured, {} rows skipped)",
                ls.len(),
                added,
                skipped
            );
            shared.set_listener_count(ls.len());
        }
        shared.load_auth_conf();

        // The accept thread exits whenever the state is not Running, so the
        // state must flip before the spawn.
        shared.set_state(MasterState::Running);
        let thread_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("rcfgd-master".to_string())
            .spawn(move || accept::run(thread_shared));
        match spawned {
            Ok(handle) => {
                *self.accept_thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                // Roll the half-started engine back down.
                shared.set_state(MasterState::Stopping);
                shared.finish();
                Err(MasterError::Spawn(e))
            }
        }
    }

    /// Drain the pool to zero, then reapply nvram-backed configuration:
    /// common settings, configured listeners, auth registry. The control
    /// and nvram listeners stay put. In-flight connections finish
    /// naturally; nothing is torn out from under a worker.
    pub fn reload(&self) -> Result<(), MasterError> {
        let shared = &self.shared;
        if shared.state() != MasterState::Running {
            return Err(MasterError::NotRunning);
        }
        log::info!("[master] reload: draining {} workers", shared.pool.counts().num_threads);
        shared.drain_requested.store(true, Ordering::SeqCst);
        // Wake parked workers before taking any lock; they see the drain
        // flag and leave. wait_drained re-checks the count under the lock,
        // so workers that exit early are not missed.
        shared.queue.wake_all();
        {
            let mut pool = shared.pool.lock();
            let mut ls = shared.listeners.lock();
            shared.pool.wait_drained(&mut pool);

            match shared.nvram.reload() {
                Ok(n) => log::info!("[master] nvram reloaded, {} entries", n),
                Err(e) => log::warn!("[master] nvram reload: {}", e),
            }
            shared.apply_common_conf();

            let keep_ctrl = shared.ctrl_path.clone();
            let keep_nvram = shared.nvram_sock_path.clone();
            ls.retain(|s| {
                s.address() == keep_ctrl || keep_nvram.as_deref() == Some(s.address())
            });
            let (added, skipped) = shared.load_socket_conf(&mut ls);
            log::info!(
                "[master] {} listeners after reload ({} configured, {} rows skipped)",
                ls.len(),
                added,
                skipped
            );
            shared.set_listener_count(ls.len());
            drop(ls);

            shared.load_auth_conf();
            shared.drain_requested.store(false, Ordering::SeqCst);
        }
        self.shared.spawn_for_backlog();
        log::info!("[master] reload complete");
        Ok(())
    }

    /// Ask the engine to stop and block until it reads Stopped. Safe to
    /// call from any thread except a worker.
    pub fn stop(&self) {
        let shared = &self.shared;
        match shared.state() {
            MasterState::Created => {
                shared.set_state(MasterState::Stopped);
                return;
            }
            MasterState::Stopped => return,
            MasterState::Running => {
                log::info!("[master] stop requested");
                shared.set_state(MasterState::Stopping);
                shared.closing.store(true, Ordering::SeqCst);
                shared.queue.wake_all();
            }
            MasterState::Stopping => {}
        }
        while shared.state() != MasterState::Stopped {
            thread::sleep(config::STOP_POLL_INTERVAL);
        }
        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn state(&self) -> MasterState {
        self.shared.state()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.snapshot()
    }

    /// Hand out the pending reload/stop request, if any.
    pub fn take_request(&self) -> Option<PendingRequest> {
        self.shared.take_request()
    }

    /// File a stop request for the supervising thread to pick up.
    ///
    /// Safe to call from signal handlers and worker threads alike; the
    /// actual teardown happens in whoever calls [`Master::stop`].
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// File a reload request for the supervising thread to pick up.
    pub fn request_reload(&self) {
        self.shared.request_reload();
    }
}
