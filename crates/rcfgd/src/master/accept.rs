// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Accept loop, run on the dedicated master thread.
//!
//! Each round snapshots the listening set into a pollfd array, waits up to
//! `accept_wait`, and accepts whatever became readable. Accepted sockets
//! are collected first and enqueued only after the listening-set lock is
//! released: enqueue blocks when the ring is full, and blocking there with
//! the listening set held would stall reload forever.
//!
//! A listener whose accept fails with a persistent error is re-armed once
//! (close, rebind from its spec); if the rebind fails too it leaves the
//! listening set.

use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::master::{MasterShared, MasterState};
use crate::socket::{Socket, SocketError};

pub(crate) fn run(shared: Arc<MasterShared>) {
    log::debug!("[master] accept loop up");
    while shared.state() == MasterState::Running {
        let mut fds: Vec<libc::pollfd> = {
            let ls = shared.listeners.lock();
            if ls.is_empty() {
                drop(ls);
                thread::sleep(shared.accept_wait.min(Duration::from_millis(200)));
                continue;
            }
            ls.iter()
                .map(|s| libc::pollfd {
                    fd: s.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                })
                .collect()
        };

        let ready = match poll_wait(&mut fds, shared.accept_wait) {
            Ok(n) => n,
            Err(e) => {
                log::error!("[master] poll failed: {}", e);
                thread::sleep(Duration::from_millis(100));
                continue;
            }
        };
        if ready == 0 {
            continue;
        }

        let mut accepted: Vec<Socket> = Vec::new();
        {
            let mut ls = shared.listeners.lock();
            for pfd in &fds {
                if pfd.revents == 0 {
                    continue;
                }
                // The set may have changed while we polled; map back by fd
                // and skip anything that is gone.
                let Some(idx) = ls.iter().position(|s| s.as_raw_fd() == pfd.fd) else {
                    continue;
                };
                if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                    log::warn!(
                        "[master] listener {} reported revents {:#x}",
                        ls[idx],
                        pfd.revents
                    );
                    rearm_or_remove(&mut ls, idx);
                    continue;
                }
                if pfd.revents & libc::POLLIN == 0 {
                    continue;
                }
                match ls[idx].accept() {
                    Ok(conn) => accepted.push(conn),
                    Err(SocketError::Io(e)) if is_transient(&e) => {
                        log::trace!("[master] transient accept miss: {}", e);
                    }
                    Err(e) => {
                        log::warn!("[master] accept on {}: {}", ls[idx], e);
                        rearm_or_remove(&mut ls, idx);
                    }
                }
            }
            shared.set_listener_count(ls.len());
        }

        for conn in accepted {
            log::debug!("[master] accepted {}", conn);
            shared.queue.enqueue(conn);
            shared.maybe_spawn();
        }
    }

    shared.finish();
    log::debug!("[master] accept loop down");
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Replace a failing listener with a fresh bind of the same spec; drop it
/// from the set if the rebind fails as well.
fn rearm_or_remove(ls: &mut Vec<Socket>, idx: usize) {
    let old = ls.swap_remove(idx);
    let spec = old.respec();
    // Close and unlink before rebinding the same address.
    drop(old);
    match Socket::listen(&spec) {
        Ok(fresh) => {
            log::info!("[master] re-armed listener {}", fresh);
            ls.push(fresh);
        }
        Err(e) => {
            log::error!(
                "[master] could not re-arm listener at {}: {}, removing it",
                spec.address,
                e
            );
        }
    }
}

fn poll_wait(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    loop {
        // SAFETY: fds is a valid, exclusively borrowed pollfd array for the
        // duration of the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}
