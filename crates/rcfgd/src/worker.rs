// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker thread body.
//!
//! One OS thread per worker, spawned lazily when the queue has work nobody
//! idle will take. The loop is: wait on the queue, tag the socket, allocate
//! protocol state, run the handler, close the connection, repeat. A dequeue
//! timeout is not an exit: the worker re-checks the master state and goes
//! back to waiting. Workers leave when the master stops or a reload drain
//! asks the pool to empty, and deregister themselves on the way out.

use std::sync::Arc;
use std::time::Instant;

use crate::master::pool::WorkerHandle;
use crate::master::MasterShared;
use crate::proto::{HandlerContext, ProtoState};

pub(crate) fn run(shared: Arc<MasterShared>, handle: Arc<WorkerHandle>) {
    log::debug!("[worker {}] up", handle.id);
    let mut conns: u64 = 0;
    let mut bytes: u64 = 0;

    while shared.workers_should_run() {
        shared.pool.enter_idle();
        let sock = shared.queue.dequeue(shared.worker_wait);
        shared.pool.exit_idle();
        let Some(mut sock) = sock else {
            // Timed out or woken for a state change; the loop condition
            // decides whether to wait again.
            continue;
        };

        let tag = sock.tag();
        let ctx = HandlerContext {
            nvram: shared.nvram.as_ref(),
            auth: &shared.auth,
            control: shared.as_ref(),
            closing: &shared.closing,
        };
        let Some(mut state) = ProtoState::new(tag, &ctx) else {
            // No handler claims this tag; close the socket and move on.
            log::warn!(
                "[worker {}] no handler for {} socket {}, dropping",
                handle.id,
                tag.as_str(),
                sock
            );
            continue;
        };
        state.reset_attributes();

        let started = Instant::now();
        conns += 1;
        match state.process_new_connection(&mut sock, &ctx) {
            Ok(n) => {
                bytes += n;
                log::trace!(
                    "[worker {}] {} connection done, {} bytes out in {:?}",
                    handle.id,
                    tag.as_str(),
                    n,
                    started.elapsed()
                );
            }
            Err(e) => {
                log::debug!(
                    "[worker {}] {} connection failed: {}",
                    handle.id,
                    tag.as_str(),
                    e
                );
            }
        }
        // The connection closes when `sock` drops here.
    }

    shared.pool.detach(handle.id);
    log::debug!(
        "[worker {}] down after {} connections, {} bytes",
        handle.id,
        conns,
        bytes
    );
}
