// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker pool bookkeeping.
//!
//! One coordination mutex guards the worker slab and the spawn decision;
//! the `drained` condvar signals every departure so reload and shutdown can
//! wait for the count to reach zero. Thread and idle counts are mirrored in
//! atomics so status snapshots taken from worker threads never touch the
//! coordination mutex, which reload holds for the whole drain.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Identity card a worker thread carries from spawn to detach.
pub(crate) struct WorkerHandle {
    pub(crate) id: u64,
}

pub(crate) struct PoolState {
    threads_max: usize,
    num_threads: usize,
    num_idle: usize,
    next_id: u64,
    workers: Vec<Option<Arc<WorkerHandle>>>,
}

/// Counts as seen by status reporting; reads are lock-free.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolCounts {
    pub num_threads: usize,
    pub num_idle: usize,
    pub threads_max: usize,
}

pub(crate) struct WorkerPool {
    state: Mutex<PoolState>,
    drained: Condvar,
    threads: AtomicUsize,
    idle: AtomicUsize,
    cap: AtomicUsize,
}

impl WorkerPool {
    pub(crate) fn new(threads_max: usize) -> WorkerPool {
        let threads_max = threads_max.max(1);
        WorkerPool {
            state: Mutex::new(PoolState {
                threads_max,
                num_threads: 0,
                num_idle: 0,
                next_id: 1,
                workers: Vec::new(),
            }),
            drained: Condvar::new(),
            threads: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            cap: AtomicUsize::new(threads_max),
        }
    }

    /// Claim a slot for a new worker. Declines when an idle worker is
    /// already waiting for the queue or the cap is reached.
    pub(crate) fn try_reserve(&self) -> Option<Arc<WorkerHandle>> {
        let mut state = self.state.lock();
        if state.num_idle > 0 || state.num_threads >= state.threads_max {
            return None;
        }
        let handle = Arc::new(WorkerHandle { id: state.next_id });
        state.next_id += 1;
        match state.workers.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(Arc::clone(&handle)),
            None => state.workers.push(Some(Arc::clone(&handle))),
        }
        state.num_threads += 1;
        self.threads.store(state.num_threads, Ordering::Relaxed);
        Some(handle)
    }

    /// Drop a worker out of the slab and tell anyone waiting for the drain.
    pub(crate) fn detach(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(slot) = state
            .workers
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|w| w.id == id))
        {
            *slot = None;
            state.num_threads -= 1;
        } else {
            log::error!("[pool] detach of unknown worker {}", id);
        }
        self.threads.store(state.num_threads, Ordering::Relaxed);
        drop(state);
        self.drained.notify_all();
    }

    pub(crate) fn enter_idle(&self) {
        let mut state = self.state.lock();
        state.num_idle += 1;
        self.idle.store(state.num_idle, Ordering::Relaxed);
    }

    pub(crate) fn exit_idle(&self) {
        let mut state = self.state.lock();
        state.num_idle -= 1;
        self.idle.store(state.num_idle, Ordering::Relaxed);
    }

    /// Raise or lower the spawn cap. Running workers above a lowered cap
    /// finish their work and leave on their own; the pool only stops
    /// replacing them.
    pub(crate) fn set_cap(&self, threads_max: usize) {
        let threads_max = threads_max.max(1);
        let mut state = self.state.lock();
        log::info!(
            "[pool] thread cap {} -> {}",
            state.threads_max,
            threads_max
        );
        state.threads_max = threads_max;
        self.cap.store(threads_max, Ordering::Relaxed);
    }

    /// Take the coordination lock; reload holds this across its whole
    /// drain-and-reconfigure window.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }

    /// Block until every worker has detached. The caller holds the
    /// coordination lock; it is released while waiting.
    pub(crate) fn wait_drained(&self, guard: &mut MutexGuard<'_, PoolState>) {
        while guard.num_threads > 0 {
            self.drained.wait(guard);
        }
    }

    pub(crate) fn counts(&self) -> PoolCounts {
        PoolCounts {
            num_threads: self.threads.load(Ordering::Relaxed),
            num_idle: self.idle.load(Ordering::Relaxed),
            threads_max: self.cap.load(Ordering::Relaxed),
        }
    }
}
