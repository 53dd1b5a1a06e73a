// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded ring of accepted connections between the master and the workers.
//!
//! One mutex guards the ring; two condvars signal the "not full" and "not
//! empty" transitions. `enqueue` has no timeout: a full ring blocks the
//! accept loop, which is the backpressure mechanism (the kernel listen
//! backlog absorbs bursts). `dequeue` waits up to a bounded timeout so idle
//! workers can re-check lifecycle state.
//!
//! Head and tail are monotonically increasing counters with
//! `tail <= head <= tail + capacity`; wrap subtracts the capacity from both
//! once the tail passes it, preserving the difference.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::socket::Socket;

struct Ring {
    slots: Vec<Option<Socket>>,
    head: u64,
    tail: u64,
}

impl Ring {
    fn len(&self) -> usize {
        (self.head - self.tail) as usize
    }
}

/// Fixed-capacity FIFO of [`Socket`]s, shared between one producer (the
/// accept loop) and many consumers (workers).
pub struct SocketQueue {
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl SocketQueue {
    /// Create a queue with `capacity` slots. `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append a socket, blocking while the ring is full.
    pub fn enqueue(&self, sock: Socket) {
        let mut ring = self.ring.lock();
        let cap = ring.slots.len() as u64;
        while ring.head - ring.tail >= cap {
            self.not_full.wait(&mut ring);
        }
        let idx = (ring.head % cap) as usize;
        debug_assert!(ring.slots[idx].is_none());
        ring.slots[idx] = Some(sock);
        ring.head += 1;
        drop(ring);
        self.not_empty.notify_one();
    }

    /// Remove the oldest socket, waiting up to `timeout` while the ring is
    /// empty. Returns `None` on timeout, and also when woken without data;
    /// callers re-check their run condition and come back.
    pub fn dequeue(&self, timeout: Duration) -> Option<Socket> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.ring.lock();
        while ring.head == ring.tail {
            if Instant::now() >= deadline {
                return None;
            }
            if self.not_empty.wait_until(&mut ring, deadline).timed_out() {
                return None;
            }
            // Woken with nothing to take: a racing consumer got there
            // first, or wake_all wants waiters to look at lifecycle state.
            if ring.head == ring.tail {
                return None;
            }
        }
        let cap = ring.slots.len() as u64;
        let idx = (ring.tail % cap) as usize;
        let sock = ring.slots[idx].take();
        debug_assert!(sock.is_some());
        ring.tail += 1;
        while ring.tail >= cap {
            ring.tail -= cap;
            ring.head -= cap;
        }
        drop(ring);
        self.not_full.notify_one();
        sock
    }

    /// Wake every blocked producer and consumer so they can re-check
    /// lifecycle state (used at shutdown).
    pub fn wake_all(&self) {
        let guard = self.ring.lock();
        drop(guard);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ProtocolTag;
    use std::sync::Arc;
    use std::thread;

    fn sock(label: &str) -> Socket {
        Socket::test_new(ProtocolTag::Ctrl, label)
    }

    fn labels(q: &SocketQueue, n: usize, timeout: Duration) -> Vec<String> {
        (0..n)
            .map(|_| q.dequeue(timeout).expect("dequeue").address().to_string())
            .collect()
    }

    #[test]
    fn test_fifo_order_and_len_bounds() {
        let q = SocketQueue::new(4);
        assert!(q.is_empty());
        for i in 0..4 {
            q.enqueue(sock(&format!("s{}", i)));
            assert!(q.len() <= q.capacity());
        }
        assert_eq!(q.len(), 4);
        let got = labels(&q, 4, Duration::from_millis(100));
        assert_eq!(got, vec!["s0", "s1", "s2", "s3"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_dequeue_timeout_on_empty() {
        let q = SocketQueue::new(2);
        let start = Instant::now();
        assert!(q.dequeue(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_full_queue_blocks_enqueue_until_dequeue() {
        let q = Arc::new(SocketQueue::new(2));
        q.enqueue(sock("a"));
        q.enqueue(sock("b"));

        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || {
            let start = Instant::now();
            q2.enqueue(sock("c"));
            start.elapsed()
        });

        // Give the producer time to block on the full ring.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 2, "third enqueue must not have landed yet");

        let first = q.dequeue(Duration::from_millis(100)).expect("dequeue a");
        assert_eq!(first.address(), "a");

        let blocked_for = producer.join().expect("producer join");
        assert!(
            blocked_for >= Duration::from_millis(40),
            "enqueue should have blocked, took {:?}",
            blocked_for
        );
        assert_eq!(q.len(), 2);
    }

    // Ring-wrap scenario: capacity 2, enqueue A and B, a blocked C, then
    // drain in FIFO order across the wrap point.
    #[test]
    fn test_capacity_two_wrap_scenario() {
        let q = Arc::new(SocketQueue::new(2));
        q.enqueue(sock("A"));
        q.enqueue(sock("B"));

        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || q2.enqueue(sock("C")));
        thread::sleep(Duration::from_millis(30));

        assert_eq!(
            q.dequeue(Duration::from_millis(100)).expect("A").address(),
            "A"
        );
        producer.join().expect("producer join");
        assert_eq!(q.len(), 2);
        assert_eq!(
            q.dequeue(Duration::from_millis(100)).expect("B").address(),
            "B"
        );
        assert_eq!(
            q.dequeue(Duration::from_millis(100)).expect("C").address(),
            "C"
        );
        assert!(q.is_empty());
    }

    // K sockets through a capacity-N ring with K > N: every socket comes out
    // exactly once, in enqueue order.
    #[test]
    fn test_overcapacity_stream_is_fifo() {
        const K: usize = 50;
        let q = Arc::new(SocketQueue::new(4));

        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || {
            for i in 0..K {
                q2.enqueue(sock(&format!("m{:03}", i)));
            }
        });

        let got = labels(&q, K, Duration::from_secs(2));
        producer.join().expect("producer join");

        let want: Vec<String> = (0..K).map(|i| format!("m{:03}", i)).collect();
        assert_eq!(got, want);
        assert!(q.dequeue(Duration::from_millis(10)).is_none());
    }

    // wake_all must release a consumer parked deep in its timeout so it can
    // re-check lifecycle state instead of sleeping out the full wait.
    #[test]
    fn test_wake_all_releases_waiting_consumer() {
        let q = Arc::new(SocketQueue::new(2));
        let q2 = Arc::clone(&q);
        let consumer = thread::spawn(move || {
            let start = Instant::now();
            let got = q2.dequeue(Duration::from_secs(5));
            (got.is_none(), start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        q.wake_all();
        let (was_none, waited) = consumer.join().expect("consumer join");
        assert!(was_none, "wake without data reads as an empty timeout");
        assert!(
            waited < Duration::from_secs(1),
            "consumer should have been released early, waited {:?}",
            waited
        );
    }
}
