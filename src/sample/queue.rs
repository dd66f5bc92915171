//! FIFO mailbox between one receiver and one consumer thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::net::Endpoint;
use crate::wire::Timestamp;

/// One latency measurement, created by the receiver for each valid datagram
/// and discarded by the consumer after formatting.
#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    /// Running count of datagrams received on this port, 1-based.
    pub received_seq: u64,
    /// Sequence number the emitter stamped into the datagram.
    pub sent_seq: u32,
    /// Send timestamp extracted from the datagram header.
    pub send_time: Timestamp,
    /// Receive timestamp captured on arrival.
    pub recv_time: Timestamp,
    /// Source address of the datagram.
    pub peer: Endpoint,
}

#[derive(Debug)]
struct Inner {
    samples: VecDeque<LatencySample>,
    closed: bool,
}

/// FIFO queue of latency samples with a not-empty condition.
///
/// Exactly one producer context (the receiver's call stack) pushes; exactly
/// one consumer thread drains. `push` is nevertheless safe under concurrent
/// producers, should a future role ever share a queue.
#[derive(Debug)]
pub struct SampleQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl SampleQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Appends a sample and wakes the consumer.
    ///
    /// Samples pushed after [`close`](Self::close) are dropped; the consumer
    /// is already draining toward exit.
    pub fn push(&self, sample: LatencySample) {
        let mut inner = self.inner.lock().expect("sample queue mutex poisoned");
        if inner.closed {
            return;
        }
        inner.samples.push_back(sample);
        self.not_empty.notify_one();
    }

    /// Closes the queue: the consumer drains what remains and exits.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("sample queue mutex poisoned");
        inner.closed = true;
        self.not_empty.notify_all();
    }

    /// Blocks until samples are available, then moves the entire backlog
    /// into `out`, preserving FIFO order.
    ///
    /// Returns `false` once the queue is closed and empty; `out` is left
    /// untouched in that case. Spurious wakeups are absorbed by re-checking
    /// emptiness before proceeding.
    pub fn wait_drain(&self, out: &mut Vec<LatencySample>) -> bool {
        let mut inner = self.inner.lock().expect("sample queue mutex poisoned");
        loop {
            if !inner.samples.is_empty() {
                out.extend(inner.samples.drain(..));
                return true;
            }
            if inner.closed {
                return false;
            }
            inner = self
                .not_empty
                .wait(inner)
                .expect("sample queue mutex poisoned");
        }
    }

    /// Number of queued samples. Test and diagnostics helper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("sample queue mutex poisoned")
            .samples
            .len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn sample(seq: u32) -> LatencySample {
        LatencySample {
            received_seq: u64::from(seq),
            sent_seq: seq,
            send_time: Timestamp { sec: 1, usec: 0 },
            recv_time: Timestamp { sec: 1, usec: 500 },
            peer: Endpoint::localhost(9000),
        }
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = SampleQueue::new();
        queue.push(sample(1));
        queue.push(sample(2));
        queue.push(sample(3));

        let mut out = Vec::new();
        assert!(queue.wait_drain(&mut out));
        let seqs: Vec<u32> = out.iter().map(|s| s.sent_seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(SampleQueue::new());
        let consumer_queue = Arc::clone(&queue);

        let consumer = std::thread::spawn(move || {
            let mut out = Vec::new();
            consumer_queue.wait_drain(&mut out)
        });

        std::thread::sleep(Duration::from_millis(50));
        queue.close();
        assert!(!consumer.join().expect("join consumer"));
    }

    #[test]
    fn close_lets_backlog_drain_first() {
        let queue = SampleQueue::new();
        queue.push(sample(1));
        queue.close();

        let mut out = Vec::new();
        assert!(queue.wait_drain(&mut out));
        assert_eq!(out.len(), 1);
        assert!(!queue.wait_drain(&mut out));

        // Pushes after close are dropped.
        queue.push(sample(2));
        assert!(queue.is_empty());
    }
}
