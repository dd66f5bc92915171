//! Consumer side of the sample pipeline.
//!
//! A [`SampleLogger`] runs a dedicated standard-priority thread that drains
//! its [`SampleQueue`], formats each sample and emits it through a
//! [`SampleSink`]. Formatting and I/O happen outside the queue lock, so the
//! receive hot path is never blocked by a slow terminal.

use std::sync::Arc;

use crate::thread::{
    SchedulingRegistry, StopToken, ThreadConfig, ThreadError, ThreadHandle, Worker, WorkerError,
};

use super::queue::{LatencySample, SampleQueue};

/// Width of the rolling display counters: sequence numbers are shown
/// modulo this value for compact terminal output.
const ROLLOVER: u64 = 50;

/// Destination for formatted sample lines.
pub trait SampleSink: Send + 'static {
    /// Emits one formatted line.
    fn emit(&mut self, line: &str);
}

/// Default sink: one line per sample on stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl SampleSink for StdoutSink {
    fn emit(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Formats one sample as an operator-facing line.
///
/// The line shows the peer address and port, the send and receive
/// timestamps, their difference, and rolling modulo counters for both the
/// locally received count and the emitter's sequence number.
#[must_use]
pub fn format_sample(port: u16, sample: &LatencySample) -> String {
    let latency_us = sample.recv_time.micros_since(sample.send_time);
    let sign = if latency_us < 0 { "-" } else { "" };
    let magnitude = latency_us.unsigned_abs();
    format!(
        "{}::({}): Sent: {:02}.{:06}  Rcvd: {:02}.{:06}  Lat: {}{:02}.{:06}  Nrcvd: {:3}, NSent: {:3}",
        sample.peer.ip(),
        port,
        sample.send_time.sec,
        sample.send_time.usec,
        sample.recv_time.sec,
        sample.recv_time.usec,
        sign,
        magnitude / 1_000_000,
        magnitude % 1_000_000,
        rolling(sample.received_seq),
        rolling(u64::from(sample.sent_seq)),
    )
}

fn rolling(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    ((n - 1) % ROLLOVER) + 1
}

struct Drainer {
    queue: Arc<SampleQueue>,
    sink: Box<dyn SampleSink>,
    port: u16,
    batch: Vec<LatencySample>,
}

impl Worker for Drainer {
    fn run(&mut self, _stop: &StopToken) -> Result<(), WorkerError> {
        // Closing the queue is the logger's stop protocol; the handle's stop
        // flag alone cannot wake a consumer parked on the condition.
        while self.queue.wait_drain(&mut self.batch) {
            for sample in self.batch.drain(..) {
                let line = format_sample(self.port, &sample);
                self.sink.emit(&line);
            }
        }
        Ok(())
    }
}

/// Owns the consumer thread and the queue it drains.
///
/// Created alongside its producing receiver; lives as long as the pair.
#[derive(Debug)]
pub struct SampleLogger {
    queue: Arc<SampleQueue>,
    handle: ThreadHandle,
}

impl SampleLogger {
    /// Creates a logger printing to stdout.
    #[must_use]
    pub fn new(port: u16, registry: &Arc<SchedulingRegistry>) -> Self {
        Self::with_sink(port, registry, Box::new(StdoutSink))
    }

    /// Creates a logger emitting into the given sink. Used by tests to
    /// observe output.
    #[must_use]
    pub fn with_sink(
        port: u16,
        registry: &Arc<SchedulingRegistry>,
        sink: Box<dyn SampleSink>,
    ) -> Self {
        let queue = Arc::new(SampleQueue::new());
        let drainer = Drainer {
            queue: Arc::clone(&queue),
            sink,
            port,
            batch: Vec::new(),
        };
        // The consumer runs at standard scheduling; only receive threads
        // compete for realtime slots.
        let handle = ThreadHandle::new(drainer, ThreadConfig::standard(), registry);
        Self { queue, handle }
    }

    /// Producer handle for the owning receiver.
    #[must_use]
    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    /// Starts the consumer thread.
    ///
    /// # Errors
    ///
    /// Propagates [`ThreadError`] from thread creation.
    pub fn start(&mut self) -> Result<(), ThreadError> {
        self.handle.start()
    }

    /// Closes the queue and joins the consumer after it drains the backlog.
    ///
    /// # Errors
    ///
    /// Propagates [`ThreadError`] from the join.
    pub fn stop(&mut self) -> Result<(), ThreadError> {
        self.queue.close();
        self.handle.request_stop(true)?;
        Ok(())
    }
}

impl Drop for SampleLogger {
    fn drop(&mut self) {
        // Unblock the consumer before the handle's drop joins it.
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Endpoint;
    use crate::wire::Timestamp;
    use std::sync::Mutex;

    /// Sink that collects lines for assertions.
    struct VecSink(Arc<Mutex<Vec<String>>>);

    impl SampleSink for VecSink {
        fn emit(&mut self, line: &str) {
            self.0.lock().expect("sink lock").push(line.to_owned());
        }
    }

    fn sample(received_seq: u64, sent_seq: u32) -> LatencySample {
        LatencySample {
            received_seq,
            sent_seq,
            send_time: Timestamp {
                sec: 100,
                usec: 250_000,
            },
            recv_time: Timestamp {
                sec: 100,
                usec: 251_500,
            },
            peer: Endpoint::localhost(40000),
        }
    }

    #[test]
    fn line_contains_latency_and_counters() {
        let line = format_sample(29500, &sample(1, 1));
        assert!(line.starts_with("127.0.0.1::(29500):"), "line: {line}");
        assert!(line.contains("Lat: 00.001500"), "line: {line}");
        assert!(line.contains("Nrcvd:   1, NSent:   1"), "line: {line}");
    }

    #[test]
    fn negative_latency_is_signed() {
        let mut s = sample(1, 1);
        std::mem::swap(&mut s.send_time, &mut s.recv_time);
        let line = format_sample(29500, &s);
        assert!(line.contains("Lat: -00.001500"), "line: {line}");
    }

    #[test]
    fn counters_roll_over_at_fifty() {
        assert_eq!(rolling(1), 1);
        assert_eq!(rolling(50), 50);
        assert_eq!(rolling(51), 1);
        assert_eq!(rolling(100), 50);
    }

    #[test]
    fn consumer_emits_in_push_order() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(SchedulingRegistry::new());
        let mut logger =
            SampleLogger::with_sink(29500, &registry, Box::new(VecSink(Arc::clone(&lines))));

        logger.start().expect("start logger");
        for seq in 1..=3u32 {
            logger.queue().push(sample(u64::from(seq), seq));
        }
        logger.stop().expect("stop logger");

        let lines = lines.lock().expect("sink lock");
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            let want = format!("NSent: {:3}", i + 1);
            assert!(line.contains(&want), "line {i}: {line}");
        }
    }
}
