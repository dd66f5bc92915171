//! Emit side of the benchmark.
//!
//! One [`Client`] per target endpoint: an emitter thread builds a probe
//! datagram with the current timestamp and an incrementing sequence number
//! and sends it on a fixed cadence. The cadence uses an absolute deadline
//! advanced by the interval each iteration, so per-iteration work and
//! scheduling jitter do not accumulate into drift.

use std::fs;
use std::io;
use std::net::{AddrParseError, IpAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use crate::net::{Endpoint, UdpSocket};
use crate::thread::{
    SchedulingRegistry, StopToken, ThreadConfig, ThreadError, ThreadHandle, Worker, WorkerError,
};
use crate::trace::{debug, error, info};
use crate::wire::{encode_probe, Timestamp};
use crate::DEFAULT_FIRST_PORT;

/// Default cadence: one probe per second per target.
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from client setup and lifecycle.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to create the transmit socket.
    #[error("failed to create UDP transmit socket: {0}")]
    Bind(#[source] io::Error),
    /// Thread lifecycle failure.
    #[error(transparent)]
    Thread(#[from] ThreadError),
    /// Signal mask or wait failure in the daemon glue.
    #[error("signal handling failed: {0}")]
    Signal(#[source] io::Error),
    /// Could not read the host-list file.
    #[error("failed to read host list {path}: {source}")]
    HostFile {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A record in the host-list file did not parse.
    #[error("host list {path}:{line}: {reason}")]
    HostRecord {
        /// Path of the offending file.
        path: String,
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
    /// An address on the command line did not parse.
    #[error("invalid host address: {0}")]
    Addr(#[from] AddrParseError),
    /// An emitter thread terminated with an error.
    #[error("emitter thread failed: {0}")]
    Emitter(WorkerError),
}

/// The emit loop: stamp, send, sleep until the next absolute deadline.
struct Emitter {
    socket: UdpSocket,
    dest: Endpoint,
    interval: Duration,
    source: u32,
    sent: u32,
}

impl Worker for Emitter {
    fn run(&mut self, stop: &StopToken) -> Result<(), WorkerError> {
        let mut deadline = Instant::now();
        loop {
            self.sent = self.sent.wrapping_add(1);
            let buf = encode_probe(self.source, self.sent, Timestamp::now());
            self.socket.send_to(&buf, self.dest)?;

            deadline = deadline + self.interval;
            let now = Instant::now();
            let until_deadline = if now >= deadline {
                // Behind schedule: yield the stop check and send immediately.
                Duration::ZERO
            } else {
                deadline - now
            };
            if stop.wait_for(until_deadline) {
                return Ok(());
            }
        }
    }
}

/// One benchmark emitter targeting a single host/port.
#[derive(Debug)]
pub struct Client {
    dest: Endpoint,
    handle: ThreadHandle,
}

impl Client {
    /// Creates a client emitting to `dest` every `interval`. The emitter
    /// thread is prepared but not started.
    ///
    /// # Errors
    ///
    /// [`ClientError::Bind`] if the transmit socket cannot be created.
    pub fn new(
        dest: Endpoint,
        interval: Duration,
        source: u32,
        registry: &Arc<SchedulingRegistry>,
    ) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind(Endpoint::any(0)).map_err(ClientError::Bind)?;
        let emitter = Emitter {
            socket,
            dest,
            interval,
            source,
            sent: 0,
        };
        let handle = ThreadHandle::new(emitter, ThreadConfig::standard(), registry);
        debug!(dest = %dest, interval_ms = interval.as_millis() as u64, "client prepared");
        Ok(Self { dest, handle })
    }

    /// The endpoint this client targets.
    #[must_use]
    pub fn dest(&self) -> Endpoint {
        self.dest
    }

    /// Starts the emitter thread.
    ///
    /// # Errors
    ///
    /// Propagates thread creation failures.
    pub fn start(&mut self) -> Result<(), ClientError> {
        self.handle.start()?;
        info!(dest = %self.dest, "client started");
        Ok(())
    }

    /// Stops the emitter and reports how its thread finished.
    ///
    /// The emitter wakes from its cadence sleep as soon as the stop flag is
    /// set, so this returns within at most one send.
    ///
    /// # Errors
    ///
    /// [`ClientError::Emitter`] if the emitter terminated with an error.
    pub fn stop(&mut self) -> Result<(), ClientError> {
        let status = self.handle.request_stop(true)?;
        info!(dest = %self.dest, "client stopped");
        match status {
            Some(crate::thread::ExitStatus::Completed(Err(e))) => Err(ClientError::Emitter(e)),
            _ => Ok(()),
        }
    }
}

/// Owns one [`Client`] per benchmark target.
#[derive(Debug)]
pub struct ClientList {
    clients: Vec<Client>,
    interval: Duration,
    registry: Arc<SchedulingRegistry>,
}

impl ClientList {
    /// Creates an empty list with the given emit cadence.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            clients: Vec::new(),
            interval,
            registry: Arc::new(SchedulingRegistry::new()),
        }
    }

    /// Adds one client targeting `dest`.
    ///
    /// # Errors
    ///
    /// Propagates socket creation failures.
    pub fn add_client(&mut self, dest: Endpoint) -> Result<(), ClientError> {
        let source = self.clients.len() as u32;
        let client = Client::new(dest, self.interval, source, &self.registry)?;
        self.clients.push(client);
        Ok(())
    }

    /// Adds one client per port in `first..=last`, all targeting `host`.
    ///
    /// # Errors
    ///
    /// Propagates socket creation failures.
    pub fn populate_range(
        &mut self,
        host: IpAddr,
        first: u16,
        last: u16,
    ) -> Result<(), ClientError> {
        for port in first..=last {
            self.add_client(Endpoint::new(host, port))?;
        }
        Ok(())
    }

    /// Loads targets from a host-list file: one whitespace-separated
    /// `ip [port]` record per line. Blank lines and `#` comments are
    /// skipped; records without a port auto-increment from the default
    /// first port.
    ///
    /// # Errors
    ///
    /// [`ClientError::HostFile`] / [`ClientError::HostRecord`] on read or
    /// parse failures.
    pub fn populate_from_file(&mut self, path: &Path) -> Result<(), ClientError> {
        let display = path.display().to_string();
        let contents = fs::read_to_string(path).map_err(|source| ClientError::HostFile {
            path: display.clone(),
            source,
        })?;

        let mut next_port = DEFAULT_FIRST_PORT;
        for (idx, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let host: IpAddr = fields
                .next()
                .expect("non-empty line has a first field")
                .parse()
                .map_err(|e: AddrParseError| ClientError::HostRecord {
                    path: display.clone(),
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
            let port = match fields.next() {
                Some(field) => field.parse::<u16>().map_err(|e| ClientError::HostRecord {
                    path: display.clone(),
                    line: idx + 1,
                    reason: e.to_string(),
                })?,
                None => {
                    let port = next_port;
                    next_port = next_port.wrapping_add(1);
                    port
                }
            };
            self.add_client(Endpoint::new(host, port))?;
        }
        Ok(())
    }

    /// Starts every emitter.
    ///
    /// # Errors
    ///
    /// Propagates the first startup failure.
    pub fn start_all(&mut self) -> Result<(), ClientError> {
        for client in &mut self.clients {
            client.start()?;
        }
        Ok(())
    }

    /// Stops every emitter.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure after attempting every client.
    pub fn stop_all(&mut self) -> Result<(), ClientError> {
        let mut first_err = None;
        for client in &mut self.clients {
            if let Err(e) = client.stop() {
                error!(dest = %client.dest(), error = %e, "failed to stop client");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether the list holds no clients.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of clients in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// The clients, for per-target inspection.
    #[must_use]
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn populate_range_adds_one_client_per_port() {
        let mut list = ClientList::new(DEFAULT_EMIT_INTERVAL);
        list.populate_range("127.0.0.1".parse().expect("ip"), 40000, 40003)
            .expect("populate");
        assert_eq!(list.len(), 4);
        assert_eq!(list.clients()[0].dest().port(), 40000);
        assert_eq!(list.clients()[3].dest().port(), 40003);
    }

    #[test]
    fn host_file_records_with_and_without_ports() {
        let mut file = tempfile_path("netlat-hosts");
        {
            let mut f = std::fs::File::create(&file.0).expect("create");
            writeln!(f, "# targets").expect("write");
            writeln!(f, "127.0.0.1 40100").expect("write");
            writeln!(f, "127.0.0.1").expect("write");
            writeln!(f).expect("write");
        }

        let mut list = ClientList::new(DEFAULT_EMIT_INTERVAL);
        list.populate_from_file(&file.0).expect("populate");
        assert_eq!(list.len(), 2);
        assert_eq!(list.clients()[0].dest().port(), 40100);
        assert_eq!(list.clients()[1].dest().port(), DEFAULT_FIRST_PORT);

        file.cleanup();
    }

    #[test]
    fn host_file_rejects_bad_records() {
        let mut file = tempfile_path("netlat-bad-hosts");
        {
            let mut f = std::fs::File::create(&file.0).expect("create");
            writeln!(f, "not-an-address 40100").expect("write");
        }

        let mut list = ClientList::new(DEFAULT_EMIT_INTERVAL);
        let err = list.populate_from_file(&file.0).expect_err("must fail");
        assert!(matches!(err, ClientError::HostRecord { line: 1, .. }));

        file.cleanup();
    }

    struct TempFile(std::path::PathBuf);

    impl TempFile {
        fn cleanup(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn tempfile_path(stem: &str) -> TempFile {
        let mut path = std::env::temp_dir();
        path.push(format!("{stem}-{}.txt", std::process::id()));
        TempFile(path)
    }
}
