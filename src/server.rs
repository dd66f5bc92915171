//! Receive side of the benchmark.
//!
//! One [`Server`] per UDP port: a receive thread (optionally
//! realtime-scheduled) blocks on the socket, timestamps arrivals and pushes
//! latency samples into its [`SampleLogger`]'s queue; the logger's consumer
//! thread formats and prints them. [`ServerList`] owns one server per port
//! in a range and drives their collective lifecycle.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::net::{Endpoint, UdpSocket};
use crate::sample::{LatencySample, SampleLogger, SampleQueue, SampleSink};
use crate::thread::{
    SchedulingRegistry, StopToken, ThreadConfig, ThreadError, ThreadHandle, Worker, WorkerError,
};
use crate::trace::{debug, error, info, warn};
use crate::wire::{check_length, ProbeHeader, Timestamp, MSG_LEN};

/// Errors from server setup and lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or configure the receive socket.
    #[error("failed to bind UDP socket on port {port}: {source}")]
    Bind {
        /// Port the bind was attempted on.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Failed to shut the receive socket down while stopping.
    #[error("failed to shut down receive socket: {0}")]
    Shutdown(#[source] io::Error),
    /// Signal mask or wait failure in the daemon glue.
    #[error("signal handling failed: {0}")]
    Signal(#[source] io::Error),
    /// Thread lifecycle failure.
    #[error(transparent)]
    Thread(#[from] ThreadError),
    /// Invalid port range.
    #[error("invalid port range {first}..={last}")]
    PortRange {
        /// First port in the rejected range.
        first: u16,
        /// Last port in the rejected range.
        last: u16,
    },
    /// A receive thread terminated with an error.
    #[error("receive thread failed: {0}")]
    Receiver(WorkerError),
}

/// Configuration for one server instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    /// Realtime priority for the receive thread (0 = standard).
    pub priority: u8,
    /// Optional receive-buffer size applied at bind.
    pub recv_buffer_size: Option<usize>,
}

/// The receive loop: block, validate, timestamp, decode, push.
struct Receiver {
    socket: Arc<UdpSocket>,
    queue: Arc<SampleQueue>,
    received: u64,
}

impl Worker for Receiver {
    fn run(&mut self, stop: &StopToken) -> Result<(), WorkerError> {
        let mut buf = [0u8; MSG_LEN];
        while !stop.is_requested() {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) => {
                    // The orchestrator shuts the socket down to unblock us
                    // on stop; only then is a receive error expected.
                    if stop.is_requested() {
                        break;
                    }
                    return Err(e.into());
                }
            };
            if stop.is_requested() {
                break;
            }
            check_length(len)?;
            let recv_time = Timestamp::now();
            let header = ProbeHeader::decode(&buf)?;
            self.received += 1;
            self.queue.push(LatencySample {
                received_seq: self.received,
                sent_seq: header.seq,
                send_time: header.sent,
                recv_time,
                peer,
            });
        }
        Ok(())
    }
}

/// One benchmark leg: a bound socket, its receive thread and its logger.
#[derive(Debug)]
pub struct Server {
    port: u16,
    socket: Arc<UdpSocket>,
    logger: SampleLogger,
    receiver: ThreadHandle,
}

impl Server {
    /// Binds a server on `endpoint` and prepares (but does not start) its
    /// receive and consumer threads.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the socket cannot be bound or configured.
    pub fn bind(
        endpoint: Endpoint,
        config: ServerConfig,
        registry: &Arc<SchedulingRegistry>,
    ) -> Result<Self, ServerError> {
        Self::bind_with_sink(endpoint, config, registry, None)
    }

    /// Like [`bind`](Self::bind) with a custom sample sink. Tests use this
    /// to observe the formatted output.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the socket cannot be bound or configured.
    pub fn bind_with_sink(
        endpoint: Endpoint,
        config: ServerConfig,
        registry: &Arc<SchedulingRegistry>,
        sink: Option<Box<dyn SampleSink>>,
    ) -> Result<Self, ServerError> {
        let bind_err = |source| ServerError::Bind {
            port: endpoint.port(),
            source,
        };

        let socket = UdpSocket::bind(endpoint).map_err(bind_err)?;
        socket.set_broadcast(true).map_err(bind_err)?;
        if let Some(size) = config.recv_buffer_size {
            socket.set_recv_buffer_size(size).map_err(bind_err)?;
        }
        let socket = Arc::new(socket);
        let port = socket.local_addr().map_err(bind_err)?.port();

        let logger = match sink {
            Some(sink) => SampleLogger::with_sink(port, registry, sink),
            None => SampleLogger::new(port, registry),
        };
        let receiver = Receiver {
            socket: Arc::clone(&socket),
            queue: Arc::clone(logger.queue()),
            received: 0,
        };
        let receiver = ThreadHandle::new(
            receiver,
            ThreadConfig {
                priority: config.priority,
                ..ThreadConfig::default()
            },
            registry,
        );

        debug!(port, priority = config.priority, "server bound");
        Ok(Self {
            port,
            socket,
            logger,
            receiver,
        })
    }

    /// The port this server receives on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The bound local endpoint.
    ///
    /// # Errors
    ///
    /// Propagates the fd-level lookup failure.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        self.socket.local_addr()
    }

    /// Whether this server's receive thread got its requested scheduling
    /// attributes. Meaningful only after [`start`](Self::start).
    #[must_use]
    pub fn started_with_requested_attributes(&self) -> bool {
        self.receiver.started_with_requested_attributes()
    }

    /// Starts the consumer thread, then the receive thread.
    ///
    /// # Errors
    ///
    /// Propagates thread creation failures.
    pub fn start(&mut self) -> Result<(), ServerError> {
        self.logger.start()?;
        self.receiver.start()?;
        info!(port = self.port, "server started");
        Ok(())
    }

    /// Probes whether the receive thread is still running.
    ///
    /// # Errors
    ///
    /// Propagates [`ThreadError`] from the probe.
    pub fn is_running(&mut self) -> Result<bool, ServerError> {
        Ok(self.receiver.is_running()?)
    }

    /// Stops the receive thread and flushes the logger.
    ///
    /// The stop flag is set before the socket shutdown so that the receive
    /// loop, once unblocked, exits cleanly instead of treating the wakeup
    /// as a protocol violation.
    ///
    /// # Errors
    ///
    /// [`ServerError::Receiver`] if the receive thread terminated with an
    /// error; socket or join failures otherwise.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        self.receiver.request_stop(false)?;
        self.socket.shutdown().map_err(ServerError::Shutdown)?;
        let status = self.receiver.wait_for_exit()?;
        self.logger.stop()?;
        info!(port = self.port, "server stopped");
        match status {
            crate::thread::ExitStatus::Completed(Err(e)) => Err(ServerError::Receiver(e)),
            _ => Ok(()),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Unblock a still-parked receiver before the handle's drop joins it.
        let _ = self.receiver.request_stop(false);
        let _ = self.socket.shutdown();
    }
}

/// Owns one [`Server`] per port in a range.
#[derive(Debug)]
pub struct ServerList {
    servers: Vec<Server>,
    registry: Arc<SchedulingRegistry>,
}

impl ServerList {
    /// Binds one server for every port in `first..=last`, all at the given
    /// receive-thread priority.
    ///
    /// # Errors
    ///
    /// [`ServerError::PortRange`] for an inverted or empty range;
    /// [`ServerError::Bind`] if any port cannot be bound.
    pub fn bind_range(first: u16, last: u16, config: ServerConfig) -> Result<Self, ServerError> {
        if first == 0 || first > last {
            return Err(ServerError::PortRange { first, last });
        }
        let registry = Arc::new(SchedulingRegistry::new());
        let mut servers = Vec::with_capacity(usize::from(last - first) + 1);
        for port in first..=last {
            servers.push(Server::bind(Endpoint::any(port), config, &registry)?);
        }
        Ok(Self { servers, registry })
    }

    /// The scheduling registry shared by every server in the list.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchedulingRegistry> {
        &self.registry
    }

    /// Whether every started thread received its requested attributes.
    #[must_use]
    pub fn all_started_with_requested_attributes(&self) -> bool {
        self.registry.all_started_with_requested_attributes()
    }

    /// Starts every server, then warns once if any receive thread was
    /// degraded from its requested realtime attributes.
    ///
    /// # Errors
    ///
    /// Propagates the first startup failure.
    pub fn start_all(&mut self) -> Result<(), ServerError> {
        for server in &mut self.servers {
            server.start()?;
        }
        if !self.all_started_with_requested_attributes() {
            warn!("some receive threads were not started with the requested realtime attributes");
        }
        Ok(())
    }

    /// Stops every server that is still running.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure after attempting every server.
    pub fn stop_all(&mut self) -> Result<(), ServerError> {
        let mut first_err = None;
        for server in &mut self.servers {
            if let Err(e) = server.stop() {
                error!(port = server.port(), error = %e, "failed to stop server");
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

    /// Whether the list holds no servers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Number of servers in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// The servers, for per-port inspection.
    #[must_use]
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }
}
