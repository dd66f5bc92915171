//! `netlat` — a UDP one-way latency benchmark.
//!
//! Clients emit periodic timestamped datagrams to a set of target ports;
//! servers receive them, compute one-way latency, and log results. Each
//! receive loop runs on its own OS thread, optionally under FIFO realtime
//! scheduling, and feeds a per-port sample queue drained by a dedicated
//! consumer thread so that formatting and printing never block reception.
//!
//! # Architecture
//!
//! - [`thread`] — [`ThreadHandle`](thread::ThreadHandle): a move-only handle
//!   owning one OS thread, with realtime-scheduling negotiation, race-free
//!   identity handoff, cooperative/forced stop and blocking/timed joins.
//! - [`sample`] — the producer/consumer telemetry pipeline.
//! - [`server`] / [`client`] — the Receiver and Emitter roles plus their
//!   orchestrating collections.
//! - [`net`] / [`wire`] — blocking UDP sockets and the fixed-size probe
//!   datagram.
//!
//! Linux-specific: the thread layer uses the pthread scheduling and join
//! extensions, and stopping a blocked receiver relies on `shutdown(2)`
//! waking a pending `recvfrom`.

pub mod client;
pub mod net;
pub mod sample;
pub mod server;
pub mod signal;
pub mod thread;
pub mod wire;

mod trace;

pub use trace::init_tracing;

/// Default first UDP port for the benchmark range.
pub const DEFAULT_FIRST_PORT: u16 = 29500;

/// Default number of ports (one receive thread per port).
pub const DEFAULT_PORT_COUNT: u16 = 6;
