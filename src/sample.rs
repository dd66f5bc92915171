//! Latency sample pipeline.
//!
//! A [`SampleQueue`] decouples the receive hot path (producer) from
//! formatting and printing (consumer): the receiver pushes one
//! [`LatencySample`] per valid datagram and never waits on I/O; a dedicated
//! consumer thread drains the queue and emits formatted lines.

pub mod logger;
pub mod queue;

pub use logger::{SampleLogger, SampleSink, StdoutSink};
pub use queue::{LatencySample, SampleQueue};
