//! Thread lifecycle management.
//!
//! [`ThreadHandle`] owns exactly one OS thread: creation with a requested
//! scheduling class, priority and stack size; cooperative or forced stop;
//! blocking or timed join. [`SchedulingRegistry`] records, process-wide,
//! whether every handle that asked for realtime attributes actually got
//! them, and serializes thread creation so that ownership handoff to the
//! spawned thread is race-free.
//!
//! Pure infrastructure; the benchmark roles plug in through the
//! [`Worker`] trait.

pub mod handle;
pub mod registry;

pub use handle::{
    ExitStatus, StopToken, ThreadConfig, ThreadError, ThreadHandle, Worker, WorkerError,
    DEFAULT_STACK_SIZE, MAX_RT_PRIORITY,
};
pub use registry::SchedulingRegistry;
