//! A move-only handle owning one OS thread.
//!
//! `std::thread` cannot express what the benchmark needs from its receive
//! threads: a FIFO realtime scheduling class with an explicit (non-inherited)
//! priority, a configurable stack size, timed joins, and opt-in forced
//! cancellation. This module goes to the pthread layer directly and wraps it
//! in a handle with a strict lifecycle:
//!
//! ```text
//! Unstarted -> Active -> Zombie (via transfer-out or a completed join)
//! ```
//!
//! A zombie handle has given up its OS thread identity; every operation on
//! it except destruction fails with [`ThreadError::Zombie`].
//!
//! Realtime requests degrade rather than fail: a handle that cannot get its
//! FIFO attributes (usually for lack of privilege) is started as a standard
//! thread and the shared [`SchedulingRegistry`] records the degradation so
//! the orchestrator can warn the operator once.

use std::io;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use super::registry::{SchedulingRegistry, StartHandoff};

/// Default stack size for benchmark threads. The platform default of 8 MiB
/// is a lot to hand out per port on a small-RAM target.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Highest FIFO realtime priority accepted by the scheduler.
pub const MAX_RT_PRIORITY: u8 = 99;

/// Error type workers may return; boxed so the thread layer stays
/// independent of the role that runs on it.
pub type WorkerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle errors for [`ThreadHandle`].
#[derive(Debug, Error)]
pub enum ThreadError {
    /// Operation on a handle whose thread identity was transferred away or
    /// already joined.
    #[error("operation on zombie thread handle")]
    Zombie,
    /// Ownership transfer attempted while the thread is running.
    #[error("attempt to transfer a thread handle after start")]
    MoveAfterStart,
    /// `start()` called twice.
    #[error("thread handle already started")]
    AlreadyStarted,
    /// Join attempted before `start()`.
    #[error("thread handle not started")]
    NotStarted,
    /// The OS refused to create a thread at all.
    #[error("failed to create thread: {0}")]
    Spawn(#[source] io::Error),
    /// The OS rejected a join on a live thread identity.
    #[error("failed to join thread: {0}")]
    Join(#[source] io::Error),
}

/// How a joined thread finished.
#[derive(Debug)]
pub enum ExitStatus {
    /// The work function ran to completion and returned this result.
    Completed(Result<(), WorkerError>),
    /// The thread was cancelled (forced kill) before the work function
    /// could report a result.
    Killed,
}

impl ExitStatus {
    /// True for a clean `Ok(())` completion.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, ExitStatus::Completed(Ok(())))
    }
}

/// Cooperative stop signal shared between a handle and its work function.
///
/// The flag is the polite request; `wait_for` lets a worker sleep on a
/// schedule and still wake immediately when stop is requested.
#[derive(Debug)]
pub struct StopToken {
    requested: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl StopToken {
    fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Sets the stop flag and wakes any timed waiter.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        let _guard = self.lock.lock().expect("stop token lock poisoned");
        self.cv.notify_all();
    }

    /// Whether stop has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Sleeps up to `timeout`, returning early if stop is requested.
    ///
    /// Returns `true` if stop was requested, `false` if the timeout elapsed.
    /// Spurious condvar wakeups are absorbed by re-checking the deadline.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().expect("stop token lock poisoned");
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return self.is_requested();
            }
            let (g, _timeout_result) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .expect("stop token lock poisoned");
            guard = g;
        }
    }
}

/// A unit of work to be run on a [`ThreadHandle`]'s thread.
///
/// Implementations run to completion or until `stop` is requested. A worker
/// that blocks in a system call must be unblocked externally (e.g. by a
/// socket shutdown) for a cooperative stop to make progress.
pub trait Worker: Send + 'static {
    /// Runs the work function. Errors are surfaced through
    /// [`ExitStatus::Completed`] at join time.
    fn run(&mut self, stop: &StopToken) -> Result<(), WorkerError>;
}

impl<F> Worker for F
where
    F: FnMut(&StopToken) -> Result<(), WorkerError> + Send + 'static,
{
    fn run(&mut self, stop: &StopToken) -> Result<(), WorkerError> {
        self(stop)
    }
}

/// Configuration for a [`ThreadHandle`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    /// 0 requests a standard thread; 1–99 request FIFO realtime scheduling
    /// at that priority (higher is more urgent).
    pub priority: u8,
    /// Stack size for the created thread.
    pub stack_size: usize,
    /// Escalate `request_stop` to an OS-level cancellation. Only safe if the
    /// work function acquires every resource through scope-bound guards, so
    /// abrupt unwinding still releases them. This is a contract on the
    /// embedder, not enforced here.
    pub force_kill_on_stop: bool,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            priority: 0,
            stack_size: DEFAULT_STACK_SIZE,
            force_kill_on_stop: false,
        }
    }
}

impl ThreadConfig {
    /// Standard-scheduling config at the default stack size.
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
    }

    /// Config requesting FIFO realtime scheduling at `priority`.
    #[must_use]
    pub fn realtime(priority: u8) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

// The owner cell: the stable state a spawned thread resolves instead of a
// pointer to its (movable) handle. Handles share it by Arc, so transferring
// a handle never invalidates what the thread sees.
#[derive(Debug)]
struct HandleShared {
    stop: StopToken,
    result: Mutex<Option<Result<(), WorkerError>>>,
}

enum HandleState {
    Unstarted(Box<dyn Worker>),
    Active(libc::pthread_t),
    Zombie,
}

impl std::fmt::Debug for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleState::Unstarted(_) => f.write_str("Unstarted"),
            HandleState::Active(_) => f.write_str("Active"),
            HandleState::Zombie => f.write_str("Zombie"),
        }
    }
}

// What the spawned thread receives. Box ownership passes through
// pthread_create's argument pointer.
struct Payload {
    worker: Box<dyn Worker>,
    shared: Arc<HandleShared>,
    handoff: Arc<StartHandoff>,
}

extern "C" fn worker_trampoline(arg: *mut libc::c_void) -> *mut libc::c_void {
    // SAFETY: `arg` is the Box<Payload> leaked by start(); it is handed to
    // exactly one thread, exactly once.
    let payload = unsafe { Box::from_raw(arg.cast::<Payload>()) };
    let Payload {
        mut worker,
        shared,
        handoff,
    } = *payload;

    // Owner state captured; release the starting handle (and with it the
    // process-wide creation lock).
    handoff.confirm();

    let result = match catch_unwind(AssertUnwindSafe(|| worker.run(&shared.stop))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_owned());
            Err(WorkerError::from(msg))
        }
    };
    *shared.result.lock().expect("exit result slot poisoned") = Some(result);

    ptr::null_mut()
}

/// Owns exactly one OS thread's lifecycle.
///
/// Construction records configuration without creating a thread; `start()`
/// negotiates scheduling attributes and spawns; `request_stop` /
/// `wait_for_exit` terminate and reap it. Dropping a non-zombie handle
/// requests stop and joins, so no OS thread outlives its handle.
#[derive(Debug)]
pub struct ThreadHandle {
    config: ThreadConfig,
    registry: Arc<SchedulingRegistry>,
    shared: Arc<HandleShared>,
    state: HandleState,
    started_with_requested_attributes: bool,
}

impl ThreadHandle {
    /// Creates a handle that will run `worker`. No thread is created yet.
    pub fn new<W: Worker>(
        worker: W,
        config: ThreadConfig,
        registry: &Arc<SchedulingRegistry>,
    ) -> Self {
        Self {
            config,
            registry: Arc::clone(registry),
            shared: Arc::new(HandleShared {
                stop: StopToken::new(),
                result: Mutex::new(None),
            }),
            state: HandleState::Unstarted(Box::new(worker)),
            started_with_requested_attributes: false,
        }
    }

    /// The handle's configuration.
    #[must_use]
    pub fn config(&self) -> ThreadConfig {
        self.config
    }

    /// Whether this handle's thread was started with the attributes it
    /// requested. Meaningful only after `start()`.
    #[must_use]
    pub fn started_with_requested_attributes(&self) -> bool {
        self.started_with_requested_attributes
    }

    /// True until `start()` succeeds or the contents are transferred away.
    #[must_use]
    pub fn is_unstarted(&self) -> bool {
        matches!(self.state, HandleState::Unstarted(_))
    }

    /// True once the thread identity has been given up (transferred away or
    /// joined). A zombie is inert except for destruction.
    #[must_use]
    pub fn is_zombie(&self) -> bool {
        matches!(self.state, HandleState::Zombie)
    }

    /// Starts the OS thread.
    ///
    /// With `priority > 0` this attempts a FIFO realtime thread at that
    /// priority with an explicit scheduling policy and the configured stack
    /// size; if any of that fails (insufficient privilege, unsupported
    /// platform) it falls back to a standard thread and records the
    /// degradation in the registry. With `priority == 0` a standard thread
    /// is created directly.
    ///
    /// The registry's creation lock is held from before `pthread_create`
    /// until the spawned thread confirms it has captured its owner state,
    /// so thread creation is serialized process-wide and no transfer can
    /// race with the handoff.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Spawn`] if the OS cannot create a thread at all;
    /// [`ThreadError::AlreadyStarted`] / [`ThreadError::Zombie`] on misuse.
    pub fn start(&mut self) -> Result<(), ThreadError> {
        let worker = match mem::replace(&mut self.state, HandleState::Zombie) {
            HandleState::Unstarted(worker) => worker,
            active @ HandleState::Active(_) => {
                self.state = active;
                return Err(ThreadError::AlreadyStarted);
            }
            HandleState::Zombie => return Err(ThreadError::Zombie),
        };

        let handoff = Arc::new(StartHandoff::new());
        let payload = Box::new(Payload {
            worker,
            shared: Arc::clone(&self.shared),
            handoff: Arc::clone(&handoff),
        });
        let raw = Box::into_raw(payload);

        let creation_guard = self.registry.lock_creation();

        let mut realtime_ok = false;
        let mut tid: libc::pthread_t = 0;

        if self.config.priority > 0 {
            // SAFETY: `raw` is a valid leaked Payload; on failure the thread
            // was never created and ownership stays with us.
            match unsafe { spawn_thread(raw, self.config.stack_size, Some(self.config.priority)) }
            {
                Ok(t) => {
                    tid = t;
                    realtime_ok = true;
                }
                Err(_) => {
                    self.registry.record_degraded();
                }
            }
        }

        if !realtime_ok {
            // SAFETY: as above; the realtime attempt (if any) failed without
            // consuming the payload.
            match unsafe { spawn_thread(raw, self.config.stack_size, None) } {
                Ok(t) => tid = t,
                Err(e) => {
                    // SAFETY: no thread was created; reclaim the payload.
                    let payload = unsafe { Box::from_raw(raw) };
                    self.state = HandleState::Unstarted(payload.worker);
                    drop(creation_guard);
                    return Err(ThreadError::Spawn(e));
                }
            }
        }

        self.started_with_requested_attributes = realtime_ok || self.config.priority == 0;

        // Hold the creation lock until the spawned thread has resolved its
        // owner state.
        handoff.wait();
        drop(creation_guard);

        self.state = HandleState::Active(tid);
        Ok(())
    }

    /// Requests the thread to stop.
    ///
    /// The stop flag is set unconditionally (a worker not yet started will
    /// observe it immediately on start). Under `force_kill_on_stop` the
    /// thread is additionally cancelled at the OS level. With
    /// `wait_for_exit` the call blocks until the thread terminates and
    /// returns its exit status.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Zombie`] on a zombie handle.
    pub fn request_stop(&mut self, wait_for_exit: bool) -> Result<Option<ExitStatus>, ThreadError> {
        match self.state {
            HandleState::Zombie => Err(ThreadError::Zombie),
            HandleState::Unstarted(_) => {
                self.shared.stop.request();
                Ok(None)
            }
            HandleState::Active(tid) => {
                self.shared.stop.request();
                if self.config.force_kill_on_stop {
                    // SAFETY: tid refers to a thread this handle owns and
                    // has not yet joined.
                    unsafe {
                        libc::pthread_cancel(tid);
                    }
                }
                if wait_for_exit {
                    self.wait_for_exit().map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Blocks until the thread terminates, then clears the identity.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Zombie`] / [`ThreadError::NotStarted`] on misuse;
    /// [`ThreadError::Join`] if the OS rejects the join.
    pub fn wait_for_exit(&mut self) -> Result<ExitStatus, ThreadError> {
        let tid = self.active_tid()?;
        let mut thread_ret: *mut libc::c_void = ptr::null_mut();
        // SAFETY: tid is a live, not-yet-joined thread owned by this handle.
        let rc = unsafe { libc::pthread_join(tid, &mut thread_ret) };
        if rc != 0 {
            return Err(ThreadError::Join(io::Error::from_raw_os_error(rc)));
        }
        self.state = HandleState::Zombie;
        Ok(self.take_exit_status())
    }

    /// Like [`wait_for_exit`](Self::wait_for_exit) but gives up after
    /// `timeout`, returning `Ok(None)`. On timeout the handle remains
    /// active and may be waited on again later.
    ///
    /// # Errors
    ///
    /// Same as [`wait_for_exit`](Self::wait_for_exit).
    pub fn wait_for_exit_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ExitStatus>, ThreadError> {
        let tid = self.active_tid()?;
        let deadline = absolute_deadline(timeout);
        let mut thread_ret: *mut libc::c_void = ptr::null_mut();
        // SAFETY: tid is a live, not-yet-joined thread owned by this handle.
        let rc = unsafe { libc::pthread_timedjoin_np(tid, &mut thread_ret, &deadline) };
        match rc {
            0 => {
                self.state = HandleState::Zombie;
                Ok(Some(self.take_exit_status()))
            }
            libc::ETIMEDOUT => Ok(None),
            rc => Err(ThreadError::Join(io::Error::from_raw_os_error(rc))),
        }
    }

    /// Probes whether the thread is still running.
    ///
    /// Natural thread exit is not observable without a join, so an active
    /// handle is probed with a non-blocking join attempt. If that probe
    /// finds the thread already terminated it also reaps it: the handle
    /// transitions to zombie and the exit status is discarded.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Zombie`] on a zombie handle; [`ThreadError::Join`] if
    /// the OS rejects the probe.
    pub fn is_running(&mut self) -> Result<bool, ThreadError> {
        let tid = match self.state {
            HandleState::Zombie => return Err(ThreadError::Zombie),
            HandleState::Unstarted(_) => return Ok(false),
            HandleState::Active(tid) => tid,
        };
        let mut thread_ret: *mut libc::c_void = ptr::null_mut();
        // SAFETY: tid is a live, not-yet-joined thread owned by this handle.
        let rc = unsafe { libc::pthread_tryjoin_np(tid, &mut thread_ret) };
        match rc {
            0 => {
                // The probe reaped the thread; the identity is gone.
                self.state = HandleState::Zombie;
                Ok(false)
            }
            libc::EBUSY => Ok(true),
            rc => Err(ThreadError::Join(io::Error::from_raw_os_error(rc))),
        }
    }

    /// Transfers ownership of this handle's contents into a new handle.
    ///
    /// Allowed only before `start()` (the source becomes a zombie) or on a
    /// handle that is already a zombie (the result is another zombie).
    /// Transferring a running handle fails with
    /// [`ThreadError::MoveAfterStart`] and leaves both handles unchanged:
    /// the spawned thread resolved its owner state at startup, and that
    /// state must not change identity underneath it.
    ///
    /// # Errors
    ///
    /// [`ThreadError::MoveAfterStart`] while the thread is active.
    pub fn transfer(&mut self) -> Result<ThreadHandle, ThreadError> {
        match self.state {
            HandleState::Active(_) => Err(ThreadError::MoveAfterStart),
            HandleState::Zombie => Ok(ThreadHandle {
                config: self.config,
                registry: Arc::clone(&self.registry),
                shared: Arc::clone(&self.shared),
                state: HandleState::Zombie,
                started_with_requested_attributes: self.started_with_requested_attributes,
            }),
            HandleState::Unstarted(_) => {
                let worker = match mem::replace(&mut self.state, HandleState::Zombie) {
                    HandleState::Unstarted(worker) => worker,
                    _ => unreachable!("state checked above"),
                };
                Ok(ThreadHandle {
                    config: self.config,
                    registry: Arc::clone(&self.registry),
                    shared: Arc::clone(&self.shared),
                    state: HandleState::Unstarted(worker),
                    started_with_requested_attributes: false,
                })
            }
        }
    }
}

impl Drop for ThreadHandle {
    /// Requests stop (respecting `force_kill_on_stop`) and joins, so the OS
    /// thread never outlives its handle. A worker blocked in a system call
    /// must have been unblocked (e.g. socket shutdown) before the handle is
    /// dropped, or the join will wait for it.
    fn drop(&mut self) {
        if let HandleState::Active(tid) = self.state {
            self.shared.stop.request();
            if self.config.force_kill_on_stop {
                // SAFETY: tid is owned by this handle and not yet joined.
                unsafe {
                    libc::pthread_cancel(tid);
                }
            }
            let mut thread_ret: *mut libc::c_void = ptr::null_mut();
            // SAFETY: as above; join errors are unreportable in drop.
            unsafe {
                libc::pthread_join(tid, &mut thread_ret);
            }
            self.state = HandleState::Zombie;
        }
    }
}

impl ThreadHandle {
    fn active_tid(&self) -> Result<libc::pthread_t, ThreadError> {
        match self.state {
            HandleState::Active(tid) => Ok(tid),
            HandleState::Unstarted(_) => Err(ThreadError::NotStarted),
            HandleState::Zombie => Err(ThreadError::Zombie),
        }
    }

    fn take_exit_status(&self) -> ExitStatus {
        match self
            .shared
            .result
            .lock()
            .expect("exit result slot poisoned")
            .take()
        {
            Some(result) => ExitStatus::Completed(result),
            // The work function never reported: the thread was cancelled.
            None => ExitStatus::Killed,
        }
    }
}

/// Creates the OS thread. `realtime` carries the FIFO priority, or `None`
/// for a standard thread.
///
/// # Safety
///
/// `raw` must be a valid leaked `Box<Payload>`; on success its ownership
/// passes to the spawned thread, on failure it stays with the caller.
unsafe fn spawn_thread(
    raw: *mut Payload,
    stack_size: usize,
    realtime: Option<u8>,
) -> io::Result<libc::pthread_t> {
    let mut attr: libc::pthread_attr_t = mem::zeroed();
    cvt(libc::pthread_attr_init(&mut attr))?;

    if let Err(e) = configure_attr(&mut attr, stack_size, realtime) {
        libc::pthread_attr_destroy(&mut attr);
        return Err(e);
    }

    let mut tid: libc::pthread_t = 0;
    let rc = libc::pthread_create(
        &mut tid,
        &attr,
        worker_trampoline,
        raw.cast::<libc::c_void>(),
    );
    libc::pthread_attr_destroy(&mut attr);
    cvt(rc)?;
    Ok(tid)
}

/// # Safety
///
/// `attr` must be an initialized pthread attribute object.
unsafe fn configure_attr(
    attr: &mut libc::pthread_attr_t,
    stack_size: usize,
    realtime: Option<u8>,
) -> io::Result<()> {
    cvt(libc::pthread_attr_setstacksize(attr, stack_size))?;

    if let Some(priority) = realtime {
        cvt(libc::pthread_attr_setschedpolicy(attr, libc::SCHED_FIFO))?;
        let param = libc::sched_param {
            sched_priority: libc::c_int::from(priority),
        };
        cvt(libc::pthread_attr_setschedparam(attr, &param))?;
        // Without this the created thread inherits the caller's policy and
        // the attributes above are ignored.
        cvt(libc::pthread_attr_setinheritsched(
            attr,
            libc::PTHREAD_EXPLICIT_SCHED,
        ))?;
    }
    Ok(())
}

fn cvt(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        // pthread functions return the error number directly.
        Err(io::Error::from_raw_os_error(rc))
    }
}

fn absolute_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: plain syscall writing into a local.
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec += 1;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}
