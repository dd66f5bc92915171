//! Integration tests for the thread handle lifecycle: realtime negotiation,
//! ownership transfer, timed joins and zombie semantics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use netlat::thread::{
    ExitStatus, SchedulingRegistry, StopToken, ThreadConfig, ThreadError, ThreadHandle, Worker,
    WorkerError,
};

fn registry() -> Arc<SchedulingRegistry> {
    Arc::new(SchedulingRegistry::new())
}

/// A worker that parks on the stop token until told to exit.
struct ParkUntilStop;

impl Worker for ParkUntilStop {
    fn run(&mut self, stop: &StopToken) -> Result<(), WorkerError> {
        stop.wait_for(Duration::from_secs(60));
        Ok(())
    }
}

#[test]
fn realtime_priorities_start_or_degrade_without_crashing() {
    let registry = registry();
    let mut flag_history = vec![registry.all_started_with_requested_attributes()];

    for priority in [1u8, 50, 99] {
        let mut handle = ThreadHandle::new(
            |_stop: &StopToken| -> Result<(), WorkerError> { Ok(()) },
            ThreadConfig::realtime(priority),
            &registry,
        );
        handle.start().expect("start must succeed, degraded or not");

        // A handle that did not get its attributes must have flipped the
        // registry; one that did must not have un-flipped it.
        if !handle.started_with_requested_attributes() {
            assert!(!registry.all_started_with_requested_attributes());
        }
        flag_history.push(registry.all_started_with_requested_attributes());

        let status = handle.wait_for_exit().expect("join");
        assert!(status.is_clean());
    }

    // The flag only ever transitions true -> false, never back.
    for window in flag_history.windows(2) {
        assert!(window[0] || !window[1], "registry flag reverted: {flag_history:?}");
    }

    // A later standard-priority start must not reset the flag either.
    let before = registry.all_started_with_requested_attributes();
    let mut standard = ThreadHandle::new(
        |_stop: &StopToken| -> Result<(), WorkerError> { Ok(()) },
        ThreadConfig::standard(),
        &registry,
    );
    standard.start().expect("start standard");
    standard.wait_for_exit().expect("join standard");
    assert!(standard.started_with_requested_attributes());
    if !before {
        assert!(!registry.all_started_with_requested_attributes());
    }
}

#[test]
fn transfer_before_start_leaves_source_zombie() {
    let registry = registry();
    let mut source = ThreadHandle::new(ParkUntilStop, ThreadConfig::standard(), &registry);

    let mut dest = source.transfer().expect("transfer before start");
    assert!(source.is_zombie());
    assert!(matches!(source.is_running(), Err(ThreadError::Zombie)));

    // The destination is the sole owner and fully functional.
    dest.start().expect("start transferred handle");
    assert!(dest.is_running().expect("probe"));
    let status = dest
        .request_stop(true)
        .expect("stop")
        .expect("joined on stop");
    assert!(status.is_clean());
}

#[test]
fn transfer_after_start_fails_and_changes_nothing() {
    let registry = registry();
    let mut handle = ThreadHandle::new(ParkUntilStop, ThreadConfig::standard(), &registry);
    handle.start().expect("start");

    assert!(matches!(
        handle.transfer(),
        Err(ThreadError::MoveAfterStart)
    ));

    // The handle still owns its thread.
    assert!(handle.is_running().expect("probe"));
    let status = handle
        .request_stop(true)
        .expect("stop")
        .expect("joined on stop");
    assert!(status.is_clean());
}

#[test]
fn timed_join_times_out_then_full_join_succeeds() {
    let registry = registry();
    let mut handle = ThreadHandle::new(ParkUntilStop, ThreadConfig::standard(), &registry);
    handle.start().expect("start");

    let start = Instant::now();
    let outcome = handle
        .wait_for_exit_timeout(Duration::from_millis(50))
        .expect("timed join");
    assert!(outcome.is_none(), "worker cannot have exited yet");
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "timed join blocked past its deadline"
    );

    // The handle stayed active; a later full join still works.
    handle.request_stop(false).expect("request stop");
    let status = handle.wait_for_exit().expect("full join");
    assert!(status.is_clean());
}

#[test]
fn timed_join_completes_when_thread_exits_in_time() {
    let registry = registry();
    let mut handle = ThreadHandle::new(
        |_stop: &StopToken| -> Result<(), WorkerError> { Ok(()) },
        ThreadConfig::standard(),
        &registry,
    );
    handle.start().expect("start");

    let outcome = handle
        .wait_for_exit_timeout(Duration::from_secs(10))
        .expect("timed join");
    match outcome {
        Some(ExitStatus::Completed(Ok(()))) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(handle.is_zombie());
}

#[test]
fn zombie_rejects_every_lifecycle_operation() {
    let registry = registry();
    let mut handle = ThreadHandle::new(
        |_stop: &StopToken| -> Result<(), WorkerError> { Ok(()) },
        ThreadConfig::standard(),
        &registry,
    );
    handle.start().expect("start");
    handle.wait_for_exit().expect("join");
    assert!(handle.is_zombie());

    assert!(matches!(handle.start(), Err(ThreadError::Zombie)));
    assert!(matches!(handle.is_running(), Err(ThreadError::Zombie)));
    assert!(matches!(handle.wait_for_exit(), Err(ThreadError::Zombie)));
    assert!(matches!(
        handle.wait_for_exit_timeout(Duration::from_millis(1)),
        Err(ThreadError::Zombie)
    ));
    assert!(matches!(
        handle.request_stop(false),
        Err(ThreadError::Zombie)
    ));

    // Transferring a zombie only yields another zombie.
    let transferred = handle.transfer().expect("transfer zombie");
    assert!(transferred.is_zombie());
}

#[test]
fn natural_exit_is_observed_by_probe() {
    let registry = registry();
    let mut handle = ThreadHandle::new(
        |_stop: &StopToken| -> Result<(), WorkerError> { Ok(()) },
        ThreadConfig::standard(),
        &registry,
    );
    handle.start().expect("start");

    // Poll until the probe observes the exit; the probe reaps the thread
    // and zombifies the handle.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match handle.is_running() {
            Ok(true) => {
                assert!(Instant::now() < deadline, "worker never exited");
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(false) => break,
            Err(e) => panic!("probe failed: {e}"),
        }
    }
    assert!(handle.is_zombie());
}
