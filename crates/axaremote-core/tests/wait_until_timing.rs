//! `wait_until` exit paths, timed against the simulated opener with scaled
//! down drive phases.

use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use axaremote_core::prelude::*;

fn fast_timings() -> DemoTimings {
    DemoTimings {
        unlock: Duration::from_millis(50),
        open: Duration::from_millis(300),
        close: Duration::from_millis(300),
        lock: Duration::from_millis(50),
    }
}

fn demo_session(timings: DemoTimings) -> (Session<DemoWindowOpener>, DemoHandle) {
    let demo = DemoWindowOpener::new(timings);
    let handle = demo.handle();
    (Session::new(demo, Duration::from_millis(500)), handle)
}

#[test]
fn test_wait_reaches_open() {
    let (mut session, _handle) = demo_session(fast_timings());
    session.open().unwrap();

    let started = Instant::now();
    let state = session
        .wait_until(
            WaitTarget::Open,
            Duration::from_millis(100),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(state, MotionState::Open);
    // Full travel is 350 ms plus at most one trailing poll interval.
    assert!(
        elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(900),
        "open took {elapsed:?}"
    );
}

#[test]
fn test_wait_times_out_with_last_state() {
    let (mut session, _handle) = demo_session(fast_timings());
    session.open().unwrap();

    let started = Instant::now();
    let result = session.wait_until(
        WaitTarget::Open,
        Duration::from_millis(50),
        Duration::from_millis(150),
        &CancelToken::new(),
    );
    let elapsed = started.elapsed();

    match result {
        Err(ProtocolError::WaitTimedOut { last }) => assert_eq!(last, MotionState::Opening),
        other => panic!("expected WaitTimedOut, got {other:?}"),
    }
    assert!(elapsed < Duration::from_millis(500), "timeout took {elapsed:?}");

    // The transport stays valid after a timed out wait.
    assert!(session.status().is_ok());
}

#[test]
fn test_wait_fails_fast_on_device_fault() {
    let (mut session, handle) = demo_session(fast_timings());
    handle.fail_after(Duration::from_millis(100));
    session.open().unwrap();

    let started = Instant::now();
    let result = session.wait_until(
        WaitTarget::Open,
        Duration::from_millis(50),
        Duration::from_secs(5),
        &CancelToken::new(),
    );

    assert!(matches!(result, Err(ProtocolError::DeviceFault)));
    // Fails on the first poll after the fault, long before the deadline.
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[test]
fn test_wait_cancels_promptly() {
    let (mut session, _handle) = demo_session(fast_timings());
    session.open().unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let started = Instant::now();
    let result = session.wait_until(
        WaitTarget::Open,
        Duration::from_millis(200),
        Duration::from_secs(5),
        &cancel,
    );
    let elapsed = started.elapsed();
    canceller.join().unwrap();

    assert!(matches!(result, Err(ProtocolError::Cancelled)));
    // The cancel interrupts mid-sleep rather than waiting out the poll.
    assert!(elapsed < Duration::from_millis(400), "cancel took {elapsed:?}");

    // Cancelling a wait leaves the session usable.
    session.stop().unwrap();
    assert_eq!(session.status().unwrap(), MotionState::Stopped);
}

#[test]
fn test_wait_reaches_closed_through_lock() {
    let (mut session, _handle) = demo_session(fast_timings());
    session.open().unwrap();
    session
        .wait_until(
            WaitTarget::Open,
            Duration::from_millis(50),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .unwrap();

    session.close().unwrap();
    let state = session
        .wait_until(
            WaitTarget::Closed,
            Duration::from_millis(50),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .unwrap();

    // The device locks after closing; both closed and locked satisfy the
    // target, and which one a poll lands on depends on timing.
    assert!(matches!(state, MotionState::Closed | MotionState::Locked));
}
