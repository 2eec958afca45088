//! Estimated travel position
//!
//! The device reports lock-state transitions but no absolute position, so
//! position is estimated from how long the opener has been moving through
//! its phases. The spindle drive unlocks in about 5 s, runs a full open or
//! close in about 42 s, and locks in about 16 s.

use std::time::{Duration, Instant};

use crate::protocol::{LockState, MotionState};

/// Time to unlock before the spindle starts travelling.
pub const UNLOCK_TIME: Duration = Duration::from_secs(5);
/// Full open travel time.
pub const OPEN_TIME: Duration = Duration::from_secs(42);
/// Full close travel time.
pub const CLOSE_TIME: Duration = Duration::from_secs(42);
/// Time to lock after the window has reached closed.
pub const LOCK_TIME: Duration = Duration::from_secs(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TravelPhase {
    /// Not moving; position is wherever it last was.
    Resting,
    Unlocking,
    Opening,
    Closing,
    Locking,
}

/// Time-based position estimator, 0.0 fully closed to 100.0 fully open.
///
/// Also carries the presumed motion state, which is what [`state`] reports
/// while the device's own replies only describe the lock
/// ([`reconcile`]).
///
/// [`state`]: TravelModel::state
/// [`reconcile`]: TravelModel::reconcile
#[derive(Debug)]
pub struct TravelModel {
    phase: TravelPhase,
    /// Presumed state while resting.
    resting: MotionState,
    /// Position at the start of the current phase.
    origin: f32,
    position: f32,
    since: Instant,
    unlock_time: Duration,
    open_time: Duration,
    close_time: Duration,
    lock_time: Duration,
}

impl Default for TravelModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TravelModel {
    /// Model resting at fully closed, with the standard phase durations.
    pub fn new() -> Self {
        Self::with_timings(UNLOCK_TIME, OPEN_TIME, CLOSE_TIME, LOCK_TIME)
    }

    /// Model with custom phase durations.
    pub fn with_timings(
        unlock_time: Duration,
        open_time: Duration,
        close_time: Duration,
        lock_time: Duration,
    ) -> Self {
        Self {
            phase: TravelPhase::Resting,
            resting: MotionState::Locked,
            origin: 0.0,
            position: 0.0,
            since: Instant::now(),
            unlock_time,
            open_time,
            close_time,
            lock_time,
        }
    }

    /// Current estimated position.
    pub fn position(&mut self) -> f32 {
        self.update();
        self.position
    }

    /// Presumed motion state: the travelling phase while moving, the last
    /// settled state otherwise.
    pub fn state(&mut self) -> MotionState {
        self.update();
        match self.phase {
            TravelPhase::Unlocking | TravelPhase::Opening => MotionState::Opening,
            TravelPhase::Closing | TravelPhase::Locking => MotionState::Closing,
            TravelPhase::Resting => self.resting,
        }
    }

    /// Force the position to a known value, e.g. when restoring state from
    /// a home-automation layer. Not a move command.
    pub fn restore_position(&mut self, position: f32) {
        self.position = position.clamp(0.0, 100.0);
        self.phase = TravelPhase::Resting;
        self.resting = if self.position <= 0.0 {
            MotionState::Locked
        } else if self.position >= 100.0 {
            MotionState::Open
        } else {
            MotionState::Stopped
        };
    }

    /// The opener acknowledged OPEN.
    pub fn start_opening(&mut self) {
        self.update();
        self.origin = self.position;
        self.since = Instant::now();
        // From fully closed the drive unlocks first.
        self.phase = if self.position <= 0.0 {
            TravelPhase::Unlocking
        } else {
            TravelPhase::Opening
        };
    }

    /// The opener acknowledged CLOSE.
    pub fn start_closing(&mut self) {
        self.update();
        self.origin = self.position;
        self.since = Instant::now();
        self.phase = TravelPhase::Closing;
    }

    /// The opener acknowledged STOP.
    pub fn stop(&mut self) {
        self.update();
        // A locking drive runs its lock to completion regardless.
        if self.phase != TravelPhase::Locking {
            self.phase = TravelPhase::Resting;
            self.resting = MotionState::Stopped;
        }
    }

    /// Reconcile the estimate with a motion-state report from the device.
    pub fn observe(&mut self, state: MotionState) {
        self.update();
        match state {
            MotionState::Open => {
                self.position = 100.0;
                self.phase = TravelPhase::Resting;
                self.resting = MotionState::Open;
            }
            MotionState::Closed | MotionState::Locked => {
                self.position = 0.0;
                self.phase = TravelPhase::Resting;
                self.resting = state;
            }
            MotionState::Stopped => {
                self.phase = TravelPhase::Resting;
                self.resting = MotionState::Stopped;
            }
            MotionState::Opening => {
                if !matches!(self.phase, TravelPhase::Unlocking | TravelPhase::Opening) {
                    self.start_opening();
                }
            }
            MotionState::Closing => {
                if !matches!(self.phase, TravelPhase::Closing | TravelPhase::Locking) {
                    self.start_closing();
                }
            }
            MotionState::Unknown | MotionState::Error => {}
        }
    }

    /// Reconcile the estimate with a lock-state report.
    ///
    /// Shipped firmware reports the lock, not the motion: STATUS returns
    /// Unlocked for a full open travel. The lock state therefore only
    /// corrects the presumed state where the two disagree; mid-travel it
    /// confirms the estimate and changes nothing.
    pub fn reconcile(&mut self, lock: LockState) {
        self.update();
        let locked = matches!(lock, LockState::StrongLocked | LockState::WeakLocked);
        if locked {
            match self.phase {
                // Expected around the lock transitions themselves.
                TravelPhase::Unlocking | TravelPhase::Locking => {
                    self.position = 0.0;
                }
                // The close run reached the lock.
                TravelPhase::Closing => self.enter_locking(),
                // Still locked although we presumed an open travel: the
                // drive never moved.
                TravelPhase::Opening => {
                    self.position = 0.0;
                    self.phase = TravelPhase::Resting;
                    self.resting = MotionState::Locked;
                }
                TravelPhase::Resting => match self.resting {
                    // Closed behind our back; the lock phase is running.
                    MotionState::Open => self.enter_locking(),
                    MotionState::Locked => {}
                    _ => {
                        self.position = 0.0;
                        self.resting = MotionState::Locked;
                    }
                },
            }
        } else {
            match self.phase {
                // The unlock finished; the spindle is travelling now.
                TravelPhase::Unlocking => self.enter_opening(),
                // Unlocked although we presumed locked: opened behind our
                // back, travel direction unknown but opening is the only
                // move that starts from locked.
                TravelPhase::Resting
                    if matches!(
                        self.resting,
                        MotionState::Locked | MotionState::Closed | MotionState::Unknown
                    ) =>
                {
                    self.enter_opening()
                }
                // Unlocked is the expected report anywhere above closed.
                _ => {}
            }
        }
    }

    fn enter_opening(&mut self) {
        self.origin = 0.0;
        self.position = 0.0;
        self.since = Instant::now();
        self.phase = TravelPhase::Opening;
    }

    fn enter_locking(&mut self) {
        self.origin = 0.0;
        self.position = 0.0;
        self.since = Instant::now();
        self.phase = TravelPhase::Locking;
    }

    /// Advance the estimate to now, chaining phase transitions.
    fn update(&mut self) {
        loop {
            let elapsed = self.since.elapsed();
            match self.phase {
                TravelPhase::Resting => return,
                TravelPhase::Unlocking => {
                    if elapsed < self.unlock_time {
                        return;
                    }
                    self.since += self.unlock_time;
                    self.phase = TravelPhase::Opening;
                }
                TravelPhase::Opening => {
                    let frac = elapsed.as_secs_f32() / self.open_time.as_secs_f32();
                    self.position = (self.origin + frac * 100.0).min(100.0);
                    if self.position >= 100.0 {
                        self.phase = TravelPhase::Resting;
                        self.resting = MotionState::Open;
                    }
                    return;
                }
                TravelPhase::Closing => {
                    // Run time left before the lock phase starts.
                    let run = self.close_time.mul_f32(self.origin / 100.0);
                    if elapsed < run {
                        let frac = elapsed.as_secs_f32() / self.close_time.as_secs_f32();
                        self.position = (self.origin - frac * 100.0).max(0.0);
                        return;
                    }
                    self.position = 0.0;
                    self.since += run;
                    self.phase = TravelPhase::Locking;
                }
                TravelPhase::Locking => {
                    if elapsed >= self.lock_time {
                        self.phase = TravelPhase::Resting;
                        self.resting = MotionState::Locked;
                    }
                    return;
                }
            }
        }
    }
}
