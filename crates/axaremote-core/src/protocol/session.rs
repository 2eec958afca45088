//! Device session
//!
//! The lockstep request/response state machine. The serial line is half
//! duplex and single owner: exactly one reply is read per command before
//! the next command may be issued, and a session must not be shared without
//! external mutual exclusion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::channel::Channel;
use super::codec::{decode_line, MotionState, ParsedReply, StatusTable};
use super::commands::Command;
use super::error::{ProtocolError, TransportError};
use crate::travel::TravelModel;

/// After this many consecutive blank lines something is probably wrong with
/// the cabling; warn once.
const BLANK_LINE_WARN: u32 = 5;

/// Granularity of the cancellable sleep inside `wait_until`.
const CANCEL_SLICE: Duration = Duration::from_millis(10);

/// Cadence of the travel-estimate watch inside `set_position`.
const POSITION_POLL: Duration = Duration::from_millis(20);

/// Cancellation flag shared with the owner of a long-running wait.
///
/// Cloning is cheap; all clones observe the same flag. Cancelling a wait
/// leaves the session and its transport valid for subsequent commands.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Safe to call from another thread or a signal
    /// handler.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Target of a [`Session::wait_until`] poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// Wait for the window to be fully open.
    Open,
    /// Wait for the window to be closed (the device locks after closing;
    /// both count).
    Closed,
}

impl WaitTarget {
    fn matches(&self, state: MotionState) -> bool {
        match self {
            WaitTarget::Open => state == MotionState::Open,
            WaitTarget::Closed => matches!(state, MotionState::Closed | MotionState::Locked),
        }
    }
}

/// Request/response phase of the session itself, independent of the
/// window's motion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingReply,
}

/// One session per physical device. Owns the channel for its lifetime and
/// tracks the last motion state the device reported.
pub struct Session<C: Channel> {
    channel: C,
    phase: Phase,
    read_timeout: Duration,
    status_table: StatusTable,
    last_state: MotionState,
    travel: TravelModel,
    identity: Option<(String, String)>,
}

impl<C: Channel> Session<C> {
    /// Wrap an open channel. `read_timeout` bounds every reply read.
    pub fn new(channel: C, read_timeout: Duration) -> Self {
        Self::with_travel_model(channel, read_timeout, TravelModel::new())
    }

    /// Like [`Session::new`] with a custom travel model, for drives with
    /// non-standard phase durations.
    pub fn with_travel_model(channel: C, read_timeout: Duration, travel: TravelModel) -> Self {
        Self {
            channel,
            phase: Phase::Idle,
            read_timeout,
            status_table: StatusTable::new(),
            last_state: MotionState::Unknown,
            travel,
            identity: None,
        }
    }

    /// The status-token table, for firmware-specific extensions.
    pub fn status_table_mut(&mut self) -> &mut StatusTable {
        &mut self.status_table
    }

    /// Last motion state reported by the device.
    pub fn last_state(&self) -> MotionState {
        self.last_state
    }

    /// Estimated position, 0.0 closed to 100.0 open.
    pub fn position(&mut self) -> f32 {
        self.travel.position()
    }

    /// Seed the position estimate from externally persisted state.
    pub fn restore_position(&mut self, position: f32) {
        self.travel.restore_position(position);
    }

    /// Send one command and return its classified reply.
    ///
    /// The `Idle -> AwaitingReply -> Idle` cycle completes even on failure,
    /// so a timeout never poisons the session.
    pub fn send(&mut self, command: Command) -> Result<ParsedReply, ProtocolError> {
        debug_assert_eq!(self.phase, Phase::Idle, "command issued mid-exchange");
        self.phase = Phase::AwaitingReply;
        let result = self.exchange(command);
        self.phase = Phase::Idle;
        result
    }

    fn exchange(&mut self, command: Command) -> Result<ParsedReply, ProtocolError> {
        trace!(%command, wire = ?command.wire(), "tx");
        self.channel
            .write_all(command.wire().as_bytes())
            .map_err(TransportError::Io)?;
        self.channel.flush().map_err(TransportError::Io)?;

        let deadline = Instant::now() + self.read_timeout;
        let mut blanks = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::NoResponse { command });
            }
            let line = match self.channel.read_line(remaining) {
                Ok(line) => line,
                Err(TransportError::Timeout) => {
                    return Err(ProtocolError::NoResponse { command })
                }
                Err(e) => return Err(e.into()),
            };
            trace!(line = ?line, "rx");

            // The device frames its output with CR/LF pairs, so blank lines
            // are routine.
            if line.trim().is_empty() {
                blanks += 1;
                if blanks == BLANK_LINE_WARN {
                    warn!("only blank lines coming back, check the cabling");
                }
                continue;
            }

            match decode_line(&line, &self.status_table) {
                ParsedReply::Echo(echoed) => {
                    trace!(%echoed, "command echo");
                }
                ParsedReply::Unknown(raw) => {
                    // Diagnostic chatter; keep waiting for a classifiable
                    // reply until the deadline.
                    debug!(raw = %raw, "ignoring unrecognized line");
                }
                reply => {
                    debug!(?reply, "reply");
                    return Ok(reply);
                }
            }
        }
    }

    /// Query the device and update the cached motion state.
    ///
    /// A motion-state reply is taken as is. A lock-state reply (shipped
    /// firmware reports the lock, not the motion) is reconciled against the
    /// travel model, and the presumed state is returned: the window does
    /// not count as open just because it has unlocked.
    pub fn status(&mut self) -> Result<MotionState, ProtocolError> {
        match self.send(Command::Status)? {
            ParsedReply::Status(state) => {
                self.travel.observe(state);
                self.last_state = state;
                Ok(state)
            }
            ParsedReply::Lock(lock) => {
                self.travel.reconcile(lock);
                let state = self.travel.state();
                self.last_state = state;
                Ok(state)
            }
            reply => Err(ProtocolError::UnexpectedReply {
                command: Command::Status,
                reply: format!("{reply:?}"),
            }),
        }
    }

    /// Start opening. The device acknowledges immediately; the motion
    /// itself is asynchronous.
    pub fn open(&mut self) -> Result<(), ProtocolError> {
        self.command_ack(Command::Open)?;
        self.travel.start_opening();
        self.last_state = self.travel.state();
        Ok(())
    }

    /// Start closing.
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        self.command_ack(Command::Close)?;
        self.travel.start_closing();
        self.last_state = self.travel.state();
        Ok(())
    }

    /// Stop the motor.
    pub fn stop(&mut self) -> Result<(), ProtocolError> {
        self.command_ack(Command::Stop)?;
        self.travel.stop();
        self.last_state = self.travel.state();
        Ok(())
    }

    /// Move to an estimated position, 0.0 fully closed to 100.0 fully open.
    ///
    /// End positions simply issue CLOSE or OPEN and return; pair with
    /// [`Session::wait_until`] to block until the travel finishes. An
    /// intermediate target starts the motor towards it and issues STOP once
    /// the travel estimate crosses it, blocking for the duration of the
    /// move. Cancelling stops the motor before returning
    /// [`ProtocolError::Cancelled`].
    pub fn set_position(
        &mut self,
        target: f32,
        cancel: &CancelToken,
    ) -> Result<(), ProtocolError> {
        let target = target.clamp(0.0, 100.0);
        if target <= 0.0 {
            return self.close();
        }
        if target >= 100.0 {
            return self.open();
        }

        let current = self.travel.position();
        if (current - target).abs() < 0.5 {
            return Ok(());
        }
        let opening = current < target;
        debug!(current, target, opening, "moving to position");
        if opening {
            self.open()?;
        } else {
            self.close()?;
        }

        loop {
            let position = self.travel.position();
            let reached = if opening {
                position >= target
            } else {
                position <= target
            };
            if reached {
                return self.stop();
            }
            if let Err(e) = Self::cancellable_sleep(POSITION_POLL, cancel) {
                // Don't leave the motor running after an abandoned move.
                self.stop()?;
                return Err(e);
            }
        }
    }

    fn command_ack(&mut self, command: Command) -> Result<(), ProtocolError> {
        debug_assert!(command.expects_ack(), "{command} is a query");
        match self.send(command)? {
            ParsedReply::Ack => Ok(()),
            reply => Err(ProtocolError::UnexpectedReply {
                command,
                reply: format!("{reply:?}"),
            }),
        }
    }

    /// Fetch the device type and firmware version. Cached for the lifetime
    /// of the session.
    pub fn identify(&mut self) -> Result<(String, String), ProtocolError> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }
        let device = match self.send(Command::Device)? {
            ParsedReply::DeviceId(device) => device,
            reply => {
                return Err(ProtocolError::UnexpectedReply {
                    command: Command::Device,
                    reply: format!("{reply:?}"),
                })
            }
        };
        let version = match self.send(Command::Version)? {
            ParsedReply::Version(version) => version,
            reply => {
                return Err(ProtocolError::UnexpectedReply {
                    command: Command::Version,
                    reply: format!("{reply:?}"),
                })
            }
        };
        self.identity = Some((device.clone(), version.clone()));
        Ok((device, version))
    }

    /// Poll `status` at `poll_interval` until the window reaches `target`.
    ///
    /// Three exits besides success: the device reports `Error`
    /// ([`ProtocolError::DeviceFault`], fail fast), `overall_timeout`
    /// elapses ([`ProtocolError::WaitTimedOut`] with the last observed
    /// state), or `cancel` fires ([`ProtocolError::Cancelled`]). The
    /// transport stays valid in every case.
    pub fn wait_until(
        &mut self,
        target: WaitTarget,
        poll_interval: Duration,
        overall_timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<MotionState, ProtocolError> {
        self.wait_until_observed(target, poll_interval, overall_timeout, cancel, |_, _| {})
    }

    /// Like [`Session::wait_until`], reporting each observed state and
    /// estimated position to `observer` for progress display.
    pub fn wait_until_observed(
        &mut self,
        target: WaitTarget,
        poll_interval: Duration,
        overall_timeout: Duration,
        cancel: &CancelToken,
        mut observer: impl FnMut(MotionState, f32),
    ) -> Result<MotionState, ProtocolError> {
        let deadline = Instant::now() + overall_timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            let state = self.status()?;
            observer(state, self.travel.position());
            if target.matches(state) {
                return Ok(state);
            }
            if state == MotionState::Error {
                return Err(ProtocolError::DeviceFault);
            }
            if Instant::now() >= deadline {
                return Err(ProtocolError::WaitTimedOut { last: state });
            }
            let nap = poll_interval.min(deadline.saturating_duration_since(Instant::now()));
            Self::cancellable_sleep(nap, cancel)?;
        }
    }

    /// Sleep in slices so an external cancel interrupts promptly.
    fn cancellable_sleep(duration: Duration, cancel: &CancelToken) -> Result<(), ProtocolError> {
        let end = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            let left = end.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(());
            }
            thread::sleep(left.min(CANCEL_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_wait_target_matching() {
        assert!(WaitTarget::Open.matches(MotionState::Open));
        assert!(!WaitTarget::Open.matches(MotionState::Opening));
        assert!(WaitTarget::Closed.matches(MotionState::Closed));
        assert!(WaitTarget::Closed.matches(MotionState::Locked));
        assert!(!WaitTarget::Closed.matches(MotionState::Closing));
    }

    #[test]
    fn test_cancellable_sleep_returns_early() {
        let token = CancelToken::new();
        token.cancel();
        let started = Instant::now();
        let result =
            Session::<crate::demo::DemoWindowOpener>::cancellable_sleep(
                Duration::from_secs(5),
                &token,
            );
        assert!(matches!(result, Err(ProtocolError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
