//! Demo mode - simulated window opener for tests and demos
//!
//! [`DemoWindowOpener`] implements [`Channel`] and behaves like a device on
//! the other end of the line: it echoes commands, frames replies with
//! CR/LF, walks through the unlock/open/close/lock phases on its own clock,
//! and can be muted or made to fail through a [`DemoHandle`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::protocol::{Channel, Command};

/// Phase durations of the simulated drive.
#[derive(Debug, Clone, Copy)]
pub struct DemoTimings {
    /// Unlock phase before the spindle moves.
    pub unlock: Duration,
    /// Full open travel.
    pub open: Duration,
    /// Full close travel.
    pub close: Duration,
    /// Lock phase after reaching closed.
    pub lock: Duration,
}

impl Default for DemoTimings {
    /// Scaled down from the real drive so demos stay watchable.
    fn default() -> Self {
        Self {
            unlock: Duration::from_secs(1),
            open: Duration::from_secs(8),
            close: Duration::from_secs(8),
            lock: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemoPhase {
    Locked,
    Unlocking,
    Opening,
    Open,
    Closing,
    Locking,
    Stopped,
}

/// Delay between a command arriving and its reply being readable.
const REPLY_LATENCY: Duration = Duration::from_millis(5);

struct Inner {
    timings: DemoTimings,
    phase: DemoPhase,
    phase_started: Instant,
    moving_since: Option<Instant>,
    fault_after: Option<Duration>,
    faulted: bool,
    silent: bool,
    /// Partial command line being written by the client.
    line: Vec<u8>,
    /// Scheduled output, readable once its instant has passed.
    pending: VecDeque<(Instant, Vec<u8>)>,
    /// Bytes already due, not yet read.
    rx: VecDeque<u8>,
}

impl Inner {
    fn advance(&mut self, now: Instant) {
        if let (Some(after), Some(since)) = (self.fault_after, self.moving_since) {
            if now.duration_since(since) >= after {
                self.faulted = true;
            }
        }
        loop {
            let elapsed = now.duration_since(self.phase_started);
            match self.phase {
                DemoPhase::Unlocking if elapsed >= self.timings.unlock => {
                    self.phase_started += self.timings.unlock;
                    self.phase = DemoPhase::Opening;
                }
                DemoPhase::Opening if elapsed >= self.timings.open => {
                    self.phase = DemoPhase::Open;
                    self.moving_since = None;
                }
                DemoPhase::Closing if elapsed >= self.timings.close => {
                    self.phase_started += self.timings.close;
                    self.phase = DemoPhase::Locking;
                }
                DemoPhase::Locking if elapsed >= self.timings.lock => {
                    self.phase = DemoPhase::Locked;
                    self.moving_since = None;
                }
                _ => return,
            }
        }
    }

    fn status_token(&self) -> &'static str {
        if self.faulted {
            return "ERROR";
        }
        match self.phase {
            DemoPhase::Locked => "LOCKED",
            DemoPhase::Unlocking | DemoPhase::Opening => "OPENING",
            DemoPhase::Open => "OPEN",
            DemoPhase::Closing | DemoPhase::Locking => "CLOSING",
            DemoPhase::Stopped => "STOPPED",
        }
    }

    fn schedule(&mut self, at: Instant, text: String) {
        self.pending.push_back((at, text.into_bytes()));
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.silent {
            return;
        }
        let now = Instant::now();
        self.advance(now);

        // Echo first, like the real firmware, framed by a blank line.
        self.schedule(now + REPLY_LATENCY, format!("\r\n{line}\r\n"));
        let reply_at = now + REPLY_LATENCY * 2;

        let reply = match Command::from_name(line) {
            Some(Command::Device) => "DEVICE:AXA RV2900\r\n".to_string(),
            Some(Command::Version) => "VERSION:2.03\r\n".to_string(),
            Some(Command::Status) => format!("STATUS:{}\r\n", self.status_token()),
            Some(Command::Open) => {
                if !matches!(self.phase, DemoPhase::Open | DemoPhase::Opening) {
                    self.phase = if self.phase == DemoPhase::Locked {
                        DemoPhase::Unlocking
                    } else {
                        DemoPhase::Opening
                    };
                    self.phase_started = now;
                    self.moving_since = Some(now);
                }
                "OK\r\n".to_string()
            }
            Some(Command::Close) => {
                if !matches!(self.phase, DemoPhase::Locked | DemoPhase::Closing) {
                    self.phase = DemoPhase::Closing;
                    self.phase_started = now;
                    self.moving_since = Some(now);
                }
                "OK\r\n".to_string()
            }
            Some(Command::Stop) => {
                if matches!(
                    self.phase,
                    DemoPhase::Unlocking | DemoPhase::Opening | DemoPhase::Closing
                ) {
                    self.phase = DemoPhase::Stopped;
                    self.moving_since = None;
                }
                "OK\r\n".to_string()
            }
            None => "502 Command not implemented\r\n".to_string(),
        };
        self.schedule(reply_at, reply);
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some((at, _)) = self.pending.front() {
            if *at > now {
                break;
            }
            let (_, bytes) = self.pending.pop_front().expect("front checked");
            self.rx.extend(bytes);
        }
    }
}

/// Simulated window opener on the far end of a [`Channel`].
pub struct DemoWindowOpener {
    inner: Arc<Mutex<Inner>>,
}

/// Control handle for a [`DemoWindowOpener`], usable after the channel has
/// been handed to a session.
#[derive(Clone)]
pub struct DemoHandle {
    inner: Arc<Mutex<Inner>>,
}

impl DemoWindowOpener {
    /// Simulated device, closed and locked, with the given phase timings.
    pub fn new(timings: DemoTimings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                timings,
                phase: DemoPhase::Locked,
                phase_started: Instant::now(),
                moving_since: None,
                fault_after: None,
                faulted: false,
                silent: false,
                line: Vec::new(),
                pending: VecDeque::new(),
                rx: VecDeque::new(),
            })),
        }
    }

    /// Control handle sharing this device's state.
    pub fn handle(&self) -> DemoHandle {
        DemoHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("demo device poisoned")
    }
}

impl DemoHandle {
    /// Stop answering commands while `silent` is set; commands are consumed
    /// without any reply, as if the cable were pulled from the RX pin.
    pub fn set_silent(&self, silent: bool) {
        self.inner.lock().expect("demo device poisoned").silent = silent;
    }

    /// Report ERROR once the device has been moving for `after`.
    pub fn fail_after(&self, after: Duration) {
        self.inner.lock().expect("demo device poisoned").fault_after = Some(after);
    }
}

impl Read for DemoWindowOpener {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        inner.promote_due(Instant::now());
        if inner.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data yet"));
        }
        let n = buf.len().min(inner.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inner.rx.pop_front().expect("len checked");
        }
        Ok(n)
    }
}

impl Write for DemoWindowOpener {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        for &b in buf {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&inner.line).into_owned();
                inner.line.clear();
                inner.handle_line(&line);
            } else if b != b'\r' {
                inner.line.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for DemoWindowOpener {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut inner = self.lock();
        inner.pending.clear();
        inner.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Channel, TransportError};

    fn read_reply(demo: &mut DemoWindowOpener) -> String {
        // Skip framing blanks and the echo.
        loop {
            let line = demo
                .read_line(Duration::from_millis(200))
                .expect("demo reply");
            let line = line.trim().to_string();
            if line.is_empty() || Command::from_name(&line).is_some() {
                continue;
            }
            return line;
        }
    }

    #[test]
    fn test_identity_replies() {
        let mut demo = DemoWindowOpener::new(DemoTimings::default());
        demo.write_all(b"\r\nDEVICE\r\n").unwrap();
        assert_eq!(read_reply(&mut demo), "DEVICE:AXA RV2900");
        demo.write_all(b"\r\nVERSION\r\n").unwrap();
        assert_eq!(read_reply(&mut demo), "VERSION:2.03");
    }

    #[test]
    fn test_starts_locked_and_opens() {
        let timings = DemoTimings {
            unlock: Duration::from_millis(10),
            open: Duration::from_millis(50),
            close: Duration::from_millis(50),
            lock: Duration::from_millis(10),
        };
        let mut demo = DemoWindowOpener::new(timings);

        demo.write_all(b"\r\nSTATUS\r\n").unwrap();
        assert_eq!(read_reply(&mut demo), "STATUS:LOCKED");

        demo.write_all(b"\r\nOPEN\r\n").unwrap();
        assert_eq!(read_reply(&mut demo), "OK");

        demo.write_all(b"\r\nSTATUS\r\n").unwrap();
        assert_eq!(read_reply(&mut demo), "STATUS:OPENING");

        std::thread::sleep(Duration::from_millis(80));
        demo.write_all(b"\r\nSTATUS\r\n").unwrap();
        assert_eq!(read_reply(&mut demo), "STATUS:OPEN");
    }

    #[test]
    fn test_unknown_command_gets_chatter() {
        let mut demo = DemoWindowOpener::new(DemoTimings::default());
        demo.write_all(b"\r\nREBOOT\r\n").unwrap();
        assert_eq!(read_reply(&mut demo), "502 Command not implemented");
    }

    #[test]
    fn test_silent_device_times_out() {
        let demo = DemoWindowOpener::new(DemoTimings::default());
        let handle = demo.handle();
        let mut demo = demo;
        handle.set_silent(true);
        demo.write_all(b"\r\nSTATUS\r\n").unwrap();
        match demo.read_line(Duration::from_millis(30)) {
            Err(TransportError::Timeout) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
