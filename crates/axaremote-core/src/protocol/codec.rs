//! Reply decoding
//!
//! The reply grammar is firmware defined and has to be handled permissively:
//! blank lines, command echoes and diagnostic chatter are all legal on the
//! wire. Anything unrecognized decodes to [`ParsedReply::Unknown`] instead
//! of an error, and an unmapped status token yields
//! [`MotionState::Unknown`], so unexpected firmware never crashes a session.
//!
//! Two grammars are accepted: `NAME:VALUE` tokens (`STATUS:OPEN`) and the
//! numeric-code lines shipped firmware produces (`210 Unlocked`).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::commands::Command;

/// The window's physical condition as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionState {
    /// No status seen yet, or the device sent an unmapped token.
    Unknown,
    /// Fully open.
    Open,
    /// Motor running towards open.
    Opening,
    /// Fully closed but not locked.
    Closed,
    /// Motor running towards closed.
    Closing,
    /// Stopped partway.
    Stopped,
    /// Closed and locked.
    Locked,
    /// The device reported a fault condition.
    Error,
}

impl MotionState {
    /// True while the motor is running.
    pub fn is_moving(&self) -> bool {
        matches!(self, MotionState::Opening | MotionState::Closing)
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MotionState::Unknown => "unknown",
            MotionState::Open => "open",
            MotionState::Opening => "opening",
            MotionState::Closed => "closed",
            MotionState::Closing => "closing",
            MotionState::Stopped => "stopped",
            MotionState::Locked => "locked",
            MotionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Lock state from the numeric-code STATUS grammar.
///
/// Shipped firmware only reports the lock, not the motion: STATUS returns
/// `210 Unlocked` for the whole of an open travel. A lock state on its own
/// says nothing about direction, so the session resolves it against the
/// presumed state in the travel model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// `210 Unlocked` - anywhere between unlocked-at-closed and fully open.
    Unlocked,
    /// `211 Strong Locked` - closed and locked.
    StrongLocked,
    /// `212 Weak Locked` - locked, but the mechanism reports reduced grip.
    WeakLocked,
}

/// One decoded reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedReply {
    /// Device type string (reply to DEVICE).
    DeviceId(String),
    /// Firmware version string (reply to VERSION).
    Version(String),
    /// Motion status (reply to STATUS in the `NAME:VALUE` grammar).
    Status(MotionState),
    /// Lock state (reply to STATUS in the numeric-code grammar).
    Lock(LockState),
    /// Plain acknowledgment (reply to OPEN/STOP/CLOSE).
    Ack,
    /// The device echoes each command before replying.
    Echo(Command),
    /// Unrecognized line; diagnostic chatter is normal on this bus.
    Unknown(String),
}

/// Status-token lookup table.
///
/// The token set is firmware specific and not fully enumerable, so the
/// known defaults ship built in and the table stays extensible. Lookups are
/// case insensitive.
#[derive(Debug, Clone)]
pub struct StatusTable {
    entries: HashMap<String, MotionState>,
}

impl Default for StatusTable {
    fn default() -> Self {
        let mut table = StatusTable {
            entries: HashMap::new(),
        };
        table.insert("OPEN", MotionState::Open);
        table.insert("OPENING", MotionState::Opening);
        table.insert("CLOSED", MotionState::Closed);
        table.insert("CLOSING", MotionState::Closing);
        table.insert("STOPPED", MotionState::Stopped);
        table.insert("LOCKED", MotionState::Locked);
        table.insert("ERROR", MotionState::Error);
        table
    }
}

impl StatusTable {
    /// Table with the built-in token set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or override a token mapping.
    pub fn insert(&mut self, token: &str, state: MotionState) {
        self.entries.insert(token.to_ascii_uppercase(), state);
    }

    /// Map a token to a motion state; unmapped tokens are `Unknown`, never
    /// an error.
    pub fn lookup(&self, token: &str) -> MotionState {
        self.entries
            .get(&token.trim().to_ascii_uppercase())
            .copied()
            .unwrap_or(MotionState::Unknown)
    }
}

/// Split a `NNN rest` numeric-code line.
fn split_code(line: &str) -> Option<(u16, &str)> {
    let (code, rest) = match line.split_once(char::is_whitespace) {
        Some((code, rest)) => (code, rest.trim()),
        None => (line, ""),
    };
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()) {
        code.parse().ok().map(|n| (n, rest))
    } else {
        None
    }
}

/// Decode one non-blank reply line into a [`ParsedReply`].
///
/// Decoding is total: every input maps to some variant.
pub fn decode_line(line: &str, table: &StatusTable) -> ParsedReply {
    let line = line.trim();

    if let Some(cmd) = Command::from_name(line) {
        return ParsedReply::Echo(cmd);
    }

    if let Some((code, rest)) = split_code(line) {
        return match code {
            200 => ParsedReply::Ack,
            // The code alone carries the lock state; the trailing text is
            // redundant.
            210 => ParsedReply::Lock(LockState::Unlocked),
            211 => ParsedReply::Lock(LockState::StrongLocked),
            212 => ParsedReply::Lock(LockState::WeakLocked),
            260 => ParsedReply::DeviceId(rest.to_string()),
            261 => {
                // "261 Firmware V 1.1" carries the version after the noun.
                let version = rest
                    .strip_prefix("Firmware")
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .unwrap_or(rest);
                ParsedReply::Version(version.to_string())
            }
            _ => ParsedReply::Unknown(line.to_string()),
        };
    }

    if let Some((key, value)) = line.split_once(':') {
        let value = value.trim();
        return match key.trim().to_ascii_uppercase().as_str() {
            "STATUS" => ParsedReply::Status(table.lookup(value)),
            "DEVICE" => ParsedReply::DeviceId(value.to_string()),
            "VERSION" => ParsedReply::Version(value.to_string()),
            _ => ParsedReply::Unknown(line.to_string()),
        };
    }

    if line.eq_ignore_ascii_case("OK") {
        return ParsedReply::Ack;
    }

    ParsedReply::Unknown(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_tokens() {
        let table = StatusTable::new();
        let cases = [
            ("OPEN", MotionState::Open),
            ("OPENING", MotionState::Opening),
            ("CLOSED", MotionState::Closed),
            ("CLOSING", MotionState::Closing),
            ("STOPPED", MotionState::Stopped),
            ("LOCKED", MotionState::Locked),
            ("ERROR", MotionState::Error),
        ];
        for (token, state) in cases {
            assert_eq!(
                decode_line(&format!("STATUS:{token}"), &table),
                ParsedReply::Status(state)
            );
        }
    }

    #[test]
    fn test_unmapped_token_is_unknown_not_error() {
        let table = StatusTable::new();
        assert_eq!(
            decode_line("STATUS:VENTILATING", &table),
            ParsedReply::Status(MotionState::Unknown)
        );
    }

    #[test]
    fn test_table_is_extensible() {
        let mut table = StatusTable::new();
        table.insert("VENTILATING", MotionState::Opening);
        assert_eq!(
            decode_line("STATUS:ventilating", &table),
            ParsedReply::Status(MotionState::Opening)
        );
    }

    #[test]
    fn test_numeric_code_grammar() {
        let table = StatusTable::new();
        assert_eq!(decode_line("200 OK", &table), ParsedReply::Ack);
        assert_eq!(
            decode_line("210 Unlocked", &table),
            ParsedReply::Lock(LockState::Unlocked)
        );
        assert_eq!(
            decode_line("211 Strong Locked", &table),
            ParsedReply::Lock(LockState::StrongLocked)
        );
        assert_eq!(
            decode_line("212 Weak Locked", &table),
            ParsedReply::Lock(LockState::WeakLocked)
        );
        // The trailing text is firmware decoration; a bare code decodes the
        // same.
        assert_eq!(
            decode_line("210", &table),
            ParsedReply::Lock(LockState::Unlocked)
        );
        assert_eq!(
            decode_line("260 AXA RV2900", &table),
            ParsedReply::DeviceId("AXA RV2900".to_string())
        );
        assert_eq!(
            decode_line("261 Firmware V 1.1", &table),
            ParsedReply::Version("V 1.1".to_string())
        );
    }

    #[test]
    fn test_command_echo() {
        let table = StatusTable::new();
        assert_eq!(
            decode_line("STATUS", &table),
            ParsedReply::Echo(Command::Status)
        );
        assert_eq!(decode_line("OPEN", &table), ParsedReply::Echo(Command::Open));
    }

    #[test]
    fn test_chatter_is_unknown() {
        let table = StatusTable::new();
        assert_eq!(
            decode_line("502 Command not implemented", &table),
            ParsedReply::Unknown("502 Command not implemented".to_string())
        );
        assert_eq!(
            decode_line("boot: lin bus ready", &table),
            ParsedReply::Unknown("boot: lin bus ready".to_string())
        );
    }

    #[test]
    fn test_crlf_is_stripped() {
        let table = StatusTable::new();
        assert_eq!(
            decode_line("STATUS:OPEN\r\n", &table),
            ParsedReply::Status(MotionState::Open)
        );
    }
}
