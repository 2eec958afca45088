//! Protocol commands
//!
//! The window opener understands a closed set of six ASCII commands. Each
//! one is framed as `\r\nNAME\r\n`; the leading CR/LF flushes whatever
//! partial line the device may still be buffering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Commands understood by the window opener. None of them carry a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Query the device type string
    Device,
    /// Query the firmware version
    Version,
    /// Query the current lock/motion status
    Status,
    /// Start opening the window
    Open,
    /// Stop the motor
    Stop,
    /// Start closing the window
    Close,
}

impl Command {
    /// Every command, in protocol order.
    pub const ALL: [Command; 6] = [
        Command::Device,
        Command::Version,
        Command::Status,
        Command::Open,
        Command::Stop,
        Command::Close,
    ];

    /// The bare ASCII token for this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Device => "DEVICE",
            Command::Version => "VERSION",
            Command::Status => "STATUS",
            Command::Open => "OPEN",
            Command::Stop => "STOP",
            Command::Close => "CLOSE",
        }
    }

    /// The full wire form of this command.
    pub fn wire(&self) -> &'static str {
        match self {
            Command::Device => "\r\nDEVICE\r\n",
            Command::Version => "\r\nVERSION\r\n",
            Command::Status => "\r\nSTATUS\r\n",
            Command::Open => "\r\nOPEN\r\n",
            Command::Stop => "\r\nSTOP\r\n",
            Command::Close => "\r\nCLOSE\r\n",
        }
    }

    /// Parse a bare token back into a command. Used to recognize the echo
    /// the device produces before every reply.
    pub fn from_name(token: &str) -> Option<Command> {
        Command::ALL.iter().copied().find(|c| c.name() == token)
    }

    /// Whether the device answers this command with a plain acknowledgment
    /// rather than data. Motion is asynchronous on the device side.
    pub fn expects_ack(&self) -> bool {
        matches!(self, Command::Open | Command::Stop | Command::Close)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_framing() {
        for cmd in Command::ALL {
            assert_eq!(cmd.wire(), format!("\r\n{}\r\n", cmd.name()));
        }
    }

    #[test]
    fn test_wire_is_deterministic() {
        assert_eq!(Command::Open.wire(), Command::Open.wire());
        assert_eq!(Command::Status.wire(), "\r\nSTATUS\r\n");
    }

    #[test]
    fn test_name_round_trip() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_name(cmd.name()), Some(cmd));
        }
        assert_eq!(Command::from_name("REBOOT"), None);
        assert_eq!(Command::from_name("open"), None);
    }

    #[test]
    fn test_ack_commands() {
        assert!(Command::Open.expects_ack());
        assert!(Command::Stop.expects_ack());
        assert!(Command::Close.expects_ack());
        assert!(!Command::Status.expects_ack());
        assert!(!Command::Device.expects_ack());
    }
}
