//! AXA Remote serial protocol
//!
//! Implements the lockstep ASCII command/response protocol spoken by the
//! window opener: six fixed commands, CR/LF framed, one reply per command.
//! The physical link is 19200 baud, 8 data bits, no parity, two stop bits,
//! either on a local serial port or behind a network-to-serial bridge.

pub mod channel;
pub mod codec;
pub mod commands;
mod connection;
mod error;
pub mod serial;
mod session;

pub use channel::{Channel, SerialChannel, TcpChannel};
pub use codec::{decode_line, LockState, MotionState, ParsedReply, StatusTable};
pub use commands::Command;
pub use connection::{AxaRemote, ConnectionConfig, ConnectionState, TransportConfig};
pub use error::{ProtocolError, TransportError};
pub use session::{CancelToken, Session, WaitTarget};

/// Fixed line rate of the device.
pub const BAUD_RATE: u32 = 19200;

/// Default timeout for a single reply read in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Default cadence of the `wait_until` status poll in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default overall deadline for `wait_until` in milliseconds.
/// A full travel takes about 47 s (5 s unlock plus a 42 s spindle run).
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 90_000;
