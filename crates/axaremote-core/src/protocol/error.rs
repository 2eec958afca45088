//! Protocol and transport errors

use thiserror::Error;

use super::codec::MotionState;
use super::commands::Command;

/// Errors raised by the byte channel underneath the protocol.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The channel could not be established or went away. Fatal to the
    /// current session; recoverable by reconnecting.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A read did not complete before its deadline. Not fatal; the caller
    /// may retry or treat it as "no reply".
    #[error("read timed out")]
    Timeout,

    /// Any other I/O failure on the channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during a command/response exchange.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Channel-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No classifiable reply arrived within the read timeout. The session
    /// stays usable; the caller may retry the same command.
    #[error("no response to {command}")]
    NoResponse {
        /// The command that went unanswered.
        command: Command,
    },

    /// The device answered, but not with the reply the command calls for.
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        /// The command that was issued.
        command: Command,
        /// Debug rendering of the offending reply.
        reply: String,
    },

    /// The device reported an ERROR motion state. Not retried automatically;
    /// it usually means a mechanical condition.
    #[error("device reported a fault")]
    DeviceFault,

    /// The `wait_until` deadline elapsed before the target state was seen.
    #[error("wait timed out, last observed state: {last}")]
    WaitTimedOut {
        /// State from the final status poll.
        last: MotionState,
    },

    /// The wait was abandoned through its [`CancelToken`](super::CancelToken).
    /// The transport remains valid for subsequent commands.
    #[error("wait cancelled")]
    Cancelled,

    /// Operation requires a connected session.
    #[error("not connected to the window opener")]
    NotConnected,

    /// `connect` called on an already connected facade.
    #[error("already connected")]
    AlreadyConnected,
}
