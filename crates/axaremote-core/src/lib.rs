//! # axaremote Core Library
//!
//! Client library for AXA Remote motorized window openers, connected over a
//! direct serial link (RS-232 level shifted onto the opener's LIN bus) or a
//! transparent serial-to-network bridge.
//!
//! This library provides:
//! - Serial and network-bridge transport channels
//! - The lockstep ASCII command/response protocol
//! - A session state machine with a polled "wait until open/closed" loop
//! - Estimated travel position while the opener is moving
//! - A simulated device for tests and demo mode
//!
//! ## Example
//!
//! ```rust,ignore
//! use axaremote_core::protocol::{AxaRemote, CancelToken, ConnectionConfig, WaitTarget};
//!
//! let mut axa = AxaRemote::new(ConnectionConfig::serial("/dev/ttyUSB0"));
//! axa.connect()?;
//! axa.open()?;
//! let state = axa.wait_until(WaitTarget::Open, &CancelToken::new())?;
//! println!("window is {state}");
//! axa.disconnect();
//! ```

#![warn(missing_docs)]

pub mod demo;
pub mod protocol;
pub mod travel;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::{DemoHandle, DemoTimings, DemoWindowOpener};
    pub use crate::protocol::{
        AxaRemote, CancelToken, Channel, Command, ConnectionConfig, ConnectionState, LockState,
        MotionState, ParsedReply, ProtocolError, Session, StatusTable, TransportConfig,
        TransportError, WaitTarget,
    };
    pub use crate::travel::TravelModel;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
