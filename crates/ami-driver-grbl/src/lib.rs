//! `ami-driver-grbl`
//!
//! Client for the GRBL controller that moves the plate imager's gantry.
//!
//! - [`GrblClient`]: serial client; one command in flight at a time
//! - [`MotionProtocol`]: the operations the device controller relies on
//! - [`ResponseWaiter`]: strategy for collecting a response unit, with a real
//!   serial implementation and a simulated one for bench work without hardware
//! - [`protocol`]: command encoding, response classification and status parsing

pub mod client;
pub mod motion;
pub mod protocol;
pub mod waiter;

pub use client::{GrblClient, GrblTimeouts, MAX_SPINDLE_SPEED};
pub use motion::MotionProtocol;
pub use protocol::{Command, ProtocolResult, Reply, ResponseLine, StatusReport};
pub use waiter::{
    ResponseWaiter, SerialResponseWaiter, SimulatedResponseWaiter, DEFAULT_SIMULATED_STATUS,
};
