//! `simlink-control` – closed-loop vehicle control.
//!
//! # Modules
//!
//! - [`pid`] – [`PidController`][pid::PidController]: error-driven PID with
//!   output clamping.
//! - [`driver`] – [`ClosedLoopDriver`][driver::ClosedLoopDriver]: turns
//!   bus velocity commands into throttle, brake and steering.

pub mod driver;
pub mod pid;

pub use driver::{ClosedLoopDriver, CommandHandle, DriverConfig, VehicleGeometry};
pub use pid::{PidController, PidGains};
