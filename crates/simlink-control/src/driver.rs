//! Velocity-command driver.
//!
//! [`ClosedLoopDriver`] turns the latest `/cmd_vel` set-point into throttle,
//! brake and steering for the simulated vehicle:
//!
//! * **Speed** – a PID on `target_linear - |v|`.  Positive output is
//!   throttle, negative output is brake.  Commands below
//!   [`DriverConfig::stop_threshold`] bypass the PID entirely and hold the
//!   vehicle with full brake.
//!
//! * **Heading** – the commanded yaw rate is integrated into a desired
//!   heading; a second PID tracks it using the wrapped heading error.
//!   Drift in the integrated heading is corrected only as fast as steering
//!   can follow it.
//!
//! Commands arrive on the bus receive thread through a [`CommandHandle`]; the
//! simulation thread reads them in [`ClosedLoopDriver::synchronize`].

use std::f64::consts::{PI, TAU};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use simlink_types::{BodyState, DriverInputs, SimLinkError, VelocityCommand};
use tracing::{debug, info, warn};

use crate::pid::{PidController, PidGains};

/// Wheelbase assumed when the host cannot report one.
pub const DEFAULT_WHEELBASE_M: f64 = 3.0;

/// Geometry the host simulation can report about its vehicle.
///
/// Replaces downcasting the vehicle to a wheeled type to find its axles.
pub trait VehicleGeometry {
    /// Distance between the front and rear axles in metres, if known.
    fn wheelbase(&self) -> Option<f64>;
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning for [`ClosedLoopDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_speed_gains")]
    pub speed: PidGains,
    #[serde(default = "default_steering_gains")]
    pub steering: PidGains,
    /// Controller period used when elapsed simulation time is unavailable.
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    /// |linear| below this is treated as a stop command.
    #[serde(default = "default_stop_threshold")]
    pub stop_threshold: f64,
}

fn default_speed_gains() -> PidGains {
    PidGains::new(2.0, 0.1, 0.1)
}
fn default_steering_gains() -> PidGains {
    PidGains::new(2.0, 0.0, 0.5)
}
fn default_step_size() -> f64 {
    0.01
}
fn default_stop_threshold() -> f64 {
    1e-3
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            speed: default_speed_gains(),
            steering: default_steering_gains(),
            step_size: default_step_size(),
            stop_threshold: default_stop_threshold(),
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), SimLinkError> {
        self.speed.validate()?;
        self.steering.validate()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Command handle
// ────────────────────────────────────────────────────────────────────────────

/// Shared slot holding the most recent [`VelocityCommand`].
///
/// Cloned into the bus subscription handler; every write overwrites the
/// previous command.
#[derive(Debug, Clone, Default)]
pub struct CommandHandle {
    inner: Arc<Mutex<VelocityCommand>>,
}

impl CommandHandle {
    pub fn set(&self, command: VelocityCommand) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = command;
    }

    pub fn get(&self) -> VelocityCommand {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bus handler for `geometry_msgs/Twist` messages.
    ///
    /// Runs on the bus receive thread: it parses and stores, nothing else.
    /// Malformed messages are logged and leave the previous command in place.
    pub fn twist_handler(&self) -> impl Fn(&serde_json::Value) + Send + Sync + 'static {
        let handle = self.clone();
        move |msg| match VelocityCommand::from_twist(msg) {
            Ok(command) => handle.set(command),
            Err(e) => warn!(error = %e, "ignoring malformed velocity command"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ClosedLoopDriver
// ────────────────────────────────────────────────────────────────────────────

/// Converts velocity commands into [`DriverInputs`] once per simulation tick.
#[derive(Debug)]
pub struct ClosedLoopDriver {
    config: DriverConfig,
    command: CommandHandle,
    speed_controller: PidController,
    steering_controller: PidController,
    desired_heading: Option<f64>,
    last_time: Option<f64>,
    last_debug_time: f64,
    wheelbase: f64,
    inputs: DriverInputs,
}

impl ClosedLoopDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            command: CommandHandle::default(),
            speed_controller: config.speed.build(),
            steering_controller: config.steering.build(),
            desired_heading: None,
            last_time: None,
            last_debug_time: f64::NEG_INFINITY,
            wheelbase: DEFAULT_WHEELBASE_M,
            inputs: DriverInputs::default(),
        }
    }

    /// Read the wheelbase from the host vehicle, keeping the default when the
    /// host has none.
    pub fn with_geometry(mut self, geometry: &dyn VehicleGeometry) -> Self {
        match geometry.wheelbase() {
            Some(wheelbase) if wheelbase.is_finite() && wheelbase > 0.0 => {
                info!(wheelbase, "vehicle wheelbase");
                self.wheelbase = wheelbase;
            }
            _ => warn!(
                default = DEFAULT_WHEELBASE_M,
                "vehicle geometry unavailable, using default wheelbase"
            ),
        }
        self
    }

    /// Handle through which new commands reach this driver.
    pub fn command_handle(&self) -> CommandHandle {
        self.command.clone()
    }

    pub fn wheelbase(&self) -> f64 {
        self.wheelbase
    }

    /// Inputs produced by the most recent [`synchronize`][Self::synchronize].
    pub fn inputs(&self) -> DriverInputs {
        self.inputs
    }

    /// Reset both controllers and re-seed the desired heading on the next tick.
    pub fn reset(&mut self) {
        self.speed_controller.reset();
        self.steering_controller.reset();
        self.desired_heading = None;
        self.last_time = None;
    }

    /// Compute actuation for the tick at `time` given the current chassis state.
    pub fn synchronize(&mut self, time: f64, state: &BodyState) -> DriverInputs {
        let command = self.command.get();
        let dt = match self.last_time {
            Some(last) if time > last => time - last,
            _ => self.config.step_size,
        };
        self.last_time = Some(time);

        let current_speed = state.speed();
        let current_heading = state.heading();

        let desired_heading = self.desired_heading.get_or_insert(current_heading);
        *desired_heading += command.angular * dt;
        let heading_error = wrap_angle(*desired_heading - current_heading);

        let (throttle, brake) = if command.linear.abs() < self.config.stop_threshold {
            (0.0, 1.0)
        } else {
            let output = self
                .speed_controller
                .update(command.linear - current_speed, dt);
            if output > 0.0 {
                (output, 0.0)
            } else {
                (0.0, -output)
            }
        };
        let steering = self.steering_controller.update(heading_error, dt);

        self.inputs = DriverInputs {
            throttle,
            brake,
            steering,
        }
        .clamped();

        if time - self.last_debug_time >= 1.0 {
            debug!(
                time,
                target_linear = command.linear,
                target_angular = command.angular,
                current_speed,
                current_heading,
                throttle = self.inputs.throttle,
                brake = self.inputs.brake,
                steering = self.inputs.steering,
                "control state"
            );
            self.last_debug_time = time;
        }

        self.inputs
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}
