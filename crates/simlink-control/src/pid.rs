//! Generic PID (Proportional–Integral–Derivative) controller.
//!
//! The controller is error-driven: the caller computes `set_point - measured`
//! (wrapping angles first when needed) and passes it in together with the
//! elapsed time.  Only the output is clamped; the integral accumulator is
//! left unbounded, so long saturation periods wind it up.
//!
//! # Example
//!
//! ```rust
//! use simlink_control::pid::PidController;
//!
//! let mut pid = PidController::new(2.0, 0.1, 0.1);
//! pid.set_output_limits(-1.0, 1.0);
//!
//! let output = pid.update(0.25, 0.01);
//! assert!(output > 0.0);
//! assert!(output <= 1.0);
//! ```

use serde::{Deserialize, Serialize};
use simlink_types::SimLinkError;
use tracing::warn;

/// Gains and output bounds, as they appear in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    #[serde(default = "default_output_min")]
    pub output_min: f64,
    #[serde(default = "default_output_max")]
    pub output_max: f64,
}

fn default_output_min() -> f64 {
    -1.0
}
fn default_output_max() -> f64 {
    1.0
}

impl PidGains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            output_min: default_output_min(),
            output_max: default_output_max(),
        }
    }

    /// Reject output bounds that cannot describe a range.
    pub fn validate(&self) -> Result<(), SimLinkError> {
        if self.output_min.is_nan() || self.output_max.is_nan() {
            return Err(SimLinkError::Config(
                "PID output limits must not be NaN".to_string(),
            ));
        }
        if self.output_min > self.output_max {
            return Err(SimLinkError::Config(format!(
                "PID output_min {} exceeds output_max {}",
                self.output_min, self.output_max
            )));
        }
        Ok(())
    }

    /// Build a fresh controller from these gains.
    pub fn build(&self) -> PidController {
        let mut pid = PidController::new(self.kp, self.ki, self.kd);
        pid.set_output_limits(self.output_min, self.output_max);
        pid
    }
}

/// A tunable PID controller for closed-loop feedback control.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    previous_error: f64,
    output_min: f64,
    output_max: f64,
}

impl PidController {
    /// Create a new controller with the given gains.
    ///
    /// Output is unclamped by default (`f64::NEG_INFINITY` to `f64::INFINITY`).
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            previous_error: 0.0,
            output_min: f64::NEG_INFINITY,
            output_max: f64::INFINITY,
        }
    }

    /// Update the proportional, integral, and derivative gains.
    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Clamp the controller output to `[min, max]`.
    ///
    /// Inverted bounds are swapped and a NaN bound leaves that side open.
    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        let min = if min.is_nan() { f64::NEG_INFINITY } else { min };
        let max = if max.is_nan() { f64::INFINITY } else { max };
        if min > max {
            warn!(min, max, "inverted PID output limits; swapping");
            self.output_min = max;
            self.output_max = min;
        } else {
            self.output_min = min;
            self.output_max = max;
        }
    }

    /// Current integral accumulator.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Error seen by the previous [`update`][Self::update].
    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    /// Compute the next controller output from `error` over `dt` seconds.
    ///
    /// Returns `0.0` without updating internal state if `dt` is not positive.
    pub fn update(&mut self, error: f64, dt: f64) -> f64 {
        if dt <= 0.0 {
            return 0.0;
        }

        self.integral += error * dt;
        let derivative = (error - self.previous_error) / dt;
        self.previous_error = error;

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        output.clamp(self.output_min, self.output_max)
    }

    /// Zero the integral accumulator and the derivative memory.
    ///
    /// Never called implicitly; owners reset on mode changes.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }
}
