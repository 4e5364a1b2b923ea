use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Latest velocity set-point received from the message bus.
///
/// Mirrors the two fields of a `geometry_msgs/Twist` that a ground vehicle
/// can act on: forward speed and yaw rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    /// Forward speed in m/s.
    pub linear: f64,
    /// Yaw rate in rad/s.
    pub angular: f64,
}

#[derive(Debug, Deserialize)]
struct TwistMsg {
    linear: LinearPart,
    angular: AngularPart,
}

#[derive(Debug, Deserialize)]
struct LinearPart {
    x: f64,
}

#[derive(Debug, Deserialize)]
struct AngularPart {
    z: f64,
}

impl VelocityCommand {
    pub fn new(linear: f64, angular: f64) -> Self {
        Self { linear, angular }
    }

    /// Parse the `msg` body of a `geometry_msgs/Twist` publish.
    ///
    /// Only `linear.x` and `angular.z` are read; every other component is
    /// ignored.  Values go through `f32` to keep single-precision semantics.
    pub fn from_twist(msg: &serde_json::Value) -> Result<Self, SimLinkError> {
        let twist = TwistMsg::deserialize(msg)
            .map_err(|e| SimLinkError::Serialization(format!("invalid Twist: {e}")))?;
        Ok(Self {
            linear: f64::from(twist.linear.x as f32),
            angular: f64::from(twist.angular.z as f32),
        })
    }
}

/// Actuation signals handed back to the simulation each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInputs {
    /// Throttle in `[0, 1]`.
    pub throttle: f64,
    /// Brake in `[0, 1]`.
    pub brake: f64,
    /// Steering in `[-1, 1]`, positive turns left.
    pub steering: f64,
}

impl DriverInputs {
    /// Full brake, zero throttle, wheels straight.
    pub fn full_stop() -> Self {
        Self {
            throttle: 0.0,
            brake: 1.0,
            steering: 0.0,
        }
    }

    /// Return a copy with every channel forced into its legal range.
    pub fn clamped(self) -> Self {
        Self {
            throttle: self.throttle.clamp(0.0, 1.0),
            brake: self.brake.clamp(0.0, 1.0),
            steering: self.steering.clamp(-1.0, 1.0),
        }
    }
}

/// Snapshot of the chassis body supplied by the simulation every tick.
///
/// Every quantity is expressed in the Simulation frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    /// Simulation time in seconds.
    pub time: f64,
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    /// Time derivative of `rotation` (not normalised).
    pub rotation_dt: Quaternion<f64>,
    pub linear_velocity: Vector3<f64>,
    /// Coordinate acceleration, gravity not included.
    pub linear_acceleration: Vector3<f64>,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            time: 0.0,
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            rotation_dt: Quaternion::new(0.0, 0.0, 0.0, 0.0),
            linear_velocity: Vector3::zeros(),
            linear_acceleration: Vector3::zeros(),
        }
    }
}

impl BodyState {
    /// Angular velocity in the Simulation frame: `2 · (q̇ ⊗ q*)`, vector part.
    pub fn angular_velocity(&self) -> Vector3<f64> {
        (self.rotation_dt * self.rotation.quaternion().conjugate()).imag() * 2.0
    }

    /// Scalar ground speed, |v|.
    pub fn speed(&self) -> f64 {
        self.linear_velocity.norm()
    }

    /// Yaw of the chassis in radians.
    pub fn heading(&self) -> f64 {
        self.rotation.euler_angles().2
    }
}

/// Error type shared by every SimLink crate.
///
/// Public operations that run on the simulation tick never surface these
/// directly; they log and collapse them into a `bool` or an outcome enum.
#[derive(Error, Debug)]
pub enum SimLinkError {
    #[error("Connection Error: {0}")]
    Connection(String),

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn velocity_command_from_twist() {
        let msg = json!({
            "linear":  { "x": 1.5, "y": 0.0, "z": 0.0 },
            "angular": { "x": 0.0, "y": 0.0, "z": -0.25 }
        });
        let cmd = VelocityCommand::from_twist(&msg).unwrap();
        assert_relative_eq!(cmd.linear, 1.5);
        assert_relative_eq!(cmd.angular, -0.25);
    }

    #[test]
    fn velocity_command_ignores_extra_components() {
        let msg = json!({ "linear": { "x": 2.0 }, "angular": { "z": 0.5 }, "extra": true });
        let cmd = VelocityCommand::from_twist(&msg).unwrap();
        assert_eq!(cmd, VelocityCommand::new(2.0, 0.5));
    }

    #[test]
    fn velocity_command_rejects_missing_fields() {
        let msg = json!({ "linear": { "y": 1.0 } });
        let err = VelocityCommand::from_twist(&msg).unwrap_err();
        assert!(matches!(err, SimLinkError::Serialization(_)));
    }

    #[test]
    fn driver_inputs_clamped() {
        let inputs = DriverInputs {
            throttle: 1.7,
            brake: -0.2,
            steering: -3.0,
        }
        .clamped();
        assert_eq!(inputs.throttle, 1.0);
        assert_eq!(inputs.brake, 0.0);
        assert_eq!(inputs.steering, -1.0);
    }

    #[test]
    fn angular_velocity_from_rotation_rate() {
        // Spinning about +Z at 0.5 rad/s from the identity: q̇ = ½ ω ⊗ q.
        let state = BodyState {
            rotation_dt: Quaternion::new(0.0, 0.0, 0.0, 0.25),
            ..BodyState::default()
        };
        let w = state.angular_velocity();
        assert_relative_eq!(w.z, 0.5, epsilon = 1e-12);
        assert_relative_eq!(w.x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn heading_is_yaw() {
        let state = BodyState {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, 1.2),
            ..BodyState::default()
        };
        assert_relative_eq!(state.heading(), 1.2, epsilon = 1e-12);
    }

    #[test]
    fn error_display() {
        let err = SimLinkError::Protocol("topic /odom not advertised".to_string());
        assert!(err.to_string().contains("Protocol Error"));
        assert!(err.to_string().contains("/odom"));
    }
}
