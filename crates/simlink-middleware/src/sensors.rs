//! Odometry and IMU publishing.
//!
//! [`SensorPublisher`] samples the body state on simulation time and publishes
//! `nav_msgs/Odometry` and `sensor_msgs/Imu` messages over a shared
//! [`RosbridgeClient`].  All quantities are converted from the Simulation
//! frame to the Bus frame before they leave the process.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use simlink_frames::{CoordinateTransformer, Frame};
use simlink_types::BodyState;
use tracing::{debug, info, warn};

use crate::rosbridge::RosbridgeClient;

const ODOMETRY_TYPE: &str = "nav_msgs/Odometry";
const IMU_TYPE: &str = "sensor_msgs/Imu";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Samples per simulated second.
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,
    #[serde(default = "default_odom_topic")]
    pub odom_topic: String,
    #[serde(default = "default_imu_topic")]
    pub imu_topic: String,
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
    #[serde(default = "default_child_frame_id")]
    pub child_frame_id: String,
    /// Pause after each advertise so the server registers the topic before
    /// the first publish arrives.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Gravitational acceleration folded into the IMU reading, m/s².
    #[serde(default = "default_gravity")]
    pub gravity: f64,
}

fn default_rate_hz() -> f64 {
    50.0
}
fn default_odom_topic() -> String {
    "/robot0/odom".to_string()
}
fn default_imu_topic() -> String {
    "/robot0/imu".to_string()
}
fn default_frame_id() -> String {
    "ouster".to_string()
}
fn default_child_frame_id() -> String {
    "base_link".to_string()
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_gravity() -> f64 {
    9.81
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            odom_topic: default_odom_topic(),
            imu_topic: default_imu_topic(),
            frame_id: default_frame_id(),
            child_frame_id: default_child_frame_id(),
            settle_delay_ms: default_settle_delay_ms(),
            gravity: default_gravity(),
        }
    }
}

pub struct SensorPublisher {
    client: Arc<RosbridgeClient>,
    transformer: CoordinateTransformer,
    config: SensorConfig,
    interval: f64,
    last_sample: Option<f64>,
    initialized: bool,
    /// Wall-clock instant before which a deferred initialisation keeps
    /// [`update`][SensorPublisher::update] silent.
    ready_at: Option<Instant>,
}

impl SensorPublisher {
    pub fn new(
        client: Arc<RosbridgeClient>,
        transformer: CoordinateTransformer,
        config: SensorConfig,
    ) -> Self {
        let interval = if config.rate_hz > 0.0 {
            1.0 / config.rate_hz
        } else {
            warn!(rate_hz = config.rate_hz, "non-positive sensor rate; sampling every tick");
            0.0
        };
        Self {
            client,
            transformer,
            config,
            interval,
            last_sample: None,
            initialized: false,
            ready_at: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Advertise the odometry and IMU topics, sleeping for the settle delay
    /// after each.
    ///
    /// Returns `false` if either advertise fails; [`update`][Self::update]
    /// stays inert until this succeeds.  Only call this before the tick loop
    /// starts; use [`initialize_deferred`][Self::initialize_deferred] from
    /// inside it.
    pub fn initialize(&mut self) -> bool {
        self.advertise_topics(true)
    }

    /// Advertise both topics without sleeping.
    ///
    /// [`update`][Self::update] stays silent until the combined settle delay
    /// has passed on the wall clock.
    pub fn initialize_deferred(&mut self) -> bool {
        self.advertise_topics(false)
    }

    fn advertise_topics(&mut self, block: bool) -> bool {
        let settle = Duration::from_millis(self.config.settle_delay_ms);
        for (topic, msg_type) in [
            (&self.config.odom_topic, ODOMETRY_TYPE),
            (&self.config.imu_topic, IMU_TYPE),
        ] {
            if !self.client.advertise(topic, msg_type) {
                warn!(%topic, "sensor topic not advertised");
                return false;
            }
            if block && !settle.is_zero() {
                thread::sleep(settle);
            }
        }
        self.ready_at = if block || settle.is_zero() {
            None
        } else {
            Some(Instant::now() + settle * 2)
        };
        self.initialized = true;
        info!(
            odom = %self.config.odom_topic,
            imu = %self.config.imu_topic,
            rate_hz = self.config.rate_hz,
            "sensor topics advertised"
        );
        true
    }

    /// Publish one odometry and one IMU sample if the sampling interval has
    /// elapsed since the previous sample.
    ///
    /// Returns whether a sample was taken.  The first call after
    /// initialisation always samples.
    pub fn update(&mut self, time: f64, state: &BodyState) -> bool {
        if !self.initialized || !self.client.is_connected() {
            return false;
        }
        if let Some(ready_at) = self.ready_at {
            if Instant::now() < ready_at {
                return false;
            }
            self.ready_at = None;
        }
        if let Some(last) = self.last_sample
            && time - last < self.interval
        {
            return false;
        }
        self.last_sample = Some(time);

        let odom = self.client.publish(
            &self.config.odom_topic,
            ODOMETRY_TYPE,
            self.odometry_message(time, state),
        );
        let imu = self
            .client
            .publish(&self.config.imu_topic, IMU_TYPE, self.imu_message(time, state));
        if !(odom && imu) {
            debug!(time, odom, imu, "sensor sample not fully published");
        }
        true
    }

    pub fn odometry_message(&self, time: f64, state: &BodyState) -> Value {
        let position = self.transformer.from_simulation(Frame::Bus, state.position);
        let orientation = self
            .transformer
            .orientation_from_simulation(Frame::Bus, &state.rotation);
        let linear = self
            .transformer
            .direction_from_simulation(Frame::Bus, state.linear_velocity);
        let angular = self
            .transformer
            .rotation_from_simulation(Frame::Bus, state.angular_velocity());
        let q = orientation.quaternion();
        let covariance = vec![0.0; 36];

        json!({
            "header": self.header(time),
            "child_frame_id": self.config.child_frame_id,
            "pose": {
                "pose": {
                    "position": vector(&position),
                    "orientation": { "x": q.i, "y": q.j, "z": q.k, "w": q.w }
                },
                "covariance": covariance
            },
            "twist": {
                "twist": {
                    "linear": vector(&linear),
                    "angular": vector(&angular)
                },
                "covariance": covariance
            }
        })
    }

    /// IMU sample in the body frame.
    ///
    /// The accelerometer reports specific force, so gravity rotated into the
    /// body frame is added to the coordinate acceleration.  Orientation is
    /// not estimated and always reads identity.
    pub fn imu_message(&self, time: f64, state: &BodyState) -> Value {
        let gravity = Vector3::new(0.0, 0.0, self.config.gravity);
        let specific_force =
            state.linear_acceleration + state.rotation.inverse_transform_vector(&gravity);
        let acceleration = self
            .transformer
            .direction_from_simulation(Frame::Bus, specific_force);
        let angular = self
            .transformer
            .rotation_from_simulation(Frame::Bus, state.angular_velocity());
        let covariance = vec![0.0; 9];

        json!({
            "header": self.header(time),
            "orientation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 },
            "orientation_covariance": covariance,
            "angular_velocity": vector(&angular),
            "angular_velocity_covariance": covariance,
            "linear_acceleration": vector(&acceleration),
            "linear_acceleration_covariance": covariance
        })
    }

    fn header(&self, time: f64) -> Value {
        let sec = time.trunc();
        let nanosec = ((time - sec) * 1e9).round().clamp(0.0, 999_999_999.0);
        json!({
            "stamp": { "sec": sec as i32, "nanosec": nanosec as u32 },
            "frame_id": self.config.frame_id
        })
    }
}

fn vector(v: &Vector3<f64>) -> Value {
    json!({ "x": v.x, "y": v.y, "z": v.z })
}
