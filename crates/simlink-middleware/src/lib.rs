//! `simlink-middleware` – the wires between the simulation and the outside.
//!
//! Two transports leave the process:
//!
//! - a rosbridge JSON connection to the robotics message bus, carrying
//!   velocity commands in and odometry / IMU samples out;
//! - a binary TCP stream of body poses for render-engine consumers.
//!
//! # Modules
//!
//! - [`protocol`] – [`BusMessage`][protocol::BusMessage]: the rosbridge
//!   operations as a serde-tagged enum.
//! - [`rosbridge`] – [`RosbridgeClient`][rosbridge::RosbridgeClient]:
//!   synchronous pub/sub facade over a WebSocket driven from its own thread.
//! - [`sensors`] – [`SensorPublisher`][sensors::SensorPublisher]:
//!   rate-limited odometry and IMU publishing in Bus-frame coordinates.
//! - [`packet`] – fixed-layout binary frames for the telemetry stream.
//! - [`telemetry_stream`] – [`TelemetryStreamServer`][telemetry_stream::TelemetryStreamServer]:
//!   single-consumer, never-blocking TCP pose stream.

pub mod packet;
pub mod protocol;
pub mod rosbridge;
pub mod sensors;
pub mod telemetry_stream;

pub use packet::{ByteOrder, PacketType, TelemetryFrame};
pub use protocol::BusMessage;
pub use rosbridge::{MessageHandler, RosbridgeClient, ServiceReply};
pub use sensors::{SensorConfig, SensorPublisher};
pub use telemetry_stream::{SendOutcome, TelemetryStreamServer};
