//! `simlink-runtime` – wiring SimLink into a host simulation.
//!
//! # Modules
//!
//! - [`bridge`] – [`SimulationBridge`][bridge::SimulationBridge]: owns the
//!   driver, sensor publisher, telemetry stream and bus connection, and runs
//!   them in order once per tick against a [`SimulationHost`][bridge::SimulationHost].
//! - [`config`] – [`BridgeConfig`][config::BridgeConfig]: TOML configuration
//!   with `SIMLINK_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod bridge;
pub mod config;
pub mod telemetry;

pub use bridge::{SimulationBridge, SimulationHost};
pub use config::{BridgeConfig, BusConfig, StreamConfig};
pub use telemetry::{LogFormat, LoggingConfig, TracerProviderGuard, init_tracing};
