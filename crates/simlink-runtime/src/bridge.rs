//! Per-tick orchestration of the driver, sensors and telemetry stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use simlink_control::{ClosedLoopDriver, CommandHandle, VehicleGeometry};
use simlink_frames::{CoordinateConfig, CoordinateTransformer};
use simlink_middleware::{RosbridgeClient, SendOutcome, SensorPublisher, TelemetryStreamServer};
use simlink_types::{BodyState, DriverInputs};
use tracing::{debug_span, error, info, instrument, warn};

use crate::config::{BridgeConfig, BusConfig};

/// What a physics engine must expose to be driven by [`SimulationBridge`].
///
/// All state is reported in the Simulation frame.
pub trait SimulationHost: VehicleGeometry {
    fn body_state(&self) -> BodyState;
    /// Hand the actuation for the coming step to the vehicle.
    fn apply(&mut self, inputs: DriverInputs);
    /// Advance physics by `step` seconds.
    fn advance(&mut self, step: f64);
}

pub struct SimulationBridge {
    client: Arc<RosbridgeClient>,
    transformer: CoordinateTransformer,
    driver: ClosedLoopDriver,
    sensors: SensorPublisher,
    stream: Option<TelemetryStreamServer>,
    bus: BusConfig,
    entity_id: i32,
    subscribed: bool,
}

impl SimulationBridge {
    /// Bind the telemetry stream, connect to the bus, and wire the velocity
    /// command subscription and sensor topics.
    ///
    /// Neither transport is required: an unreachable bus or an unbindable
    /// stream port is logged and the bridge runs without it.  A bus that
    /// comes up after the connect timeout is wired on the first tick that
    /// sees it connected, without the blocking settle delay.
    #[instrument(name = "bridge_start", skip_all, fields(uri = %config.bus.uri))]
    pub fn start(config: &BridgeConfig, geometry: &dyn VehicleGeometry) -> Self {
        let transformer = CoordinateTransformer::new(config.coordinates);
        let client = Arc::new(RosbridgeClient::new());
        let driver = ClosedLoopDriver::new(config.driver).with_geometry(geometry);
        let sensors = SensorPublisher::new(
            Arc::clone(&client),
            transformer.clone(),
            config.sensors.clone(),
        );

        let stream = if config.stream.enabled {
            match TelemetryStreamServer::bind(
                config.stream_address(),
                transformer.clone(),
                config.stream.byte_order,
            ) {
                Ok(server) => Some(server),
                Err(e) => {
                    error!(addr = %config.stream_address(), error = %e, "telemetry stream disabled");
                    None
                }
            }
        } else {
            None
        };

        let mut bridge = Self {
            client,
            transformer,
            driver,
            sensors,
            stream,
            bus: config.bus.clone(),
            entity_id: config.stream.entity_id,
            subscribed: false,
        };

        if bridge.client.connect(&bridge.bus.uri) {
            let timeout = Duration::from_millis(bridge.bus.connect_timeout_ms);
            if !bridge.client.wait_for_connection(timeout) {
                warn!(uri = %bridge.bus.uri, "rosbridge not reachable; running without bus");
            }
        }
        bridge.wire_bus(true);
        bridge
    }

    /// Subscribe the driver and advertise sensor topics once the bus is up.
    ///
    /// With `blocking` false the sensor settle delay is enforced by gating
    /// publishes instead of sleeping.
    fn wire_bus(&mut self, blocking: bool) {
        if !self.client.is_connected() {
            return;
        }
        if !self.subscribed {
            let handler = self.driver.command_handle().twist_handler();
            self.subscribed =
                self.client
                    .subscribe(&self.bus.cmd_vel_topic, &self.bus.cmd_vel_type, handler);
        }
        if self.sensors.is_initialized() {
            return;
        }
        let advertised = if blocking {
            self.sensors.initialize()
        } else {
            self.sensors.initialize_deferred()
        };
        if advertised {
            info!(uri = %self.bus.uri, "bus wiring complete");
        }
    }

    /// Run one simulation step: actuate, advance, then report the new state.
    pub fn tick(&mut self, host: &mut dyn SimulationHost, step: f64) -> DriverInputs {
        let state = host.body_state();
        let _tick = debug_span!("tick", time = state.time).entered();
        if !(self.subscribed && self.sensors.is_initialized()) {
            self.wire_bus(false);
        }

        let inputs = self.driver.synchronize(state.time, &state);
        host.apply(inputs);
        host.advance(step);

        let state = host.body_state();
        self.sensors.update(state.time, &state);
        if let Some(stream) = self.stream.as_mut()
            && stream.send(self.entity_id, &state.position, &state.rotation)
                == SendOutcome::Disconnected
        {
            info!("telemetry consumer left; waiting for the next one");
        }
        inputs
    }

    /// Install new terrain extents; takes effect for every later conversion.
    pub fn update_coordinates(&self, config: CoordinateConfig) {
        self.transformer.update(config);
    }

    pub fn transformer(&self) -> &CoordinateTransformer {
        &self.transformer
    }

    pub fn command_handle(&self) -> CommandHandle {
        self.driver.command_handle()
    }

    pub fn bus(&self) -> &RosbridgeClient {
        &self.client
    }

    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Close the bus connection, waiting for its receive thread.
    pub fn shutdown(self) {
        self.client.disconnect();
        info!("simulation bridge stopped");
    }
}
