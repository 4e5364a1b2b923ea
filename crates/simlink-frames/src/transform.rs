//! Frame conversions between the Simulation, Bus and Render conventions.
//!
//! Every conversion is routed through the Simulation frame.  Positions use the
//! full affine map (scale, origin offset, axis flip); directions such as
//! velocities and accelerations drop the offset; rotations (Euler triples and
//! angular rates) only remap axes.
//!
//! # Example
//!
//! ```rust
//! use nalgebra::Vector3;
//! use simlink_frames::transform::{CoordinateConfig, CoordinateTransformer, Frame};
//!
//! let tf = CoordinateTransformer::new(CoordinateConfig::new(100.0, 300.0, 1.3, [2500.0, -7500.0]));
//!
//! let render = tf.from_simulation(Frame::Render, Vector3::zeros());
//! assert_eq!(render.x, 7500.0);
//! assert_eq!(render.y, 7500.0);
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Render-engine units per simulation metre.
pub const RENDER_UNITS_PER_METRE: f64 = 100.0;

// ────────────────────────────────────────────────────────────────────────────
// Frame & configuration
// ────────────────────────────────────────────────────────────────────────────

/// The three coordinate conventions SimLink converts between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    /// Physics engine frame: metres, centred on the terrain.
    Simulation,
    /// Message-bus frame: Simulation with the Y axis mirrored.
    Bus,
    /// Render-engine frame: centimetres, anchored at a terrain corner.
    Render,
}

/// Terrain extents and render-origin placement.
///
/// A zero extent is accepted and produces degenerate (but finite) output;
/// callers must fill this in before the first conversion that matters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinateConfig {
    /// Terrain width along X, metres.
    pub extent_x: f64,
    /// Terrain length along Y, metres.
    pub extent_y: f64,
    /// Height of the simulation ground plane above the render zero, metres.
    pub z_offset: f64,
    /// Render-frame position of the terrain corner, render units.
    pub origin: [f64; 2],
}

impl CoordinateConfig {
    pub fn new(extent_x: f64, extent_y: f64, z_offset: f64, origin: [f64; 2]) -> Self {
        Self {
            extent_x,
            extent_y,
            z_offset,
            origin,
        }
    }

    // ── Positions ──────────────────────────────────────────────────────────

    fn simulation_to_render(&self, p: Vector3<f64>) -> Vector3<f64> {
        let s = RENDER_UNITS_PER_METRE;
        Vector3::new(
            (p.x + self.extent_x / 2.0) * s + self.origin[0],
            self.origin[1] - (p.y - self.extent_y / 2.0) * s,
            (p.z - self.z_offset) * s,
        )
    }

    fn render_to_simulation(&self, p: Vector3<f64>) -> Vector3<f64> {
        let s = RENDER_UNITS_PER_METRE;
        Vector3::new(
            (p.x - self.origin[0]) / s - self.extent_x / 2.0,
            (self.origin[1] - p.y) / s + self.extent_y / 2.0,
            p.z / s + self.z_offset,
        )
    }

    /// Convert a position from `frame` into the Simulation frame.
    pub fn to_simulation(&self, frame: Frame, p: Vector3<f64>) -> Vector3<f64> {
        match frame {
            Frame::Simulation => p,
            Frame::Bus => mirror_y(p),
            Frame::Render => self.render_to_simulation(p),
        }
    }

    /// Convert a Simulation-frame position into `frame`.
    pub fn from_simulation(&self, frame: Frame, p: Vector3<f64>) -> Vector3<f64> {
        match frame {
            Frame::Simulation => p,
            Frame::Bus => mirror_y(p),
            Frame::Render => self.simulation_to_render(p),
        }
    }
}

fn mirror_y(v: Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, -v.y, v.z)
}

// ────────────────────────────────────────────────────────────────────────────
// Config-independent conversions
// ────────────────────────────────────────────────────────────────────────────

/// Convert a direction (velocity, acceleration, force) into the Simulation
/// frame.  No origin offset is applied.
pub fn direction_to_simulation(frame: Frame, v: Vector3<f64>) -> Vector3<f64> {
    match frame {
        Frame::Simulation => v,
        Frame::Bus => mirror_y(v),
        Frame::Render => mirror_y(v) / RENDER_UNITS_PER_METRE,
    }
}

/// Convert a Simulation-frame direction into `frame`.
pub fn direction_from_simulation(frame: Frame, v: Vector3<f64>) -> Vector3<f64> {
    match frame {
        Frame::Simulation => v,
        Frame::Bus => mirror_y(v),
        Frame::Render => mirror_y(v) * RENDER_UNITS_PER_METRE,
    }
}

/// Convert a Simulation-frame `(roll, pitch, yaw)` triple, or an angular
/// rate, into `frame`.
///
/// Render flips pitch and yaw.  Bus starts from the Render triple, swaps the
/// Y and Z components and negates the new Z, which works out to
/// `(roll, -yaw, pitch)`.
pub fn rotation_from_simulation(frame: Frame, rpy: Vector3<f64>) -> Vector3<f64> {
    match frame {
        Frame::Simulation => rpy,
        Frame::Render => Vector3::new(rpy.x, -rpy.y, -rpy.z),
        Frame::Bus => {
            let render = rotation_from_simulation(Frame::Render, rpy);
            Vector3::new(render.x, render.z, -render.y)
        }
    }
}

/// Inverse of [`rotation_from_simulation`].
pub fn rotation_to_simulation(frame: Frame, rpy: Vector3<f64>) -> Vector3<f64> {
    match frame {
        Frame::Simulation => rpy,
        Frame::Render => Vector3::new(rpy.x, -rpy.y, -rpy.z),
        Frame::Bus => {
            let render = Vector3::new(rpy.x, -rpy.z, rpy.y);
            rotation_to_simulation(Frame::Render, render)
        }
    }
}

/// Extract `(roll, pitch, yaw)` from a unit quaternion.
///
/// Pitch saturates at ±π/2 at the gimbal singularity.
pub fn euler_from_quaternion(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    let (roll, pitch, yaw) = q.euler_angles();
    Vector3::new(roll, pitch, yaw)
}

/// Compose a quaternion from `(roll, pitch, yaw)` as `q_yaw · q_pitch · q_roll`.
///
/// Non-finite input yields the identity rather than a NaN quaternion.
pub fn quaternion_from_euler(rpy: Vector3<f64>) -> UnitQuaternion<f64> {
    let q = UnitQuaternion::from_euler_angles(rpy.x, rpy.y, rpy.z);
    if q.coords.iter().all(|c| c.is_finite()) {
        q
    } else {
        UnitQuaternion::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CoordinateTransformer
// ────────────────────────────────────────────────────────────────────────────

/// Shared handle over the live [`CoordinateConfig`].
///
/// Clones share one configuration.  [`CoordinateTransformer::update`] swaps
/// the whole config atomically, so a conversion sees either the old config
/// or the new one, never a mix, and every conversion started after `update`
/// returns sees the new one.
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    config: Arc<ArcSwap<CoordinateConfig>>,
}

impl CoordinateTransformer {
    pub fn new(config: CoordinateConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Replace the configuration, e.g. once terrain extents are known.
    pub fn update(&self, config: CoordinateConfig) {
        debug!(?config, "coordinate config updated");
        self.config.store(Arc::new(config));
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> CoordinateConfig {
        **self.config.load()
    }

    pub fn to_simulation(&self, frame: Frame, p: Vector3<f64>) -> Vector3<f64> {
        self.config.load().to_simulation(frame, p)
    }

    pub fn from_simulation(&self, frame: Frame, p: Vector3<f64>) -> Vector3<f64> {
        self.config.load().from_simulation(frame, p)
    }

    /// Convert a position between any two frames.
    pub fn convert(&self, from: Frame, to: Frame, p: Vector3<f64>) -> Vector3<f64> {
        let config = self.config.load();
        config.from_simulation(to, config.to_simulation(from, p))
    }

    pub fn direction_to_simulation(&self, frame: Frame, v: Vector3<f64>) -> Vector3<f64> {
        direction_to_simulation(frame, v)
    }

    pub fn direction_from_simulation(&self, frame: Frame, v: Vector3<f64>) -> Vector3<f64> {
        direction_from_simulation(frame, v)
    }

    pub fn rotation_to_simulation(&self, frame: Frame, rpy: Vector3<f64>) -> Vector3<f64> {
        rotation_to_simulation(frame, rpy)
    }

    pub fn rotation_from_simulation(&self, frame: Frame, rpy: Vector3<f64>) -> Vector3<f64> {
        rotation_from_simulation(frame, rpy)
    }

    /// Re-express a Simulation-frame orientation as a quaternion in `frame`.
    ///
    /// The orientation is decomposed into Euler angles, remapped, and
    /// recomposed.  Transforming the quaternion directly would carry the
    /// wrong handedness into the Bus frame.
    pub fn orientation_from_simulation(
        &self,
        frame: Frame,
        q: &UnitQuaternion<f64>,
    ) -> UnitQuaternion<f64> {
        quaternion_from_euler(rotation_from_simulation(frame, euler_from_quaternion(q)))
    }
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self::new(CoordinateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn terrain() -> CoordinateConfig {
        CoordinateConfig::new(100.0, 300.0, 1.3, [2500.0, -7500.0])
    }

    fn samples() -> Vec<Vector3<f64>> {
        vec![
            Vector3::zeros(),
            Vector3::new(12.5, -3.25, 0.8),
            Vector3::new(-49.0, 149.0, -2.0),
            Vector3::new(1234.567, -987.654, 321.0),
        ]
    }

    #[test]
    fn origin_maps_to_documented_render_point() {
        let tf = CoordinateTransformer::new(terrain());
        let p = tf.from_simulation(Frame::Render, Vector3::zeros());
        // (0 + 50) * 100 + 2500
        assert_eq!(p.x, 7500.0);
        // -7500 - (0 - 150) * 100
        assert_eq!(p.y, 7500.0);
        assert_abs_diff_eq!(p.z, -130.0, epsilon = 1e-9);
    }

    #[test]
    fn render_round_trip() {
        let tf = CoordinateTransformer::new(terrain());
        for p in samples() {
            let back = tf.to_simulation(Frame::Render, tf.from_simulation(Frame::Render, p));
            assert_abs_diff_eq!(back, p, epsilon = 1e-9);
        }
    }

    #[test]
    fn bus_round_trip() {
        let tf = CoordinateTransformer::new(terrain());
        for p in samples() {
            let bus = tf.from_simulation(Frame::Bus, p);
            assert_eq!(bus.y, -p.y);
            let back = tf.to_simulation(Frame::Bus, bus);
            assert_abs_diff_eq!(back, p, epsilon = 1e-9);
        }
    }

    #[test]
    fn convert_between_render_and_bus() {
        let tf = CoordinateTransformer::new(terrain());
        let render = Vector3::new(7500.0, 7500.0, -130.0);
        let bus = tf.convert(Frame::Render, Frame::Bus, render);
        assert_abs_diff_eq!(bus, Vector3::zeros(), epsilon = 1e-9);
        let again = tf.convert(Frame::Bus, Frame::Render, bus);
        assert_abs_diff_eq!(again, render, epsilon = 1e-9);
    }

    #[test]
    fn directions_ignore_origin() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(direction_from_simulation(Frame::Bus, v), Vector3::new(1.0, -2.0, 3.0));
        assert_eq!(
            direction_from_simulation(Frame::Render, v),
            Vector3::new(100.0, -200.0, 300.0)
        );
        for frame in [Frame::Simulation, Frame::Bus, Frame::Render] {
            let back = direction_to_simulation(frame, direction_from_simulation(frame, v));
            assert_abs_diff_eq!(back, v, epsilon = 1e-12);
        }
    }

    #[test]
    fn rotation_remaps() {
        let rpy = Vector3::new(0.1, 0.2, 0.3);
        assert_eq!(
            rotation_from_simulation(Frame::Render, rpy),
            Vector3::new(0.1, -0.2, -0.3)
        );
        assert_eq!(
            rotation_from_simulation(Frame::Bus, rpy),
            Vector3::new(0.1, -0.3, 0.2)
        );
        for frame in [Frame::Simulation, Frame::Bus, Frame::Render] {
            let back = rotation_to_simulation(frame, rotation_from_simulation(frame, rpy));
            assert_abs_diff_eq!(back, rpy, epsilon = 1e-12);
        }
    }

    #[test]
    fn update_is_visible_to_every_clone() {
        let tf = CoordinateTransformer::default();
        let other = tf.clone();
        tf.update(terrain());
        assert_eq!(other.config(), terrain());
        let p = other.from_simulation(Frame::Render, Vector3::zeros());
        assert_eq!(p.x, 7500.0);
    }

    #[test]
    fn zero_extent_is_finite() {
        let tf = CoordinateTransformer::default();
        let p = tf.from_simulation(Frame::Render, Vector3::new(1.0, 2.0, 3.0));
        assert!(p.iter().all(|c| c.is_finite()));
        assert_eq!(p, Vector3::new(100.0, -200.0, 300.0));
    }

    #[test]
    fn quaternion_from_euler_round_trip() {
        let rpy = Vector3::new(0.2, -0.4, 1.1);
        let q = quaternion_from_euler(rpy);
        assert_abs_diff_eq!(euler_from_quaternion(&q), rpy, epsilon = 1e-12);
    }

    #[test]
    fn quaternion_from_non_finite_euler_is_identity() {
        let q = quaternion_from_euler(Vector3::new(f64::NAN, 0.0, 0.0));
        assert_eq!(q, UnitQuaternion::identity());
    }

    #[test]
    fn bus_orientation_of_pure_yaw() {
        let tf = CoordinateTransformer::default();
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5);
        let bus = tf.orientation_from_simulation(Frame::Bus, &q);
        // yaw 0.5 in Simulation becomes (0, -0.5, 0) in the Bus triple.
        assert_abs_diff_eq!(euler_from_quaternion(&bus), Vector3::new(0.0, -0.5, 0.0), epsilon = 1e-12);
    }
}
