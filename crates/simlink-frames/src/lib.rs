//! `simlink-frames` – coordinate-frame reconciliation.
//!
//! Three conventions meet in SimLink and none of them agree:
//!
//! | Frame | Units | Origin | Notes |
//! |---|---|---|---|
//! | [`Frame::Simulation`] | metres | terrain centre | right-handed, Z up |
//! | [`Frame::Bus`] | metres | terrain centre | Y mirrored |
//! | [`Frame::Render`] | centimetres | configurable terrain corner | Y grows "down" the map |
//!
//! # Modules
//!
//! - [`transform`] – [`CoordinateTransformer`][transform::CoordinateTransformer]:
//!   a shared handle over the live [`CoordinateConfig`][transform::CoordinateConfig]
//!   that converts positions, directions and rotations between frames.

pub mod transform;

pub use transform::{CoordinateConfig, CoordinateTransformer, Frame};
