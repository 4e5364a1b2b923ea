//! Binary framing for the telemetry stream.
//!
//! Each frame is a packed 21-byte header followed by a type-specific payload:
//!
//! ```text
//! offset  size  field
//!      0     1  packet type
//!      1     4  entity id      (i32)
//!      5     4  sequence       (u32)
//!      9     4  payload size   (u32)
//!     13     8  timestamp, ns  (u64)
//!     21     n  payload
//! ```
//!
//! Multi-byte fields use the configured [`ByteOrder`], little-endian unless
//! told otherwise.  A pose payload is six `f32`: position then roll, pitch,
//! yaw, all already converted to the Render frame.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use simlink_types::SimLinkError;

pub const HEADER_LEN: usize = 21;
pub const POSE_LEN: usize = 24;
pub const CREATE_UNIT_LEN: usize = 4 + POSE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Twist = 0,
    CreateUnit = 1,
    UpdateUnitPosition = 2,
    DeleteUnit = 3,
}

impl TryFrom<u8> for PacketType {
    type Error = SimLinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Twist),
            1 => Ok(PacketType::CreateUnit),
            2 => Ok(PacketType::UpdateUnitPosition),
            3 => Ok(PacketType::DeleteUnit),
            other => Err(SimLinkError::Protocol(format!("unknown packet type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Position and orientation in Render-frame units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Twist(Pose),
    CreateUnit { unit_type: i32, pose: Pose },
    UpdateUnitPosition(Pose),
    DeleteUnit,
}

impl Payload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::Twist(_) => PacketType::Twist,
            Payload::CreateUnit { .. } => PacketType::CreateUnit,
            Payload::UpdateUnitPosition(_) => PacketType::UpdateUnitPosition,
            Payload::DeleteUnit => PacketType::DeleteUnit,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Twist(_) | Payload::UpdateUnitPosition(_) => POSE_LEN,
            Payload::CreateUnit { .. } => CREATE_UNIT_LEN,
            Payload::DeleteUnit => 0,
        }
    }
}

/// One frame on the telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub entity_id: i32,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub payload: Payload,
}

impl TelemetryFrame {
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.encoded_len()
    }

    pub fn encode(&self, order: ByteOrder, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        let mut w = Writer { buf, order };
        w.buf.put_u8(self.payload.packet_type() as u8);
        w.i32(self.entity_id);
        w.u32(self.sequence);
        w.u32(self.payload.encoded_len() as u32);
        w.u64(self.timestamp_ns);
        match self.payload {
            Payload::Twist(pose) | Payload::UpdateUnitPosition(pose) => w.pose(&pose),
            Payload::CreateUnit { unit_type, pose } => {
                w.i32(unit_type);
                w.pose(&pose);
            }
            Payload::DeleteUnit => {}
        }
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
    /// incomplete; on success the frame's bytes are consumed.
    pub fn decode(order: ByteOrder, buf: &mut BytesMut) -> Result<Option<Self>, SimLinkError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &buf[..HEADER_LEN];
        let packet_type = PacketType::try_from(header.get_u8())?;
        let mut r = Reader {
            buf: &mut header,
            order,
        };
        let entity_id = r.i32();
        let sequence = r.u32();
        let payload_size = r.u32() as usize;
        let timestamp_ns = r.u64();

        let expected = match packet_type {
            PacketType::Twist | PacketType::UpdateUnitPosition => POSE_LEN,
            PacketType::CreateUnit => CREATE_UNIT_LEN,
            PacketType::DeleteUnit => 0,
        };
        if payload_size != expected {
            return Err(SimLinkError::Protocol(format!(
                "{packet_type:?} payload is {payload_size} bytes, expected {expected}"
            )));
        }
        if buf.len() < HEADER_LEN + payload_size {
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let body = buf.split_to(payload_size);
        let mut body = &body[..];
        let mut r = Reader {
            buf: &mut body,
            order,
        };
        let payload = match packet_type {
            PacketType::Twist => Payload::Twist(r.pose()),
            PacketType::UpdateUnitPosition => Payload::UpdateUnitPosition(r.pose()),
            PacketType::CreateUnit => Payload::CreateUnit {
                unit_type: r.i32(),
                pose: r.pose(),
            },
            PacketType::DeleteUnit => Payload::DeleteUnit,
        };

        Ok(Some(Self {
            entity_id,
            sequence,
            timestamp_ns,
            payload,
        }))
    }
}

// ---------------------------------------------------------------------------
// Endian-aware field access
// ---------------------------------------------------------------------------

struct Writer<'a> {
    buf: &'a mut BytesMut,
    order: ByteOrder,
}

impl Writer<'_> {
    fn i32(&mut self, v: i32) {
        match self.order {
            ByteOrder::Little => self.buf.put_i32_le(v),
            ByteOrder::Big => self.buf.put_i32(v),
        }
    }

    fn u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::Little => self.buf.put_u32_le(v),
            ByteOrder::Big => self.buf.put_u32(v),
        }
    }

    fn u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::Little => self.buf.put_u64_le(v),
            ByteOrder::Big => self.buf.put_u64(v),
        }
    }

    fn f32(&mut self, v: f32) {
        match self.order {
            ByteOrder::Little => self.buf.put_f32_le(v),
            ByteOrder::Big => self.buf.put_f32(v),
        }
    }

    fn pose(&mut self, pose: &Pose) {
        for v in [pose.x, pose.y, pose.z, pose.roll, pose.pitch, pose.yaw] {
            self.f32(v);
        }
    }
}

struct Reader<'a, 'b> {
    buf: &'a mut &'b [u8],
    order: ByteOrder,
}

impl Reader<'_, '_> {
    fn i32(&mut self) -> i32 {
        match self.order {
            ByteOrder::Little => self.buf.get_i32_le(),
            ByteOrder::Big => self.buf.get_i32(),
        }
    }

    fn u32(&mut self) -> u32 {
        match self.order {
            ByteOrder::Little => self.buf.get_u32_le(),
            ByteOrder::Big => self.buf.get_u32(),
        }
    }

    fn u64(&mut self) -> u64 {
        match self.order {
            ByteOrder::Little => self.buf.get_u64_le(),
            ByteOrder::Big => self.buf.get_u64(),
        }
    }

    fn f32(&mut self) -> f32 {
        match self.order {
            ByteOrder::Little => self.buf.get_f32_le(),
            ByteOrder::Big => self.buf.get_f32(),
        }
    }

    fn pose(&mut self) -> Pose {
        Pose {
            x: self.f32(),
            y: self.f32(),
            z: self.f32(),
            roll: self.f32(),
            pitch: self.f32(),
            yaw: self.f32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pose() -> Pose {
        Pose {
            x: 7500.0,
            y: 7500.0,
            z: -130.0,
            roll: 0.1,
            pitch: -0.2,
            yaw: 1.5,
        }
    }

    fn update_frame() -> TelemetryFrame {
        TelemetryFrame {
            entity_id: 7,
            sequence: 42,
            timestamp_ns: 1_700_000_000_123_456_789,
            payload: Payload::UpdateUnitPosition(sample_pose()),
        }
    }

    #[test]
    fn little_endian_layout() {
        let mut buf = BytesMut::new();
        update_frame().encode(ByteOrder::Little, &mut buf);

        assert_eq!(buf.len(), HEADER_LEN + POSE_LEN);
        assert_eq!(buf[0], PacketType::UpdateUnitPosition as u8);
        assert_eq!(&buf[1..5], &7i32.to_le_bytes());
        assert_eq!(&buf[5..9], &42u32.to_le_bytes());
        assert_eq!(&buf[9..13], &24u32.to_le_bytes());
        assert_eq!(&buf[13..21], &1_700_000_000_123_456_789u64.to_le_bytes());
        assert_eq!(&buf[21..25], &7500.0f32.to_le_bytes());
        assert_eq!(&buf[41..45], &1.5f32.to_le_bytes());
    }

    #[test]
    fn big_endian_layout() {
        let mut buf = BytesMut::new();
        update_frame().encode(ByteOrder::Big, &mut buf);
        assert_eq!(&buf[5..9], &42u32.to_be_bytes());
        assert_eq!(&buf[29..33], &(-130.0f32).to_be_bytes());
    }

    #[test]
    fn create_and_delete_sizes() {
        let create = TelemetryFrame {
            payload: Payload::CreateUnit {
                unit_type: 3,
                pose: sample_pose(),
            },
            ..update_frame()
        };
        let delete = TelemetryFrame {
            payload: Payload::DeleteUnit,
            ..update_frame()
        };

        let mut buf = BytesMut::new();
        create.encode(ByteOrder::Little, &mut buf);
        assert_eq!(buf.len(), HEADER_LEN + CREATE_UNIT_LEN);
        assert_eq!(&buf[9..13], &28u32.to_le_bytes());
        assert_eq!(&buf[21..25], &3i32.to_le_bytes());

        buf.clear();
        delete.encode(ByteOrder::Little, &mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[9..13], &0u32.to_le_bytes());
    }

    #[test]
    fn decode_consumes_back_to_back_frames() {
        let first = update_frame();
        let second = TelemetryFrame {
            sequence: 43,
            payload: Payload::DeleteUnit,
            ..first
        };
        let mut buf = BytesMut::new();
        first.encode(ByteOrder::Big, &mut buf);
        second.encode(ByteOrder::Big, &mut buf);

        assert_eq!(TelemetryFrame::decode(ByteOrder::Big, &mut buf).unwrap(), Some(first));
        assert_eq!(TelemetryFrame::decode(ByteOrder::Big, &mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut full = BytesMut::new();
        update_frame().encode(ByteOrder::Little, &mut full);

        let mut partial = BytesMut::from(&full[..HEADER_LEN + 10]);
        assert_eq!(TelemetryFrame::decode(ByteOrder::Little, &mut partial).unwrap(), None);
        assert_eq!(partial.len(), HEADER_LEN + 10);

        let mut header_only = BytesMut::from(&full[..5]);
        assert_eq!(TelemetryFrame::decode(ByteOrder::Little, &mut header_only).unwrap(), None);
    }

    #[test]
    fn decode_rejects_unknown_type_and_bad_size() {
        let mut buf = BytesMut::new();
        update_frame().encode(ByteOrder::Little, &mut buf);

        let mut bad_type = buf.clone();
        bad_type[0] = 9;
        assert!(TelemetryFrame::decode(ByteOrder::Little, &mut bad_type).is_err());

        let mut bad_size = buf.clone();
        bad_size[9..13].copy_from_slice(&12u32.to_le_bytes());
        assert!(TelemetryFrame::decode(ByteOrder::Little, &mut bad_size).is_err());
    }

    #[test]
    fn byte_order_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            order: ByteOrder,
        }
        let w: Wrapper = serde_json::from_str(r#"{"order":"big"}"#).unwrap();
        assert_eq!(w.order, ByteOrder::Big);
        assert_eq!(ByteOrder::default(), ByteOrder::Little);
    }
}
