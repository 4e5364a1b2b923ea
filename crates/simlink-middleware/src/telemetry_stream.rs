//! Binary TCP telemetry stream for render-engine consumers.
//!
//! [`TelemetryStreamServer`] owns a non-blocking listener and serves at most
//! one consumer at a time.  Every call to a send method first polls for a new
//! consumer, so the simulation never waits for one to show up.  Frames are
//! written without blocking; if the kernel buffer is full the frame is dropped
//! rather than stalling the tick.
//!
//! Sequence numbers start at 0 for every newly accepted consumer and advance
//! once per attempted send, so gaps on the consumer side reveal drops.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use bytes::BytesMut;
use chrono::Utc;
use nalgebra::{UnitQuaternion, Vector3};
use simlink_frames::transform::euler_from_quaternion;
use simlink_frames::{CoordinateTransformer, Frame};
use simlink_types::SimLinkError;
use tracing::{debug, info, warn};

use crate::packet::{ByteOrder, Payload, Pose, TelemetryFrame};

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the socket in full.
    Sent,
    /// Not (fully) written because the socket would block.
    Dropped,
    /// No consumer attached; nothing was encoded.
    NoClient,
    /// The consumer went away; the server is listening again.
    Disconnected,
}

struct ClientSession {
    stream: TcpStream,
    peer: SocketAddr,
    sequence: u32,
    /// Bytes of a partially written frame still owed to the consumer.
    backlog: Vec<u8>,
}

pub struct TelemetryStreamServer {
    listener: TcpListener,
    client: Option<ClientSession>,
    transformer: CoordinateTransformer,
    byte_order: ByteOrder,
    buf: BytesMut,
}

impl TelemetryStreamServer {
    /// Bind the listener.  Fails only if the address cannot be bound.
    pub fn bind(
        addr: impl ToSocketAddrs,
        transformer: CoordinateTransformer,
        byte_order: ByteOrder,
    ) -> Result<Self, SimLinkError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, ?byte_order, "telemetry stream listening");
        Ok(Self {
            listener,
            client: None,
            transformer,
            byte_order,
            buf: BytesMut::with_capacity(64),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SimLinkError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Sequence number the next frame to the current consumer will carry.
    pub fn next_sequence(&self) -> Option<u32> {
        self.client.as_ref().map(|c| c.sequence)
    }

    /// Stream the body pose of `entity_id` as an `UpdateUnitPosition` frame.
    ///
    /// `position` and `rotation` are in the Simulation frame.
    pub fn send(
        &mut self,
        entity_id: i32,
        position: &Vector3<f64>,
        rotation: &UnitQuaternion<f64>,
    ) -> SendOutcome {
        let pose = self.render_pose(position, rotation);
        self.send_payload(entity_id, Payload::UpdateUnitPosition(pose))
    }

    /// Announce a new unit to the consumer.
    pub fn create_unit(
        &mut self,
        entity_id: i32,
        unit_type: i32,
        position: &Vector3<f64>,
        rotation: &UnitQuaternion<f64>,
    ) -> SendOutcome {
        let pose = self.render_pose(position, rotation);
        self.send_payload(entity_id, Payload::CreateUnit { unit_type, pose })
    }

    pub fn delete_unit(&mut self, entity_id: i32) -> SendOutcome {
        self.send_payload(entity_id, Payload::DeleteUnit)
    }

    fn render_pose(&self, position: &Vector3<f64>, rotation: &UnitQuaternion<f64>) -> Pose {
        let p = self.transformer.from_simulation(Frame::Render, *position);
        let r = self
            .transformer
            .rotation_from_simulation(Frame::Render, euler_from_quaternion(rotation));
        Pose {
            x: p.x as f32,
            y: p.y as f32,
            z: p.z as f32,
            roll: r.x as f32,
            pitch: r.y as f32,
            yaw: r.z as f32,
        }
    }

    fn send_payload(&mut self, entity_id: i32, payload: Payload) -> SendOutcome {
        self.poll_accept();
        let Some(session) = self.client.as_mut() else {
            return SendOutcome::NoClient;
        };

        let sequence = session.sequence;
        session.sequence = session.sequence.wrapping_add(1);

        let frame = TelemetryFrame {
            entity_id,
            sequence,
            timestamp_ns: Utc::now()
                .timestamp_nanos_opt()
                .map_or(0, |ns| ns.max(0) as u64),
            payload,
        };
        self.buf.clear();
        frame.encode(self.byte_order, &mut self.buf);

        match session.write_frame(&self.buf) {
            Ok(outcome) => {
                if outcome == SendOutcome::Dropped {
                    debug!(sequence, "telemetry frame dropped");
                }
                outcome
            }
            Err(e) => {
                info!(peer = %session.peer, error = %e, "telemetry consumer disconnected");
                self.client = None;
                SendOutcome::Disconnected
            }
        }
    }

    fn poll_accept(&mut self) {
        if self.client.is_some() {
            return;
        }
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!(%peer, error = %e, "rejecting telemetry consumer");
                    return;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "TCP_NODELAY not set");
                }
                info!(%peer, "telemetry consumer connected");
                self.client = Some(ClientSession {
                    stream,
                    peer,
                    sequence: 0,
                    backlog: Vec::new(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "telemetry accept failed"),
        }
    }
}

impl ClientSession {
    /// Write one encoded frame without blocking.
    ///
    /// A partially written frame leaves its tail in `backlog`; the tail goes
    /// out before anything else so the consumer never sees a torn frame.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<SendOutcome> {
        if !self.backlog.is_empty() {
            let written = write_some(&mut self.stream, &self.backlog)?;
            self.backlog.drain(..written);
            if !self.backlog.is_empty() {
                return Ok(SendOutcome::Dropped);
            }
        }

        let written = write_some(&mut self.stream, frame)?;
        if written == frame.len() {
            Ok(SendOutcome::Sent)
        } else {
            if written > 0 {
                self.backlog.extend_from_slice(&frame[written..]);
            }
            Ok(SendOutcome::Dropped)
        }
    }
}

/// Single non-blocking write; "would block" counts as zero bytes written.
fn write_some(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<usize> {
    match stream.write(bytes) {
        Ok(0) if !bytes.is_empty() => Err(io::ErrorKind::WriteZero.into()),
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{HEADER_LEN, POSE_LEN};
    use approx::assert_abs_diff_eq;
    use simlink_frames::CoordinateConfig;
    use std::io::Read;
    use std::time::Duration;

    fn server() -> TelemetryStreamServer {
        let transformer = CoordinateTransformer::new(CoordinateConfig::new(
            100.0,
            300.0,
            2.83,
            [2500.0, -7500.0],
        ));
        TelemetryStreamServer::bind("127.0.0.1:0", transformer, ByteOrder::Little).unwrap()
    }

    fn consumer(server: &TelemetryStreamServer) -> TcpStream {
        let stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<TelemetryFrame> {
        let mut raw = vec![0u8; count * (HEADER_LEN + POSE_LEN)];
        stream.read_exact(&mut raw).unwrap();
        let mut buf = BytesMut::from(&raw[..]);
        (0..count)
            .map(|_| TelemetryFrame::decode(ByteOrder::Little, &mut buf).unwrap().unwrap())
            .collect()
    }

    /// Keep sending until the server notices the consumer is gone.
    fn send_until_disconnected(server: &mut TelemetryStreamServer) {
        for _ in 0..200 {
            let outcome = server.send(1, &Vector3::zeros(), &UnitQuaternion::identity());
            if outcome == SendOutcome::Disconnected {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("server never noticed the consumer leaving");
    }

    #[test]
    fn no_client_sends_nothing() {
        let mut server = server();
        let outcome = server.send(1, &Vector3::zeros(), &UnitQuaternion::identity());
        assert_eq!(outcome, SendOutcome::NoClient);
        assert!(!server.has_client());
        assert_eq!(server.next_sequence(), None);
    }

    #[test]
    fn frames_carry_render_pose_and_consecutive_sequence() {
        let mut server = server();
        let mut stream = consumer(&server);

        let position = Vector3::new(0.0, 0.0, 4.13);
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5);
        for _ in 0..5 {
            assert_eq!(server.send(9, &position, &rotation), SendOutcome::Sent);
        }

        let frames = read_frames(&mut stream, 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, i as u32);
            assert_eq!(frame.entity_id, 9);
            assert!(frame.timestamp_ns > 0);
        }
        let Payload::UpdateUnitPosition(pose) = frames[0].payload else {
            panic!("unexpected payload {:?}", frames[0].payload);
        };
        assert_abs_diff_eq!(pose.x, 7500.0, epsilon = 1e-2);
        assert_abs_diff_eq!(pose.y, 7500.0, epsilon = 1e-2);
        assert_abs_diff_eq!(pose.z, 130.0, epsilon = 1e-2);
        assert_abs_diff_eq!(pose.yaw, -0.5, epsilon = 1e-5);
    }

    #[test]
    fn reconnect_restarts_sequence() {
        let mut server = server();
        let mut first = consumer(&server);
        for _ in 0..3 {
            server.send(1, &Vector3::zeros(), &UnitQuaternion::identity());
        }
        assert_eq!(read_frames(&mut first, 3)[2].sequence, 2);
        drop(first);

        send_until_disconnected(&mut server);
        assert!(!server.has_client());

        let mut second = consumer(&server);
        assert_eq!(
            server.send(1, &Vector3::zeros(), &UnitQuaternion::identity()),
            SendOutcome::Sent
        );
        assert_eq!(read_frames(&mut second, 1)[0].sequence, 0);
    }

    #[test]
    fn create_and_delete_frames() {
        let mut server = server();
        let mut stream = consumer(&server);

        assert_eq!(
            server.create_unit(4, 2, &Vector3::zeros(), &UnitQuaternion::identity()),
            SendOutcome::Sent
        );
        assert_eq!(server.delete_unit(4), SendOutcome::Sent);

        let mut raw = vec![0u8; 2 * HEADER_LEN + 28];
        stream.read_exact(&mut raw).unwrap();
        let mut buf = BytesMut::from(&raw[..]);
        let create = TelemetryFrame::decode(ByteOrder::Little, &mut buf).unwrap().unwrap();
        let delete = TelemetryFrame::decode(ByteOrder::Little, &mut buf).unwrap().unwrap();
        assert!(matches!(create.payload, Payload::CreateUnit { unit_type: 2, .. }));
        assert_eq!(delete.payload, Payload::DeleteUnit);
        assert_eq!(delete.sequence, 1);
    }

    #[test]
    fn stalled_consumer_drops_frames_but_keeps_counting() {
        let mut server = server();
        let _stalled = consumer(&server);

        let mut attempts: u32 = 0;
        let mut dropped = false;
        while attempts < 2_000_000 {
            let outcome = server.send(1, &Vector3::zeros(), &UnitQuaternion::identity());
            attempts += 1;
            if outcome == SendOutcome::Dropped {
                dropped = true;
                break;
            }
            assert_eq!(outcome, SendOutcome::Sent);
        }
        assert!(dropped, "socket buffer never filled");
        assert_eq!(server.next_sequence(), Some(attempts));

        server.send(1, &Vector3::zeros(), &UnitQuaternion::identity());
        assert_eq!(server.next_sequence(), Some(attempts + 1));
    }
}
