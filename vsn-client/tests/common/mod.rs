//! Server-side helpers shared by the reactor integration tests.

#![allow(dead_code)]

use std::time::Duration;

use shared::camera_interface::{square_frame, Frame, MockCamera, MockCameraStats};
use shared::image_size::ImageSize;
use shared::packet::{ConfigurationReport, DataPacket, PacketHandler, ServerPacket};
use tokio::time::Instant;
use vsn_client::Sensor;

pub const FRAME_SIZE: ImageSize = ImageSize {
    width: 20,
    height: 20,
};

/// Collects what a node sends, with arrival times relative to `origin`.
pub struct ServerRecorder {
    origin: Instant,
    pub reports: Vec<ConfigurationReport>,
    pub data: Vec<DataPacket>,
    pub arrivals: Vec<Duration>,
}

impl ServerRecorder {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            reports: Vec::new(),
            data: Vec::new(),
            arrivals: Vec::new(),
        }
    }

    /// Gaps between consecutive data packets
    pub fn intervals(&self) -> Vec<Duration> {
        self.arrivals.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

impl PacketHandler for ServerRecorder {
    type Packet = ServerPacket;

    fn handle(&mut self, packet: ServerPacket) {
        match packet {
            ServerPacket::Configuration(report) => self.reports.push(report),
            ServerPacket::Data(data) => {
                self.arrivals.push(self.origin.elapsed());
                self.data.push(data);
            }
        }
    }
}

pub fn blank() -> Frame {
    square_frame(FRAME_SIZE, 0, 0, 0, 0)
}

/// `blanks` empty frames, then a bright square growing from side 6 to 11.
pub fn waking_scene(blanks: usize) -> Vec<Frame> {
    let mut frames = vec![blank(); blanks];
    frames.extend((6..=11).map(|side| square_frame(FRAME_SIZE, 2, 2, side, 200)));
    frames
}

pub fn sensor_for(frames: Vec<Frame>) -> (Sensor, MockCameraStats) {
    let camera = MockCamera::new_sequence(frames, true);
    let stats = camera.stats();
    let sensor = Sensor::new(Box::new(camera)).expect("mock camera always yields a first frame");
    (sensor, stats)
}

pub fn assert_close(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    let tolerance = Duration::from_millis(5);
    assert!(
        actual + tolerance >= expected && actual <= expected + tolerance,
        "interval {actual:?}, expected about {expected:?}"
    );
}
