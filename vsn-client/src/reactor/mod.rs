//! Node lifecycle and the adaptive sampling loop.
//!
//! A [`Reactor`] owns the camera, the background model, the activity
//! controller and the server link, and drives them from one task:
//!
//! ```text
//! Unconfigured --start--> WaitingForConfiguration --clconf--> Running
//!      |                                                        |
//!      +--start (standalone)--> StandaloneRunning               |
//!                                      |                        |
//!                                      +------> Stopped <-------+
//! ```
//!
//! Each tick captures and differences a frame on the blocking pool, feeds
//! the result to the controller, optionally encodes an image, sends a
//! data packet, and schedules the next tick one regime-selected sample
//! time after the current one started.

pub mod sensor;

use std::future::{pending, Future};
use std::time::Duration;

use activity_control::ActivityController;
use serde_json::Value;
use shared::camera_interface::CameraError;
use shared::config_storage::NodeConfig;
use shared::image_proc::{encode_jpeg, ImageProcError, ImageType};
use shared::packet::{
    route, ConfigurationPacket, ConfigurationReport, DataPacket, NeighbourDataPacket, NodeId,
    NodePacket, PacketHandler, PacketSet, ProtocolError, ServerPacket,
};
use thiserror::Error;
use tokio::task::{spawn_blocking, JoinError};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::identity::{host_name, node_id_from_host_name};
use crate::transport::{Link, TransportError};

pub use sensor::Sensor;

/// Version reported to the server in every configuration report
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("Host name {hostname:?} does not provide a camera number")]
    IdentityResolution { hostname: String },

    #[error("Connection to the server was lost")]
    TransportLost,

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Image processing error: {0}")]
    ImageProc(#[from] ImageProcError),

    #[error("Worker task failed: {0}")]
    Worker(#[from] JoinError),

    #[error("Tick scheduled before the node was configured")]
    NotConfigured,

    #[error("Sensor lost after a worker failure")]
    SensorLost,
}

pub type ReactorResult<T> = Result<T, ReactorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unconfigured,
    WaitingForConfiguration,
    Running,
    StandaloneRunning,
    Stopped,
}

/// What one tick measured and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub percentage_active_pixels: f64,
    pub activation_level: f64,
    pub gain: f64,
    pub sample_time: f64,
    pub below_threshold: bool,
    pub image_attached: bool,
    pub processing_time: Duration,
}

/// Longest period a tick is ever scheduled out, whatever the sample time.
pub const MAX_TICK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Sample time as a period, capped at [`MAX_TICK_PERIOD`].
pub fn sample_period(sample_time: f64) -> Duration {
    Duration::try_from_secs_f64(sample_time).map_or(MAX_TICK_PERIOD, |period| period.min(MAX_TICK_PERIOD))
}

/// Delay until the next tick: the sample time minus what processing used up.
///
/// Never negative; an overrunning tick is followed immediately.
pub fn next_delay(sample_time: f64, elapsed: Duration) -> Duration {
    sample_period(sample_time).saturating_sub(elapsed)
}

fn deadline_after(delay: Duration) -> Option<Instant> {
    let deadline = Instant::now().checked_add(delay);
    if deadline.is_none() {
        warn!("Tick delay {delay:?} is out of range, not scheduling");
    }
    deadline
}

pub struct Reactor {
    config: NodeConfig,
    standalone: bool,
    state: NodeState,
    node_id: Option<NodeId>,
    host_name: Option<String>,
    sensor: Option<Sensor>,
    controller: Option<ActivityController>,
    link: Option<Link>,
    send_image: bool,
    image_type: ImageType,
    next_tick: Option<Instant>,
    fatal: Option<ReactorError>,
}

impl Reactor {
    fn new(config: NodeConfig, sensor: Sensor, link: Option<Link>, standalone: bool) -> Self {
        let controller = standalone.then(|| {
            ActivityController::new(
                config.parameters_below_threshold,
                config.parameters_above_threshold,
                config.activation_threshold,
            )
        });
        Self {
            standalone,
            state: NodeState::Unconfigured,
            node_id: None,
            host_name: host_name(),
            sensor: Some(sensor),
            controller,
            link,
            send_image: config.send_image,
            image_type: config.image_type,
            next_tick: None,
            fatal: None,
            config,
        }
    }

    /// Node that waits for the server to configure it.
    pub fn networked(config: NodeConfig, sensor: Sensor, link: Link) -> Self {
        Self::new(config, sensor, Some(link), false)
    }

    /// Node that runs from local configuration alone.
    ///
    /// Data packets still go out when a link is given.
    pub fn standalone(config: NodeConfig, sensor: Sensor, link: Option<Link>) -> Self {
        Self::new(config, sensor, link, true)
    }

    /// Use `name` instead of the OS host name for identity fallback
    pub fn with_host_name(mut self, name: impl Into<String>) -> Self {
        self.host_name = Some(name.into());
        self
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn controller(&self) -> Option<&ActivityController> {
        self.controller.as_ref()
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn send_image(&self) -> bool {
        self.send_image
    }

    fn set_state(&mut self, state: NodeState) {
        if self.state != state {
            info!("Node state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Begin sampling if possible, otherwise wait for configuration.
    pub fn start(&mut self) {
        let Some(controller) = &self.controller else {
            self.set_state(NodeState::WaitingForConfiguration);
            return;
        };
        let period = sample_period(controller.sample_time());

        if self.standalone {
            self.set_state(NodeState::StandaloneRunning);
        } else if self.node_id.is_some() {
            self.set_state(NodeState::Running);
        } else {
            self.set_state(NodeState::WaitingForConfiguration);
            return;
        }
        self.next_tick = deadline_after(period);
    }

    /// Cancel the pending tick and release the camera and the link.
    pub fn disconnect(&mut self) {
        self.next_tick = None;
        self.sensor = None;
        if self.link.take().is_some() {
            info!("Disconnected");
        }
        self.set_state(NodeState::Stopped);
    }

    /// Route one inbound record. Errors leave the node untouched.
    pub fn handle_record(&mut self, record: Value) -> Result<(), ProtocolError> {
        route(record, self)
    }

    fn send(&mut self, packet: impl Into<ServerPacket>) {
        let Some(link) = &self.link else {
            return;
        };
        let packet = packet.into();
        match link.send(&packet) {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                error!("Connection lost while sending {}", packet.packet_type());
                self.fatal = Some(ReactorError::TransportLost);
            }
            Err(e) => warn!("Failed to send {}: {e}", packet.packet_type()),
        }
    }

    fn resolve_identity(&self, packet: &ConfigurationPacket) -> ReactorResult<Option<NodeId>> {
        if let Some(node_id) = packet.node_id {
            return Ok(Some(node_id));
        }
        if !packet.hostname_based_ids {
            return Ok(None);
        }
        let hostname = self.host_name.clone().unwrap_or_default();
        match node_id_from_host_name(&hostname) {
            Some(node_id) => Ok(Some(node_id)),
            None => Err(ReactorError::IdentityResolution { hostname }),
        }
    }

    fn assign_identity(&mut self, node_id: NodeId) {
        info!("Node identity assigned: {node_id}");
        self.node_id = Some(node_id);
        let weights: Vec<(usize, f64)> = (1..)
            .map_while(|neighbour| {
                self.config
                    .dependency_value(node_id, neighbour)
                    .map(|weight| (neighbour, weight))
            })
            .collect();
        if !weights.is_empty() {
            debug!("Neighbour weights for node {node_id}: {weights:?}");
        }
        self.send(ConfigurationReport {
            node_id,
            software_version: SOFTWARE_VERSION.to_string(),
        });
    }

    async fn tick(&mut self, started: Instant) -> ReactorResult<TickReport> {
        let slow_mode = self
            .controller
            .as_ref()
            .map_or(true, ActivityController::is_below_threshold);
        let mut sensor = self.sensor.take().ok_or(ReactorError::SensorLost)?;

        let (sensor, percentage) = spawn_blocking(move || {
            let percentage = sensor.sample(slow_mode);
            (sensor, percentage)
        })
        .await?;

        let result = self.finish_tick(&sensor, percentage, started).await;
        self.sensor = Some(sensor);
        result
    }

    async fn finish_tick(
        &mut self,
        sensor: &Sensor,
        percentage: ReactorResult<f64>,
        started: Instant,
    ) -> ReactorResult<TickReport> {
        let percentage = percentage?;
        let sampled_in = started.elapsed();

        let Some(controller) = self.controller.as_mut() else {
            return Err(ReactorError::NotConfigured);
        };
        controller.update(percentage);
        let activation_level = controller.activation_level();
        let gain = controller.gain();
        let sample_time = controller.sample_time();
        let below_threshold = controller.is_below_threshold();

        let image = if below_threshold && !self.send_image {
            None
        } else {
            let snapshot = sensor.snapshot(self.image_type);
            let quality = self.config.jpeg_quality;
            Some(spawn_blocking(move || encode_jpeg(&snapshot.view(), quality)).await??)
        };
        let encoded_in = started.elapsed().saturating_sub(sampled_in);
        let image_attached = image.is_some();

        self.send(DataPacket {
            white_pixels: percentage,
            activation_level,
            gain,
            sample_time,
            image,
        });

        let processing_time = started.elapsed();
        debug!(
            "Calculating percentage took {:.2} ms, encoding took {:.2} ms, sending took {:.2} ms",
            sampled_in.as_secs_f64() * 1000.0,
            encoded_in.as_secs_f64() * 1000.0,
            processing_time.saturating_sub(sampled_in + encoded_in).as_secs_f64() * 1000.0
        );

        Ok(TickReport {
            percentage_active_pixels: percentage,
            activation_level,
            gain,
            sample_time,
            below_threshold,
            image_attached,
            processing_time,
        })
    }

    async fn run_tick(&mut self) {
        let started = Instant::now();
        match self.tick(started).await {
            Ok(report) => debug!(?report, "tick"),
            Err(e @ (ReactorError::Camera(_) | ReactorError::ImageProc(_))) => {
                warn!("Skipping tick: {e}");
            }
            Err(e) => {
                error!("Sampling loop failed: {e}");
                self.fatal = Some(e);
                return;
            }
        }

        self.next_tick = self
            .controller
            .as_ref()
            .and_then(|controller| {
                deadline_after(next_delay(controller.sample_time(), started.elapsed()))
            });
    }

    /// Drive the node until `shutdown` resolves, the link drops, or a fatal error.
    ///
    /// Shutdown is checked first, then inbound records, then the timer, so
    /// an interrupt wins over a link that closes at the same moment. A tick
    /// runs to completion once started: shutdown and inbound records are
    /// not polled until it has sent its data packet.
    pub async fn run<F>(&mut self, shutdown: F) -> ReactorResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if self.state == NodeState::Unconfigured {
            self.start();
        }

        loop {
            if let Some(e) = self.fatal.take() {
                self.disconnect();
                return Err(e);
            }
            if self.state == NodeState::Stopped {
                return Ok(());
            }

            let next_tick = self.next_tick;
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("Shutdown requested");
                    self.disconnect();
                    return Ok(());
                }
                record = recv_or_pending(self.link.as_mut()) => match record {
                    Some(record) => {
                        if let Err(e) = self.handle_record(record) {
                            warn!("Dropping packet: {e}");
                        }
                    }
                    None => {
                        error!("Connection lost");
                        self.fatal = Some(ReactorError::TransportLost);
                    }
                },
                () = sleep_or_pending(next_tick) => self.run_tick().await,
            }
        }
    }
}

impl PacketHandler for Reactor {
    type Packet = NodePacket;

    fn handle(&mut self, packet: NodePacket) {
        match packet {
            NodePacket::Configuration(configuration) => self.on_configuration(configuration),
            NodePacket::Data(neighbours) => self.on_neighbour_data(neighbours),
        }
    }
}

impl Reactor {
    fn on_configuration(&mut self, packet: ConfigurationPacket) {
        info!(
            "Received configuration packet; node_id: {:?}; send_image: {:?}; image_type: {:?}",
            packet.node_id, packet.send_image, packet.image_type
        );

        self.controller = Some(ActivityController::new(
            packet.parameters_below_threshold,
            packet.parameters_above_threshold,
            packet.activation_threshold,
        ));

        if !self.standalone {
            match self.node_id {
                None => match self.resolve_identity(&packet) {
                    Ok(Some(node_id)) => self.assign_identity(node_id),
                    Ok(None) => warn!("Configuration carries no node id and host name ids are disabled"),
                    Err(e) => {
                        error!("{e} - exiting");
                        self.disconnect();
                        self.fatal = Some(e);
                        return;
                    }
                },
                Some(current) => {
                    if let Some(other) = packet.node_id.filter(|&id| id != current) {
                        warn!("Ignoring node id {other}, identity is already {current}");
                    }
                }
            }
        }

        if self.state == NodeState::WaitingForConfiguration {
            self.start();
        }

        if let Some(image_type) = packet.image_type {
            self.image_type = image_type;
        }
        if let Some(send_image) = packet.send_image {
            self.send_image = send_image;
        }
    }

    fn on_neighbour_data(&mut self, packet: NeighbourDataPacket) {
        match self.controller.as_mut() {
            Some(controller) => {
                debug!("Received neighbour activation: {:.2}", packet.activation_neighbours);
                controller.set_neighbour_activation(packet.activation_neighbours);
            }
            None => warn!("Neighbour activation received before configuration, dropping"),
        }
    }
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn recv_or_pending(link: Option<&mut Link>) -> Option<Value> {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::camera_interface::{square_frame, MockCamera};
    use shared::image_size::ImageSize;

    fn sensor() -> Sensor {
        let frame = square_frame(ImageSize::from_width_height(10, 10), 0, 0, 0, 0);
        Sensor::new(Box::new(MockCamera::new_repeating(frame))).unwrap()
    }

    fn configuration(node_id: Option<NodeId>) -> Value {
        json!({
            "_pktype": "clconf",
            "node_id": node_id,
            "software_version": "0.1.0",
            "parameters_below_threshold": {"gain": 2.0, "sample_time": 1.0},
            "parameters_above_threshold": {"gain": 0.1, "sample_time": 0.1},
            "activation_threshold": 15.0
        })
    }

    fn waiting_node(host_name: &str) -> (Reactor, Link) {
        let (link, server) = Link::pair();
        let mut reactor = Reactor::networked(NodeConfig::default(), sensor(), link).with_host_name(host_name);
        reactor.start();
        assert_eq!(reactor.state(), NodeState::WaitingForConfiguration);
        (reactor, server)
    }

    #[tokio::test]
    async fn test_configuration_starts_node_and_acknowledges() {
        let (mut reactor, mut server) = waiting_node("camera");
        reactor.handle_record(configuration(Some(3))).unwrap();

        assert_eq!(reactor.state(), NodeState::Running);
        assert_eq!(reactor.node_id(), Some(3));
        assert!(reactor.next_tick.is_some());

        let ack = server.recv().await.unwrap();
        assert_eq!(ack["_pktype"], "svconf");
        assert_eq!(ack["node_id"], 3);
        assert_eq!(ack["software_version"], SOFTWARE_VERSION);
    }

    #[tokio::test]
    async fn test_host_name_fallback() {
        let (mut reactor, mut server) = waiting_node("cam-07");
        reactor.handle_record(configuration(None)).unwrap();
        assert_eq!(reactor.node_id(), Some(7));
        assert_eq!(server.recv().await.unwrap()["node_id"], 7);
    }

    #[tokio::test]
    async fn test_host_name_without_digits_is_fatal() {
        let (mut reactor, mut server) = waiting_node("camera");
        reactor.handle_record(configuration(None)).unwrap();

        assert_eq!(reactor.state(), NodeState::Stopped);
        assert!(matches!(
            reactor.fatal,
            Some(ReactorError::IdentityResolution { ref hostname }) if hostname == "camera"
        ));
        // Link was released, nothing was acknowledged
        assert_eq!(server.recv().await, None);
    }

    #[tokio::test]
    async fn test_host_name_ids_disabled_keeps_waiting() {
        let (mut reactor, _server) = waiting_node("cam-07");
        let mut record = configuration(None);
        record["hostname_based_ids"] = json!(false);
        reactor.handle_record(record).unwrap();
        assert_eq!(reactor.node_id(), None);
        assert_eq!(reactor.state(), NodeState::WaitingForConfiguration);
        assert!(reactor.controller().is_some());
    }

    #[tokio::test]
    async fn test_identity_is_assigned_once() {
        let (mut reactor, mut server) = waiting_node("camera");
        reactor.handle_record(configuration(Some(3))).unwrap();
        reactor.handle_record(configuration(Some(5))).unwrap();
        assert_eq!(reactor.node_id(), Some(3));

        server.recv().await.unwrap();
        drop(reactor);
        // Exactly one acknowledgement
        assert_eq!(server.recv().await, None);
    }

    #[tokio::test]
    async fn test_unknown_packet_leaves_state_unchanged() {
        let (mut reactor, _server) = waiting_node("camera");
        let err = reactor
            .handle_record(json!({"_pktype": "svdata", "white_pixels": 1.0}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedPacketType(_)));
        assert_eq!(reactor.state(), NodeState::WaitingForConfiguration);
        assert!(reactor.controller().is_none());
        assert_eq!(reactor.node_id(), None);
    }

    #[tokio::test]
    async fn test_neighbour_data_before_configuration_is_dropped() {
        let (mut reactor, _server) = waiting_node("camera");
        reactor
            .handle_record(json!({"_pktype": "cldata", "activation_neighbours": 3.0}))
            .unwrap();
        assert!(reactor.controller().is_none());

        reactor.handle_record(configuration(Some(1))).unwrap();
        reactor
            .handle_record(json!({"_pktype": "cldata", "activation_neighbours": 3.0}))
            .unwrap();
        assert_eq!(reactor.controller().unwrap().neighbour_activation(), 3.0);
    }

    #[tokio::test]
    async fn test_image_overrides() {
        let (mut reactor, _server) = waiting_node("camera");
        assert_eq!(reactor.image_type(), ImageType::Foreground);
        assert!(!reactor.send_image());

        let mut record = configuration(Some(1));
        record["image_type"] = json!("background");
        record["send_image"] = json!(true);
        reactor.handle_record(record).unwrap();
        assert_eq!(reactor.image_type(), ImageType::Background);
        assert!(reactor.send_image());
    }

    #[tokio::test]
    async fn test_standalone_starts_without_handshake() {
        let mut reactor = Reactor::standalone(NodeConfig::default(), sensor(), None);
        reactor.start();
        assert_eq!(reactor.state(), NodeState::StandaloneRunning);
        assert_eq!(reactor.controller().unwrap().sample_time(), 1.0);
    }

    #[test]
    fn test_next_delay_is_clamped() {
        assert_eq!(next_delay(1.0, Duration::from_millis(200)), Duration::from_millis(800));
        assert_eq!(next_delay(0.1, Duration::from_millis(250)), Duration::ZERO);
    }

    #[test]
    fn test_huge_sample_time_is_capped() {
        assert_eq!(sample_period(1e20), MAX_TICK_PERIOD);
        assert_eq!(sample_period(f64::MAX), MAX_TICK_PERIOD);
        assert_eq!(next_delay(1e20, Duration::from_secs(1)), MAX_TICK_PERIOD - Duration::from_secs(1));
        assert_eq!(sample_period(0.25), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_with_huge_sample_time_schedules_capped_tick() {
        let (mut reactor, mut server) = waiting_node("camera");
        let mut record = configuration(Some(1));
        record["parameters_below_threshold"]["sample_time"] = json!(1e20);
        reactor.handle_record(record).unwrap();

        assert_eq!(reactor.state(), NodeState::Running);
        assert_eq!(reactor.controller().unwrap().sample_time(), 1e20);
        assert_eq!(reactor.next_tick, Some(Instant::now() + MAX_TICK_PERIOD));
        assert_eq!(server.recv().await.unwrap()["_pktype"], "svconf");
    }

    #[tokio::test]
    async fn test_identity_with_dependency_row() {
        let (link, mut server) = Link::pair();
        let mut config = NodeConfig::default();
        config.dependencies.insert(4, vec![0.0, 0.5, 0.25]);
        let mut reactor = Reactor::networked(config, sensor(), link).with_host_name("cam-4");
        reactor.start();
        reactor.handle_record(configuration(None)).unwrap();

        assert_eq!(reactor.node_id(), Some(4));
        assert_eq!(reactor.config.dependency_value(4, 2), Some(0.5));
        assert_eq!(server.recv().await.unwrap()["node_id"], 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_wins_over_closed_link() {
        let (link, server) = Link::pair();
        let mut reactor = Reactor::standalone(NodeConfig::default(), sensor(), Some(link));
        drop(server);

        // Both are ready on the first poll
        reactor.run(std::future::ready(())).await.unwrap();
        assert_eq!(reactor.state(), NodeState::Stopped);
    }
}
