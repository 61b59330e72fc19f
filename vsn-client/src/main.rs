use std::future::pending;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use shared::camera_interface::{Camera, MockCamera, PrefetchingCamera};
use shared::config_storage::{ConfigStorage, NodeConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vsn_client::transport::{connect, discover_server, Link};
use vsn_client::{Reactor, Sensor, SOFTWARE_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CameraKind {
    /// Synthetic moving square, no hardware needed
    Mock,
    /// V4L2 device (requires the `v4l2` feature)
    V4l2,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera node client for the visual sensor network")]
struct Args {
    /// Configuration file, searched before the standard locations
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "mock")]
    camera: CameraKind,

    /// Video device for the v4l2 camera
    #[arg(long, default_value = "/dev/video0")]
    device: PathBuf,

    /// Keep one capture in flight while the previous frame is processed
    #[arg(long)]
    prefetch: bool,

    /// Run from the local configuration without a server handshake
    #[arg(long)]
    standalone: bool,

    /// Server host; skips broadcast discovery
    #[arg(long)]
    server: Option<String>,

    /// Server port (overrides the configuration)
    #[arg(long)]
    port: Option<u16>,
}

fn open_camera(args: &Args, config: &NodeConfig) -> Result<Box<dyn Camera>> {
    let camera: Box<dyn Camera> = match args.camera {
        CameraKind::Mock => {
            let side = config.image_size.width.min(config.image_size.height) / 4;
            Box::new(MockCamera::moving_square(config.image_size, side.max(1)))
        }
        #[cfg(all(target_os = "linux", feature = "v4l2"))]
        CameraKind::V4l2 => Box::new(
            hardware::v4l2::V4l2Camera::open(&args.device, config.image_size, config.frame_rate)
                .with_context(|| format!("Failed to open {}", args.device.display()))?,
        ),
        #[cfg(not(all(target_os = "linux", feature = "v4l2")))]
        CameraKind::V4l2 => anyhow::bail!("vsn_client was built without the v4l2 feature"),
    };

    if args.prefetch {
        return Ok(Box::new(PrefetchingCamera::new(camera)));
    }
    Ok(camera)
}

async fn open_link(args: &Args, config: &NodeConfig) -> Result<Link> {
    let port = args.port.unwrap_or(config.server_port);
    let addr = match &args.server {
        Some(host) => tokio::net::lookup_host((host.as_str(), port))
            .await
            .with_context(|| format!("Failed to resolve {host}"))?
            .next()
            .with_context(|| format!("{host} has no address"))?,
        None => SocketAddr::new(discover_server(config.discovery_port).await?, port),
    };
    Ok(connect(addr).await?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {e}");
        pending::<()>().await;
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("vsn_client {SOFTWARE_VERSION}");

    let (path, config) = ConfigStorage::new(args.config.clone())
        .load()
        .context("Cannot start without a node configuration")?;
    info!("Loaded configuration from {}", path.display());

    let camera = open_camera(&args, &config)?;
    info!("Using camera {}", camera.name());
    let sensor = Sensor::new(camera).context("Failed to capture the initial frame")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(config.worker_threads)
        .build()
        .context("Failed to build the tokio runtime")?;

    runtime.block_on(async {
        let mut reactor = if args.standalone {
            let link = match args.server {
                Some(_) => Some(open_link(&args, &config).await?),
                None => None,
            };
            Reactor::standalone(config, sensor, link)
        } else {
            let link = open_link(&args, &config).await?;
            Reactor::networked(config, sensor, link)
        };

        reactor.run(shutdown_signal()).await?;
        info!("Stopped");
        Ok::<(), anyhow::Error>(())
    })
}
