//! V4L2 capture driver.
//!
//! Opens a device in YUYV at the requested size and frame rate and hands
//! out the luma plane of each frame. The driver keeps [`BUFFER_COUNT`]
//! buffers queued; after a long idle period all of them hold stale
//! frames, which slow mode drains before returning a fresh one.

use std::path::{Path, PathBuf};

use shared::camera_interface::{Camera, CameraError, CameraResult, Frame};
use shared::image_size::ImageSize;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;

use crate::yuyv::{luma_plane, BYTES_PER_PIXEL};

/// Buffers queued in the driver, and frames drained in slow mode
pub const BUFFER_COUNT: u32 = 5;

pub struct V4l2Camera {
    name: String,
    size: ImageSize,
    stride: usize,
    // Declared before `_device` so buffers are unmapped first
    stream: MmapStream<'static>,
    _device: Device,
}

impl V4l2Camera {
    /// Open `path` and start streaming at `size` and `frame_rate` fps.
    pub fn open(path: &Path, size: ImageSize, frame_rate: u32) -> CameraResult<Self> {
        let device = Device::with_path(path).map_err(|e| {
            CameraError::Unavailable(format!("Failed to open device {}: {e}", path.display()))
        })?;

        let mut format = device.format()?;
        format.width = size.width as u32;
        format.height = size.height as u32;
        format.fourcc = v4l::FourCC::new(b"YUYV");
        let format = device.set_format(&format)?;

        if &format.fourcc.repr != b"YUYV" {
            return Err(CameraError::Unavailable(format!(
                "{} does not support YUYV (driver chose {})",
                path.display(),
                format.fourcc
            )));
        }

        let negotiated = ImageSize::from_width_height(format.width as usize, format.height as usize);
        if negotiated != size {
            warn!("{} negotiated {negotiated} instead of {size}", path.display());
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(frame_rate)) {
            warn!("Could not set {frame_rate} fps on {}: {e}", path.display());
        }

        let stride = (format.stride as usize).max(negotiated.width * BYTES_PER_PIXEL);
        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;

        let name = format!("v4l2:{}", PathBuf::from(path).display());
        info!("Opened {name} at {negotiated}, stride {stride}");

        Ok(Self {
            name,
            size: negotiated,
            stride,
            stream,
            _device: device,
        })
    }

    /// Frame size agreed with the driver
    pub fn size(&self) -> ImageSize {
        self.size
    }
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab_image(&mut self, slow_mode: bool) -> CameraResult<Frame> {
        if slow_mode {
            for _ in 0..BUFFER_COUNT {
                self.stream.next()?;
            }
            debug!("Drained {BUFFER_COUNT} stale frames");
        }

        let (buffer, _meta) = self.stream.next()?;
        let luma = luma_plane(buffer, self.size, self.stride)?;
        Ok(Frame::Gray(luma))
    }
}
