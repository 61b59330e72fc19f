//! Camera capability used by the node reactor.
//!
//! A camera yields successive frames on demand. Drivers live in the
//! `hardware` crate; this module holds the trait, the frame type, and
//! driver-independent adapters.

pub mod mock;
pub mod prefetch;

use ndarray::{Array2, Array3, Axis};
use thiserror::Error;

use crate::image_size::ImageSize;

pub use mock::{square_frame, MockCamera, MockCameraStats};
pub use prefetch::PrefetchingCamera;

/// Errors raised by camera drivers
#[derive(Error, Debug)]
pub enum CameraError {
    /// The device returned no usable frame
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// The device could not be opened or configured
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CameraResult<T> = Result<T, CameraError>;

/// A captured image.
///
/// Color frames are stored as `(height, width, 3)` in RGB order.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Gray(Array2<u8>),
    Rgb(Array3<u8>),
}

impl Frame {
    pub fn size(&self) -> ImageSize {
        match self {
            Frame::Gray(pixels) => ImageSize::of_array(pixels),
            Frame::Rgb(pixels) => {
                let (height, width, _) = pixels.dim();
                ImageSize::from_width_height(width, height)
            }
        }
    }

    /// Luma plane of this frame.
    ///
    /// Color frames use the BT.601 weights in 14-bit fixed point, rounded,
    /// so white maps to 255 and black to 0 exactly.
    pub fn to_grayscale(&self) -> Array2<u8> {
        match self {
            Frame::Gray(pixels) => pixels.clone(),
            Frame::Rgb(pixels) => pixels.map_axis(Axis(2), |rgb| {
                let luma = u32::from(rgb[0]) * 4899 + u32::from(rgb[1]) * 9617 + u32::from(rgb[2]) * 1868;
                ((luma + (1 << 13)) >> 14) as u8
            }),
        }
    }
}

/// Frame source owned by a single node.
///
/// Implementations are driven from one caller at a time; a request never
/// overlaps the previous one.
pub trait Camera: Send {
    /// Human readable device name, used in logs
    fn name(&self) -> &str;

    /// Capture the next frame.
    ///
    /// With `slow_mode` set, frames buffered while the caller was idle are
    /// discarded first so the returned frame is at most a few capture
    /// cycles old.
    fn grab_image(&mut self, slow_mode: bool) -> CameraResult<Frame>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn grab_image(&mut self, slow_mode: bool) -> CameraResult<Frame> {
        (**self).grab_image(slow_mode)
    }
}
