//! Image processing for activity detection.
//!
//! Grayscale conversion, absolute difference against an adaptive
//! background, 3x3 median blur, a fixed threshold, and a morphological
//! opening. See [`difference`] for the stateful part.

pub mod difference;
pub mod encode;
pub mod filters;

use image::GrayImage;
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

use crate::image_size::ImageSize;

pub use difference::{FrameDifferencer, ImageType, DIFFERENCE_THRESHOLD};
pub use encode::{encode_jpeg, DEFAULT_JPEG_QUALITY};
pub use filters::{active_pixel_percentage, dilate, erode, median_blur_3x3, open, Norm, CROSS_RADIUS};

/// Errors raised while processing or encoding frames
#[derive(Error, Debug)]
pub enum ImageProcError {
    /// A frame does not have the dimensions the background model was seeded with
    #[error("Frame size {actual} does not match background model size {expected}")]
    SizeMismatch {
        expected: ImageSize,
        actual: ImageSize,
    },

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Cannot build a {0} image buffer")]
    InvalidBuffer(ImageSize),
}

pub type ImageProcResult<T> = Result<T, ImageProcError>;

/// Copy a view into an `image` buffer. Any memory layout is accepted.
pub(crate) fn to_gray_image(view: &ArrayView2<u8>) -> ImageProcResult<GrayImage> {
    let size = ImageSize::from_width_height(view.ncols(), view.nrows());
    // Logical iteration order is row-major regardless of memory layout
    let data: Vec<u8> = view.iter().copied().collect();
    GrayImage::from_raw(size.width as u32, size.height as u32, data).ok_or(ImageProcError::InvalidBuffer(size))
}

pub(crate) fn from_gray_image(image: GrayImage) -> ImageProcResult<Array2<u8>> {
    let size = ImageSize::from_width_height(image.width() as usize, image.height() as usize);
    Array2::from_shape_vec(size.shape(), image.into_raw()).map_err(|_| ImageProcError::InvalidBuffer(size))
}
