//! Neighbourhood filters on 8-bit single-channel images.
//!
//! Thin wrappers over `imageproc` that take and return ndarray images.
//! The median blur pads by continuity (replicated edges). Erosion and
//! dilation are binary and ignore neighbours outside the image.

use ndarray::{Array2, ArrayView2};

pub use imageproc::distance_transform::Norm;

use super::{from_gray_image, to_gray_image, ImageProcResult};

/// Radius of the 3x3 elliptical element. Under [`Norm::L1`] it is the cross
/// `{centre, up, down, left, right}`; under [`Norm::LInf`] the full square.
pub const CROSS_RADIUS: u8 = 1;

/// Zero every pixel within `radius` of a zero pixel, set the rest to 255
pub fn erode(image: &ArrayView2<u8>, norm: Norm, radius: u8) -> ImageProcResult<Array2<u8>> {
    from_gray_image(imageproc::morphology::erode(&to_gray_image(image)?, norm, radius))
}

/// Set every pixel within `radius` of a nonzero pixel to 255, the rest to 0
pub fn dilate(image: &ArrayView2<u8>, norm: Norm, radius: u8) -> ImageProcResult<Array2<u8>> {
    from_gray_image(imageproc::morphology::dilate(&to_gray_image(image)?, norm, radius))
}

/// Erosion followed by dilation: drops specks smaller than the element,
/// keeps blobs the element fits into.
pub fn open(image: &ArrayView2<u8>, norm: Norm, radius: u8) -> ImageProcResult<Array2<u8>> {
    from_gray_image(imageproc::morphology::open(&to_gray_image(image)?, norm, radius))
}

/// 3x3 median with replicated borders
pub fn median_blur_3x3(image: &ArrayView2<u8>) -> ImageProcResult<Array2<u8>> {
    from_gray_image(imageproc::filter::median_filter(&to_gray_image(image)?, 1, 1))
}

/// Percentage (0..=100) of nonzero pixels. Empty images count as 0 %.
pub fn active_pixel_percentage(mask: &ArrayView2<u8>) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    let nonzero = mask.iter().filter(|&&v| v != 0).count();
    100.0 * nonzero as f64 / mask.len() as f64
}
