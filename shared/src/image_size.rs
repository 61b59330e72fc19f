//! Image dimensions and size utilities

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image dimensions structure
///
/// Width and height of a camera frame. Arrays built from it follow the
/// row-major ndarray convention: shape is `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new ImageSize
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Size of a 2D array with shape (rows, cols)
    pub fn of_array<T>(array: &Array2<T>) -> Self {
        let (height, width) = array.dim();
        Self { width, height }
    }

    /// All-black 8-bit grayscale image of this size
    pub fn empty_gray(&self) -> Array2<u8> {
        Array2::zeros((self.height, self.width))
    }

    /// ndarray shape `(height, width)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.pixel_count() == 0
    }
}

impl Default for ImageSize {
    /// 320x240, the capture size camera nodes run at by default.
    fn default() -> Self {
        Self::from_width_height(320, 240)
    }
}

impl From<(usize, usize)> for ImageSize {
    fn from(dimensions: (usize, usize)) -> Self {
        Self::from_width_height(dimensions.0, dimensions.1)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
