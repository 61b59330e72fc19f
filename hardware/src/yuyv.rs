//! Packed YUYV (YUV 4:2:2) helpers.
//!
//! Every two pixels share one `Y0 U Y1 V` quadruple, so luma sits on every
//! even byte of a row. Drivers may pad rows, hence the explicit stride.

use ndarray::Array2;
use shared::camera_interface::{CameraError, CameraResult};
use shared::image_size::ImageSize;

/// Bytes per pixel in a packed YUYV row
pub const BYTES_PER_PIXEL: usize = 2;

/// Extract the luma plane from a YUYV buffer with rows `stride` bytes apart.
pub fn luma_plane(buffer: &[u8], size: ImageSize, stride: usize) -> CameraResult<Array2<u8>> {
    let row_bytes = size.width * BYTES_PER_PIXEL;
    if stride < row_bytes {
        return Err(CameraError::CaptureFailed(format!(
            "stride {stride} shorter than a {}-pixel YUYV row",
            size.width
        )));
    }
    let needed = match size.height {
        0 => 0,
        rows => (rows - 1) * stride + row_bytes,
    };
    if buffer.len() < needed {
        return Err(CameraError::CaptureFailed(format!(
            "short frame: {} bytes, expected at least {needed} for {size}",
            buffer.len()
        )));
    }

    Ok(Array2::from_shape_fn(size.shape(), |(row, col)| {
        buffer[row * stride + col * BYTES_PER_PIXEL]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_on_even_bytes() {
        // 2x2 image: Y values 10, 20 / 30, 40 with chroma 128
        let buffer = [10, 128, 20, 128, 30, 128, 40, 128];
        let luma = luma_plane(&buffer, ImageSize::from_width_height(2, 2), 4).unwrap();
        assert_eq!(luma, ndarray::array![[10, 20], [30, 40]]);
    }

    #[test]
    fn test_padded_rows_are_skipped() {
        // stride 6: two pad bytes (0xEE) per row
        let buffer = [1, 0, 2, 0, 0xEE, 0xEE, 3, 0, 4, 0];
        let luma = luma_plane(&buffer, ImageSize::from_width_height(2, 2), 6).unwrap();
        assert_eq!(luma, ndarray::array![[1, 2], [3, 4]]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let buffer = [0u8; 6];
        let err = luma_plane(&buffer, ImageSize::from_width_height(2, 2), 4).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(_)));
    }

    #[test]
    fn test_stride_too_small_rejected() {
        let buffer = [0u8; 16];
        assert!(luma_plane(&buffer, ImageSize::from_width_height(4, 2), 4).is_err());
    }
}
