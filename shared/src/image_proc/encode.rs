//! JPEG encoding of grayscale views for transmission to the server.

use ndarray::ArrayView2;

use super::{to_gray_image, ImageProcResult};

/// Quality used for images attached to data packets
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Encode an 8-bit grayscale image as JPEG.
pub fn encode_jpeg(image: &ArrayView2<u8>, quality: u8) -> ImageProcResult<Vec<u8>> {
    let buffer = to_gray_image(image)?;

    let mut jpeg_bytes = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, quality);
    encoder.encode_image(&buffer)?;

    Ok(jpeg_bytes)
}
