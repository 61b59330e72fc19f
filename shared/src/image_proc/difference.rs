//! Frame differencing against a slowly adapting background.
//!
//! # Background model
//!
//! The background is not a statistical mean. Every processed frame nudges
//! each background pixel one grey level toward the current foreground,
//! saturating at 0 and 255. Illumination drift is absorbed over tens of
//! frames, while an object passing through in a frame or two barely
//! moves the model.
//!
//! # Activity
//!
//! ```text
//! gray(frame) -> |gray - background| -> median 3x3 -> > 6 -> open(cross 3x3) -> mask
//! activity = 100 * nonzero(mask) / pixel_count
//! ```

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::filters::{active_pixel_percentage, median_blur_3x3, open, Norm, CROSS_RADIUS};
use super::{ImageProcError, ImageProcResult};
use crate::camera_interface::Frame;
use crate::image_size::ImageSize;

/// A blurred difference strictly above this value marks a pixel as changed.
pub const DIFFERENCE_THRESHOLD: u8 = 6;

const MASK_ON: u8 = 255;

/// Which internal image to expose for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Grayscale version of the latest frame
    #[default]
    #[serde(alias = "fg")]
    Foreground,
    /// Current background model
    #[serde(alias = "bg")]
    Background,
    /// Binary change mask
    #[serde(alias = "df")]
    Difference,
}

/// Stateful change detector owned by a single node.
///
/// Holds no shared state, so it can be moved onto a worker thread for the
/// duration of [`compute_activity`](Self::compute_activity) and handed back.
#[derive(Debug, Clone)]
pub struct FrameDifferencer {
    background: Array2<u8>,
    foreground: Array2<u8>,
    difference_mask: Array2<u8>,
}

impl FrameDifferencer {
    /// Seed the background model with `initial_frame`.
    pub fn new(initial_frame: &Frame) -> Self {
        let background = initial_frame.to_grayscale();
        let foreground = background.clone();
        let difference_mask = Array2::zeros(background.raw_dim());
        Self {
            background,
            foreground,
            difference_mask,
        }
    }

    /// Dimensions every processed frame must have
    pub fn size(&self) -> ImageSize {
        ImageSize::of_array(&self.background)
    }

    /// Percentage of pixels that changed with respect to the background.
    ///
    /// Updates foreground, mask and background as a side effect. Frames of
    /// a different size are rejected and leave the model untouched.
    pub fn compute_activity(&mut self, frame: &Frame) -> ImageProcResult<f64> {
        let foreground = frame.to_grayscale();
        let actual = ImageSize::of_array(&foreground);
        if actual != self.size() {
            return Err(ImageProcError::SizeMismatch {
                expected: self.size(),
                actual,
            });
        }

        let difference = Zip::from(&self.background)
            .and(&foreground)
            .par_map_collect(|&background, &current| background.abs_diff(current));

        let blurred = median_blur_3x3(&difference.view())?;
        let thresholded = blurred.mapv(|v| if v > DIFFERENCE_THRESHOLD { MASK_ON } else { 0 });
        let mask = open(&thresholded.view(), Norm::L1, CROSS_RADIUS)?;

        let percentage = active_pixel_percentage(&mask.view());

        adapt_background(&mut self.background, &foreground.view());

        self.foreground = foreground;
        self.difference_mask = mask;

        trace!(percentage, "frame difference computed");
        Ok(percentage)
    }

    /// Most recent image of the requested kind
    pub fn view(&self, kind: ImageType) -> ArrayView2<'_, u8> {
        match kind {
            ImageType::Foreground => self.foreground.view(),
            ImageType::Background => self.background.view(),
            ImageType::Difference => self.difference_mask.view(),
        }
    }
}

/// Move each background pixel one level toward the foreground, saturating.
fn adapt_background(background: &mut Array2<u8>, foreground: &ArrayView2<u8>) {
    Zip::from(background).and(foreground).par_for_each(|b, &f| {
        if f > *b {
            *b = b.saturating_add(1);
        } else if f < *b {
            *b = b.saturating_sub(1);
        }
    });
}
