//! Mock camera for tests and bench runs without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{s, Array2};

use super::{Camera, CameraError, CameraResult, Frame};
use crate::image_size::ImageSize;

/// Counters shared between a [`MockCamera`] and whoever inspects it.
///
/// Stays readable after the camera has been moved into a reactor.
#[derive(Debug, Clone, Default)]
pub struct MockCameraStats {
    grabs: Arc<AtomicUsize>,
    slow_mode_grabs: Arc<AtomicUsize>,
}

impl MockCameraStats {
    /// Total frames handed out
    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::Relaxed)
    }

    /// Frames requested with slow mode set
    pub fn slow_mode_grabs(&self) -> usize {
        self.slow_mode_grabs.load(Ordering::Relaxed)
    }
}

enum Source {
    Script {
        frames: Vec<Frame>,
        cursor: usize,
        repeat_last: bool,
    },
    MovingSquare {
        size: ImageSize,
        side: usize,
        position: usize,
    },
}

/// Camera that replays prepared frames or renders a synthetic scene.
pub struct MockCamera {
    name: String,
    source: Source,
    stats: MockCameraStats,
}

impl MockCamera {
    /// Replay `frames` in order.
    ///
    /// Once the script is exhausted the last frame is repeated when
    /// `repeat_last` is set, otherwise every further grab fails.
    pub fn new_sequence(frames: Vec<Frame>, repeat_last: bool) -> Self {
        Self {
            name: "mock-sequence".to_string(),
            source: Source::Script {
                frames,
                cursor: 0,
                repeat_last,
            },
            stats: MockCameraStats::default(),
        }
    }

    /// Always return the same frame
    pub fn new_repeating(frame: Frame) -> Self {
        let mut camera = Self::new_sequence(vec![frame], true);
        camera.name = "mock-repeating".to_string();
        camera
    }

    /// Bright square sliding diagonally over a dark background, one pixel per grab.
    pub fn moving_square(size: ImageSize, side: usize) -> Self {
        Self {
            name: "mock-moving-square".to_string(),
            source: Source::MovingSquare {
                size,
                side,
                position: 0,
            },
            stats: MockCameraStats::default(),
        }
    }

    pub fn stats(&self) -> MockCameraStats {
        self.stats.clone()
    }
}

/// Gray frame with a filled square of `value` at `(top, left)`; clipped to the frame.
pub fn square_frame(size: ImageSize, top: usize, left: usize, side: usize, value: u8) -> Frame {
    let mut pixels: Array2<u8> = size.empty_gray();
    let bottom = (top + side).min(size.height);
    let right = (left + side).min(size.width);
    if top < bottom && left < right {
        pixels.slice_mut(s![top..bottom, left..right]).fill(value);
    }
    Frame::Gray(pixels)
}

impl Camera for MockCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab_image(&mut self, slow_mode: bool) -> CameraResult<Frame> {
        let frame = match &mut self.source {
            Source::Script {
                frames,
                cursor,
                repeat_last,
            } => {
                let index = if *cursor < frames.len() {
                    *cursor += 1;
                    *cursor - 1
                } else if *repeat_last && !frames.is_empty() {
                    frames.len() - 1
                } else {
                    return Err(CameraError::CaptureFailed(
                        "mock frame sequence exhausted".to_string(),
                    ));
                };
                frames[index].clone()
            }
            Source::MovingSquare {
                size,
                side,
                position,
            } => {
                let span = size.width.min(size.height).saturating_sub(*side).max(1);
                let offset = *position % span;
                *position += 1;
                square_frame(*size, offset, offset, *side, 220)
            }
        };

        self.stats.grabs.fetch_add(1, Ordering::Relaxed);
        if slow_mode {
            self.stats.slow_mode_grabs.fetch_add(1, Ordering::Relaxed);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(value: u8) -> Frame {
        Frame::Gray(Array2::from_elem((2, 2), value))
    }

    #[test]
    fn test_sequence_then_exhausted() {
        let mut camera = MockCamera::new_sequence(vec![gray(1), gray(2)], false);
        assert_eq!(camera.grab_image(false).unwrap(), gray(1));
        assert_eq!(camera.grab_image(false).unwrap(), gray(2));
        assert!(matches!(
            camera.grab_image(false),
            Err(CameraError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_sequence_repeats_last() {
        let mut camera = MockCamera::new_sequence(vec![gray(1), gray(2)], true);
        camera.grab_image(false).unwrap();
        camera.grab_image(false).unwrap();
        assert_eq!(camera.grab_image(false).unwrap(), gray(2));
    }

    #[test]
    fn test_stats_track_slow_mode() {
        let mut camera = MockCamera::new_repeating(gray(7));
        let stats = camera.stats();
        camera.grab_image(true).unwrap();
        camera.grab_image(false).unwrap();
        camera.grab_image(true).unwrap();
        assert_eq!(stats.grabs(), 3);
        assert_eq!(stats.slow_mode_grabs(), 2);
    }

    #[test]
    fn test_moving_square_moves() {
        let size = ImageSize::from_width_height(16, 16);
        let mut camera = MockCamera::moving_square(size, 4);
        let first = camera.grab_image(false).unwrap();
        let second = camera.grab_image(false).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.size(), size);
    }

    #[test]
    fn test_square_frame_is_clipped() {
        let size = ImageSize::from_width_height(5, 5);
        let Frame::Gray(pixels) = square_frame(size, 3, 3, 4, 9) else {
            panic!("expected gray frame");
        };
        assert_eq!(pixels.iter().filter(|&&v| v == 9).count(), 4);
    }
}
