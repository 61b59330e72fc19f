use ndarray::Array2;
use shared::camera_interface::{Camera, CameraResult};
use shared::image_proc::{FrameDifferencer, ImageType};

use super::ReactorResult;

/// Camera plus the background model fed by it.
///
/// Moved onto a blocking worker for each sample and handed back, so the
/// camera and the model are never touched from two places at once.
pub struct Sensor {
    camera: Box<dyn Camera>,
    differencer: FrameDifferencer,
}

impl Sensor {
    /// Grab one frame to seed the background model.
    pub fn new(mut camera: Box<dyn Camera>) -> CameraResult<Self> {
        let initial = camera.grab_image(false)?;
        let differencer = FrameDifferencer::new(&initial);
        Ok(Self {
            camera,
            differencer,
        })
    }

    pub fn camera_name(&self) -> &str {
        self.camera.name()
    }

    /// Capture a frame and return its activity percentage.
    pub fn sample(&mut self, slow_mode: bool) -> ReactorResult<f64> {
        let frame = self.camera.grab_image(slow_mode)?;
        Ok(self.differencer.compute_activity(&frame)?)
    }

    /// Owned copy of the latest image of `kind`, for encoding off-thread
    pub fn snapshot(&self, kind: ImageType) -> Array2<u8> {
        self.differencer.view(kind).to_owned()
    }
}
