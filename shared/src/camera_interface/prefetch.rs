//! Background-capture adapter.
//!
//! Sensors that expose a video port (the Raspberry Pi camera module being
//! the usual case) are fastest when the next capture is already running
//! while the caller processes the current frame. [`PrefetchingCamera`]
//! keeps exactly one capture in flight on a helper thread. Every request
//! joins that capture before doing anything else, so acquisitions on one
//! device never overlap.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{Camera, CameraError, CameraResult, Frame};

/// Wraps a camera with one prefetched frame.
pub struct PrefetchingCamera<C: Camera + 'static> {
    name: String,
    camera: Arc<Mutex<C>>,
    in_flight: Option<JoinHandle<CameraResult<Frame>>>,
}

impl<C: Camera + 'static> PrefetchingCamera<C> {
    pub fn new(camera: C) -> Self {
        let name = format!("{} (prefetching)", camera.name());
        Self {
            name,
            camera: Arc::new(Mutex::new(camera)),
            in_flight: None,
        }
    }

    fn start_capture(&mut self) {
        let camera = Arc::clone(&self.camera);
        self.in_flight = Some(thread::spawn(move || {
            let mut camera = camera
                .lock()
                .map_err(|_| CameraError::CaptureFailed("camera lock poisoned".to_string()))?;
            camera.grab_image(false)
        }));
    }

    /// Wait for the capture started by the previous request, if any.
    fn join_in_flight(&mut self) -> Option<CameraResult<Frame>> {
        let handle = self.in_flight.take()?;
        Some(handle.join().unwrap_or_else(|_| {
            Err(CameraError::CaptureFailed(
                "capture thread panicked".to_string(),
            ))
        }))
    }

    fn capture_now(&self, slow_mode: bool) -> CameraResult<Frame> {
        let mut camera = self
            .camera
            .lock()
            .map_err(|_| CameraError::CaptureFailed("camera lock poisoned".to_string()))?;
        camera.grab_image(slow_mode)
    }
}

impl<C: Camera + 'static> Camera for PrefetchingCamera<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab_image(&mut self, slow_mode: bool) -> CameraResult<Frame> {
        let prefetched = self.join_in_flight();

        let frame = match prefetched {
            Some(Ok(frame)) if !slow_mode => frame,
            Some(Ok(_)) => {
                debug!("Discarding prefetched frame after idle period");
                self.capture_now(true)?
            }
            Some(Err(e)) => {
                debug!("Prefetch failed ({e}), capturing synchronously");
                self.capture_now(slow_mode)?
            }
            None => self.capture_now(slow_mode)?,
        };

        self.start_capture();
        Ok(frame)
    }
}

impl<C: Camera + 'static> Drop for PrefetchingCamera<C> {
    fn drop(&mut self) {
        // Release the device only after the helper thread is done with it
        let _ = self.join_in_flight();
    }
}
