//! Camera drivers for VSN camera nodes.
//!
//! Each driver is feature-gated for optional compilation. Pixel format
//! helpers are always built so they can be tested without a device.
//!
//! # Features
//!
//! - `v4l2` - V4L2 capture: USB webcams and the Pi sensor through the
//!   V4L2 bridge (Linux only)

pub mod yuyv;

#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;
