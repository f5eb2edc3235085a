//! rollcall-hw: exclusive camera capture.
//!
//! Provides V4L2-based camera access, pixel conversion to 8-bit luma, and a
//! gate that serializes use of the single capture device.

pub mod camera;
pub mod frame;
pub mod gate;

pub use camera::{Camera, CameraError, CaptureDevice, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use gate::{DeviceGate, DeviceLease};
