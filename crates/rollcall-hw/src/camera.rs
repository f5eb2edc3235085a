//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::gate::DeviceGate;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const DARK_FRAME_RATIO: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("device not released by another capture within {0:?}")]
    AcquireTimeout(Duration),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no usable frame after {0} attempts (all dark)")]
    NoUsableFrame(usize),
}

impl CameraError {
    /// Whether the failure means the device could not be used at all right now.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_) | Self::DeviceBusy | Self::AcquireTimeout(_) | Self::StreamingNotSupported
        )
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

/// Open V4L2 camera handle. The device is closed when this drops.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::debug!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::debug!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Grey => frame::grey_plane(buf, self.width, self.height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// Capture one usable frame.
    ///
    /// Discards `warmup` frames for exposure to settle, then returns the first
    /// frame that is not dark, trying at most `max_attempts` frames.
    pub fn capture_usable_frame(&self, warmup: usize, max_attempts: usize) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..warmup {
            stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue warmup buffer: {e}")))?;
        }

        for _ in 0..max_attempts {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            let gray = self.buf_to_grayscale(buf)?;
            if frame::is_dark_frame(&gray, DARK_FRAME_RATIO) {
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }

            return Ok(Frame {
                data: gray,
                width: self.width,
                height: self.height,
                timestamp: std::time::Instant::now(),
                sequence: meta.sequence,
            });
        }

        Err(CameraError::NoUsableFrame(max_attempts))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// The process-wide camera as an exclusive, scoped resource.
///
/// Each capture acquires the gate, opens the device, reads one usable frame
/// and closes the device again before the gate is released.
pub struct CaptureDevice {
    path: String,
    gate: DeviceGate,
    acquire_timeout: Duration,
    warmup_frames: usize,
    max_attempts: usize,
}

impl CaptureDevice {
    pub fn new(path: impl Into<String>, acquire_timeout: Duration, warmup_frames: usize) -> Self {
        Self {
            path: path.into(),
            gate: DeviceGate::new(),
            acquire_timeout,
            warmup_frames,
            max_attempts: 10,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Capture a single grayscale frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let _lease = self.gate.acquire(self.acquire_timeout)?;
        let camera = Camera::open(&self.path)?;
        let frame = camera.capture_usable_frame(self.warmup_frames, self.max_attempts)?;
        tracing::debug!(
            device = %self.path,
            width = frame.width,
            height = frame.height,
            brightness = frame.avg_brightness(),
            "captured frame"
        );
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_unavailable() {
        let device = CaptureDevice::new("/dev/video-does-not-exist", Duration::from_millis(50), 0);
        let err = device.capture_frame().err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_failed_capture_releases_device() {
        let device = CaptureDevice::new("/dev/video-does-not-exist", Duration::from_millis(50), 0);
        assert!(device.capture_frame().is_err());
        // A leaked lease would surface as AcquireTimeout here
        assert!(matches!(device.capture_frame(), Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_capture_failure_is_not_unavailable() {
        assert!(!CameraError::CaptureFailed("x".into()).is_unavailable());
        assert!(CameraError::AcquireTimeout(Duration::from_secs(1)).is_unavailable());
    }
}
