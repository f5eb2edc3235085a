//! Exclusive, scoped access to a capture device.
//!
//! The camera cannot be shared. Callers take a [`DeviceLease`] before opening
//! the device and the lease is returned when it drops, on success and on
//! every error path alike. Waiters queue on a condition variable and give up
//! after a deadline.

use crate::camera::CameraError;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct DeviceGate {
    busy: Mutex<bool>,
    released: Condvar,
}

/// Held while a caller owns the device.
pub struct DeviceLease<'a> {
    gate: &'a DeviceGate,
}

impl DeviceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the device to become free.
    pub fn acquire(&self, timeout: Duration) -> Result<DeviceLease<'_>, CameraError> {
        let busy = self
            .busy
            .lock()
            .map_err(|_| CameraError::CaptureFailed("device gate poisoned".into()))?;
        let (mut busy, _) = self
            .released
            .wait_timeout_while(busy, timeout, |busy| *busy)
            .map_err(|_| CameraError::CaptureFailed("device gate poisoned".into()))?;

        if *busy {
            return Err(CameraError::AcquireTimeout(timeout));
        }
        *busy = true;
        Ok(DeviceLease { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.lock().map(|b| *b).unwrap_or(true)
    }
}

impl Drop for DeviceLease<'_> {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.gate.busy.lock() {
            *busy = false;
        }
        self.gate.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_acquire_release() {
        let gate = DeviceGate::new();
        {
            let _lease = gate.acquire(Duration::from_millis(10)).unwrap();
            assert!(gate.is_busy());
        }
        assert!(!gate.is_busy());
        assert!(gate.acquire(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let gate = DeviceGate::new();
        let _lease = gate.acquire(Duration::from_millis(10)).unwrap();
        let start = Instant::now();
        let result = gate.acquire(Duration::from_millis(50));
        assert!(matches!(result, Err(CameraError::AcquireTimeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_lease_released_on_error_path() {
        fn failing_capture(gate: &DeviceGate) -> Result<(), CameraError> {
            let _lease = gate.acquire(Duration::from_millis(10))?;
            Err(CameraError::CaptureFailed("simulated".into()))
        }

        let gate = DeviceGate::new();
        assert!(failing_capture(&gate).is_err());
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_waiter_is_served_after_release() {
        let gate = Arc::new(DeviceGate::new());
        let lease = gate.acquire(Duration::from_millis(10)).unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.acquire(Duration::from_secs(5)).map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(30));
        drop(lease);

        assert!(waiter.join().unwrap().is_ok());
    }
}
