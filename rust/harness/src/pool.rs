//! Shared pool of free devices.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::device::Device;

/// Free devices plus a permit per free device.
///
/// A device is either in `free` or held by exactly one [`DeviceLease`].
pub struct DevicePool {
    free: Mutex<VecDeque<Device>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl DevicePool {
    #[must_use]
    pub fn new(devices: Vec<Device>) -> Arc<Self> {
        let size = devices.len();
        Arc::new(Self {
            free: Mutex::new(devices.into()),
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    /// Wait for a free device.
    pub async fn acquire(self: &Arc<Self>) -> Result<DeviceLease, PoolError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        let device = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(PoolError::Exhausted)?;
        tracing::debug!("Leased device {}", device.index);
        Ok(DeviceLease {
            pool: Arc::clone(self),
            device,
            _permit: permit,
        })
    }

    /// Number of devices not currently leased.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    fn give_back(&self, device: Device) {
        tracing::debug!("Released device {}", device.index);
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(device);
    }
}

/// Exclusive use of one device; returned to the pool on drop.
pub struct DeviceLease {
    pool: Arc<DevicePool>,
    device: Device,
    // Dropped after `Drop::drop` has put the device back.
    _permit: OwnedSemaphorePermit,
}

impl DeviceLease {
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn release(self) {}
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.pool.give_back(self.device.clone());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("device pool closed")]
    Closed,
    #[error("device pool granted a permit without a free device")]
    Exhausted,
}
