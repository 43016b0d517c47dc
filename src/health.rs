use tracing::info;

use crate::status::DeviceHandle;

/// Liveness of the printer: one status probe, no retries.
#[derive(Clone)]
pub struct HealthReporter {
    device: DeviceHandle,
}

impl HealthReporter {
    pub fn new(device: DeviceHandle) -> Self {
        HealthReporter { device }
    }

    pub async fn is_healthy(&self) -> bool {
        // Shares the device lock, so a check waits for a running job
        let device = self.device.acquire().await;
        let healthy = device.healthy().await;
        if !healthy {
            info!("Device reported unhealthy");
        }
        healthy
    }
}
