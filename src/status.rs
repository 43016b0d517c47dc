use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::device::DeviceCommandExecutor;
use crate::errors::DeviceError;

static MAX_WIDTH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<max_width>\d+)px").expect("width pattern is valid"));

/// Result of one status query. Never cached: the tape can be swapped
/// between jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub max_print_width_px: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

/// Extracts the printable width from status output. The first
/// `<digits>px` token decides; a token that is zero or does not fit a
/// `u32` counts as no width.
pub fn parse_max_width(stdout: &str) -> Option<u32> {
    let captures = MAX_WIDTH_PATTERN.captures(stdout)?;
    let width: u32 = captures["max_width"].parse().ok()?;
    (width > 0).then_some(width)
}

pub struct DeviceStatusProbe {
    executor: DeviceCommandExecutor,
}

impl DeviceStatusProbe {
    pub fn new(executor: DeviceCommandExecutor) -> Self {
        DeviceStatusProbe { executor }
    }

    pub fn executor(&self) -> &DeviceCommandExecutor {
        &self.executor
    }

    /// A single status query. A missing width is reported, not retried.
    pub async fn probe(&self) -> Result<DeviceStatus, DeviceError> {
        let outcome = self.executor.execute(&[]).await?;
        let max_print_width_px = parse_max_width(&outcome.stdout);
        debug!("Probed device width: {:?}", max_print_width_px);

        Ok(DeviceStatus {
            max_print_width_px,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }

    /// Healthy iff the status query reports a width and nothing on stderr.
    pub async fn healthy(&self) -> bool {
        match self.probe().await {
            Ok(status) => status.max_print_width_px.is_some() && status.stderr.is_empty(),
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}

/// The one physical printer. Every device CLI call goes through the guard
/// returned by `acquire`, so commands from different jobs never overlap.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<Mutex<DeviceStatusProbe>>,
}

impl DeviceHandle {
    pub fn new(probe: DeviceStatusProbe) -> Self {
        DeviceHandle {
            inner: Arc::new(Mutex::new(probe)),
        }
    }

    pub async fn acquire(&self) -> MutexGuard<'_, DeviceStatusProbe> {
        self.inner.lock().await
    }
}
