use crate::backend::DeviceEnumerator;
use crate::DeviceError;
use flipper_docker_schema::{DeviceBinding, DeviceClaim};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Result of looking for one device. Absence is an expected answer at boot
/// time, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateOutcome {
    Found(DeviceBinding),
    NotFound,
}

impl LocateOutcome {
    pub fn binding(self) -> Option<DeviceBinding> {
        match self {
            LocateOutcome::Found(b) => Some(b),
            LocateOutcome::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LocateOutcome::Found(_))
    }
}

#[derive(Clone)]
pub struct DeviceLocator {
    enumerator: Arc<dyn DeviceEnumerator>,
}

impl DeviceLocator {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self { enumerator }
    }

    pub fn backend_name(&self) -> &str {
        self.enumerator.name()
    }

    /// Match by serial, never by path: host paths are not stable across
    /// reconnects. The first match in enumeration order wins.
    pub fn find(&self, claim: &DeviceClaim) -> Result<LocateOutcome, DeviceError> {
        let devices = self.enumerator.list(claim.class)?;
        Ok(devices
            .into_iter()
            .find(|d| d.serial.as_deref() == Some(claim.identifier.as_str()))
            .map_or(LocateOutcome::NotFound, |d| {
                LocateOutcome::Found(DeviceBinding::new(d.node))
            }))
    }

    /// Like [`find`](Self::find), but reports absence on the log.
    pub fn locate(&self, claim: &DeviceClaim) -> Result<LocateOutcome, DeviceError> {
        let outcome = self.find(claim)?;
        match &outcome {
            LocateOutcome::Found(binding) => {
                debug!("device {claim} at {}", binding.path().display());
            }
            LocateOutcome::NotFound => error!("device {claim} not found"),
        }
        Ok(outcome)
    }
}

/// Poll until `claim` shows up or `timeout` elapses. Returns the last
/// outcome; backend faults end the wait immediately.
pub fn wait_for_device(
    locator: &DeviceLocator,
    claim: &DeviceClaim,
    interval: Duration,
    timeout: Duration,
) -> Result<LocateOutcome, DeviceError> {
    let deadline = Instant::now() + timeout;
    loop {
        let outcome = locator.find(claim)?;
        if outcome.is_found() {
            return Ok(outcome);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(outcome);
        }
        std::thread::sleep(interval.min(deadline - now));
    }
}
