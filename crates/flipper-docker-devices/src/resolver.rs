use crate::locator::{DeviceLocator, LocateOutcome};
use flipper_docker_schema::{
    DeviceBinding, DeviceClaim, DeviceRole, HardwareId, RunLevel,
};
use std::path::{Path, PathBuf};
use tracing::error;

/// One position in the device-grant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSlot {
    pub role: DeviceRole,
    pub claim: DeviceClaim,
    pub binding: Option<DeviceBinding>,
    /// Backend fault message when the slot is unresolved for a reason other
    /// than absence.
    pub fault: Option<String>,
}

/// Best-effort device set for one container attempt. Slots keep grant order
/// even when some of them are unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSet {
    pub slots: Vec<DeviceSlot>,
}

impl DeviceSet {
    /// Resolved host paths, in grant order.
    pub fn bindings(&self) -> impl Iterator<Item = &Path> + '_ {
        self.slots
            .iter()
            .filter_map(|s| s.binding.as_ref().map(DeviceBinding::path))
    }

    /// The full grant list, or `None` when any slot is unresolved. Dropping a
    /// gap would shift every later device into the wrong position.
    pub fn grants(&self) -> Option<Vec<PathBuf>> {
        self.slots
            .iter()
            .map(|s| s.binding.as_ref().map(|b| b.path().to_path_buf()))
            .collect()
    }

    pub fn missing(&self) -> Vec<DeviceRole> {
        self.slots
            .iter()
            .filter(|s| s.binding.is_none())
            .map(|s| s.role)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| s.binding.is_some())
    }

    pub fn slot(&self, role: DeviceRole) -> Option<&DeviceSlot> {
        self.slots.iter().find(|s| s.role == role)
    }
}

/// Resolve the devices a run level needs: flasher serial and flasher USB
/// always, the target's serial only at `Normal`. A missing device or a
/// backend fault leaves its slot empty and resolution continues.
pub fn resolve_devices(
    locator: &DeviceLocator,
    level: RunLevel,
    flasher_id: &HardwareId,
    target_id: &HardwareId,
) -> DeviceSet {
    let slots = DeviceRole::for_run_level(level)
        .iter()
        .map(|&role| {
            let identifier = match role {
                DeviceRole::FlasherSerial | DeviceRole::FlasherUsb => flasher_id,
                DeviceRole::TargetSerial => target_id,
            };
            let claim = DeviceClaim::new(identifier.clone(), role.class());
            match locator.locate(&claim) {
                Ok(LocateOutcome::Found(binding)) => DeviceSlot {
                    role,
                    claim,
                    binding: Some(binding),
                    fault: None,
                },
                Ok(LocateOutcome::NotFound) => DeviceSlot {
                    role,
                    claim,
                    binding: None,
                    fault: None,
                },
                Err(e) => {
                    error!("failed to locate {role} {claim}: {e}");
                    DeviceSlot {
                        role,
                        claim,
                        binding: None,
                        fault: Some(e.to_string()),
                    }
                }
            }
        })
        .collect();

    DeviceSet { slots }
}
