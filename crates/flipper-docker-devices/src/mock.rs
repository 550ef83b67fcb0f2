use crate::backend::{DeviceEnumerator, EnumeratedDevice};
use crate::DeviceError;
use flipper_docker_schema::DeviceClass;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    devices: Vec<EnumeratedDevice>,
    failing: Vec<DeviceClass>,
    queries: usize,
}

/// In-memory device tree. Devices can be attached and detached while a
/// controller runs, to mimic re-enumeration after a reboot.
#[derive(Default)]
pub struct MockEnumerator {
    state: Mutex<MockState>,
}

impl MockEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, class: DeviceClass, serial: &str, node: impl Into<PathBuf>) {
        let node = node.into();
        let sys_name = node
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        if let Ok(mut state) = self.state.lock() {
            state.devices.push(EnumeratedDevice {
                class,
                sys_name,
                serial: Some(serial.to_owned()),
                node,
            });
        }
    }

    pub fn detach(&self, serial: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .devices
                .retain(|d| d.serial.as_deref() != Some(serial));
        }
    }

    /// Make every listing of `class` fail with a backend fault.
    pub fn fail_class(&self, class: DeviceClass) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.push(class);
        }
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().map_or(0, |s| s.queries)
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list(&self, class: DeviceClass) -> Result<Vec<EnumeratedDevice>, DeviceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| DeviceError::Enumeration(format!("mutex poisoned: {e}")))?;
        state.queries += 1;
        if state.failing.contains(&class) {
            return Err(DeviceError::Enumeration(format!(
                "mock failure listing {class}"
            )));
        }
        Ok(state
            .devices
            .iter()
            .filter(|d| d.class == class)
            .cloned()
            .collect())
    }
}
