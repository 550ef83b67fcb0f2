use crate::DeviceError;
use flipper_docker_schema::DeviceClass;
use std::path::{Path, PathBuf};

/// One attached device as reported by an enumeration backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedDevice {
    pub class: DeviceClass,
    /// Kernel name, e.g. `ttyACM0` or `1-1.2`.
    pub sys_name: String,
    /// Stable serial attribute, if the device exposes one.
    pub serial: Option<String>,
    /// Host device node.
    pub node: PathBuf,
}

pub trait DeviceEnumerator: Send + Sync {
    fn name(&self) -> &str;

    /// List every currently attached device of `class`. An empty list is a
    /// normal answer; `Err` is reserved for backend faults.
    fn list(&self, class: DeviceClass) -> Result<Vec<EnumeratedDevice>, DeviceError>;
}

pub fn select_enumerator(
    name: &str,
    sysfs_root: &Path,
    dev_root: &Path,
) -> Result<Box<dyn DeviceEnumerator>, DeviceError> {
    match name {
        "sysfs" => Ok(Box::new(crate::sysfs::SysfsEnumerator::with_roots(
            sysfs_root, dev_root,
        ))),
        "mock" => Ok(Box::new(crate::mock::MockEnumerator::new())),
        other => Err(DeviceError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_enumerators() {
        let sys = Path::new("/sys");
        let dev = Path::new("/dev");
        assert_eq!(select_enumerator("sysfs", sys, dev).unwrap().name(), "sysfs");
        assert_eq!(select_enumerator("mock", sys, dev).unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_enumerator_fails() {
        assert!(matches!(
            select_enumerator("pyudev", Path::new("/sys"), Path::new("/dev")),
            Err(DeviceError::BackendUnavailable(_))
        ));
    }
}
