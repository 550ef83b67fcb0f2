use crate::backend::{DeviceEnumerator, EnumeratedDevice};
use crate::DeviceError;
use flipper_docker_schema::DeviceClass;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Enumerates devices straight from the kernel's sysfs tree.
///
/// The serial attribute used for matching is the one udev reports as
/// `ID_SERIAL_SHORT`: the `serial` file of the owning USB device. For tty
/// nodes that device is found by walking up from the tty's `device` link.
pub struct SysfsEnumerator {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for SysfsEnumerator {
    fn default() -> Self {
        Self::with_roots("/sys", "/dev")
    }
}

impl SysfsEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    fn list_serial(&self) -> Result<Vec<EnumeratedDevice>, DeviceError> {
        let class_dir = self.sysfs_root.join("class/tty");
        let root = canonical_or_self(&self.sysfs_root);
        let mut devices = Vec::new();

        for name in sorted_entries(&class_dir)? {
            let link = class_dir.join(&name).join("device");
            // Virtual consoles and ptys have no backing device.
            let Ok(device_dir) = fs::canonicalize(&link) else {
                continue;
            };
            let serial = usb_serial_above(&device_dir, &root)?;
            devices.push(EnumeratedDevice {
                class: DeviceClass::Serial,
                node: self.dev_root.join(&name),
                sys_name: name,
                serial,
            });
        }

        Ok(devices)
    }

    fn list_usb(&self) -> Result<Vec<EnumeratedDevice>, DeviceError> {
        let bus_dir = self.sysfs_root.join("bus/usb/devices");
        let mut devices = Vec::new();

        for name in sorted_entries(&bus_dir)? {
            let dir = bus_dir.join(&name);
            // Interfaces carry no bus/dev numbers and have no device node.
            let (Some(busnum), Some(devnum)) = (
                read_attr(&dir.join("busnum"))?,
                read_attr(&dir.join("devnum"))?,
            ) else {
                continue;
            };
            let busnum = parse_number(&dir, "busnum", &busnum)?;
            let devnum = parse_number(&dir, "devnum", &devnum)?;
            devices.push(EnumeratedDevice {
                class: DeviceClass::Usb,
                node: self
                    .dev_root
                    .join(format!("bus/usb/{busnum:03}/{devnum:03}")),
                serial: read_serial(&dir.join("serial"))?,
                sys_name: name,
            });
        }

        Ok(devices)
    }
}

impl DeviceEnumerator for SysfsEnumerator {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn list(&self, class: DeviceClass) -> Result<Vec<EnumeratedDevice>, DeviceError> {
        match class {
            DeviceClass::Serial => self.list_serial(),
            DeviceClass::Usb => self.list_usb(),
        }
    }
}

fn canonical_or_self(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Directory entry names in sorted order. A missing directory means the
/// subsystem has no devices.
fn sorted_entries(dir: &Path) -> Result<Vec<String>, DeviceError> {
    let io_err = |source| DeviceError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let iter = match fs::read_dir(dir) {
        Ok(iter) => iter,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(e)),
    };
    let mut names = Vec::new();
    for entry in iter {
        let entry = entry.map_err(io_err)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn read_attr(path: &Path) -> Result<Option<String>, DeviceError> {
    match fs::read_to_string(path) {
        Ok(value) => {
            let value = value.trim();
            Ok((!value.is_empty()).then(|| value.to_owned()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DeviceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read a raw `serial` attribute in the form udev exports as
/// `ID_SERIAL_SHORT`.
fn read_serial(path: &Path) -> Result<Option<String>, DeviceError> {
    match fs::read(path) {
        Ok(raw) => {
            let serial = udev_serial(&raw);
            Ok((!serial.is_empty()).then_some(serial))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DeviceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// udev's sanitising of USB string descriptors: surrounding whitespace is
/// dropped, each inner whitespace run becomes one `_`, and anything outside
/// `[0-9A-Za-z#+-.:=@_]` other than valid non-ASCII UTF-8 becomes `_`.
pub fn udev_serial(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.trim_matches(|c: char| c.is_ascii_whitespace()).chars() {
        if c.is_ascii_whitespace() {
            in_space = true;
            continue;
        }
        if in_space {
            out.push('_');
            in_space = false;
        }
        let keep = c.is_ascii_alphanumeric()
            || "#+-.:=@_".contains(c)
            || (!c.is_ascii() && c != char::REPLACEMENT_CHARACTER);
        out.push(if keep { c } else { '_' });
    }
    out
}

fn parse_number(dir: &Path, attr: &str, raw: &str) -> Result<u32, DeviceError> {
    raw.parse().map_err(|_| {
        DeviceError::Enumeration(format!(
            "invalid {attr} '{raw}' in {}",
            dir.display()
        ))
    })
}

/// Walk from `start` toward `root` and return the serial of the first USB
/// device (a directory with both `idVendor` and `serial`).
fn usb_serial_above(start: &Path, root: &Path) -> Result<Option<String>, DeviceError> {
    for dir in start.ancestors() {
        if !dir.starts_with(root) || dir == root {
            break;
        }
        if dir.join("idVendor").is_file() {
            return read_serial(&dir.join("serial"));
        }
    }
    Ok(None)
}
