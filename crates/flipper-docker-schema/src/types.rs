//! Identifiers, run levels, and device vocabulary.
//!
//! String newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Stable hardware serial of a device (udev `ID_SERIAL_SHORT`).
    HardwareId
);

string_newtype!(
    /// Name or id the container runtime knows a container by.
    ContainerId
);

/// A phase of the supervised sequence. Iterated once per process, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunLevel {
    Repair,
    Normal,
}

impl RunLevel {
    pub const ALL: [RunLevel; 2] = [RunLevel::Repair, RunLevel::Normal];

    /// Name handed to the runner container in `RUN_LEVEL`.
    pub fn as_str(self) -> &'static str {
        match self {
            RunLevel::Repair => "REPAIR",
            RunLevel::Normal => "NORMAL",
        }
    }

    pub fn next(self) -> Option<RunLevel> {
        match self {
            RunLevel::Repair => Some(RunLevel::Normal),
            RunLevel::Normal => None,
        }
    }

    /// Whether the target device itself must be granted to the container.
    pub fn needs_target(self) -> bool {
        matches!(self, RunLevel::Normal)
    }
}

impl fmt::Display for RunLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Serial,
    Usb,
}

impl DeviceClass {
    /// Kernel subsystem the class enumerates under.
    pub fn subsystem(self) -> &'static str {
        match self {
            DeviceClass::Serial => "tty",
            DeviceClass::Usb => "usb",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subsystem())
    }
}

/// Request to locate one physical device. Created per resolution call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClaim {
    pub identifier: HardwareId,
    pub class: DeviceClass,
}

impl DeviceClaim {
    pub fn new(identifier: impl Into<HardwareId>, class: DeviceClass) -> Self {
        Self {
            identifier: identifier.into(),
            class,
        }
    }
}

impl fmt::Display for DeviceClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier, self.class)
    }
}

/// A resolved host device path, ready to be granted to a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceBinding {
    pub host_path: PathBuf,
}

impl DeviceBinding {
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.host_path
    }
}

/// Position of a device in the container's device-grant list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    FlasherSerial,
    FlasherUsb,
    TargetSerial,
}

impl DeviceRole {
    pub fn class(self) -> DeviceClass {
        match self {
            DeviceRole::FlasherSerial | DeviceRole::TargetSerial => DeviceClass::Serial,
            DeviceRole::FlasherUsb => DeviceClass::Usb,
        }
    }

    /// Roles required at a run level, in grant order.
    pub fn for_run_level(level: RunLevel) -> &'static [DeviceRole] {
        if level.needs_target() {
            &[
                DeviceRole::FlasherSerial,
                DeviceRole::FlasherUsb,
                DeviceRole::TargetSerial,
            ]
        } else {
            &[DeviceRole::FlasherSerial, DeviceRole::FlasherUsb]
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceRole::FlasherSerial => "flasher-serial",
            DeviceRole::FlasherUsb => "flasher-usb",
            DeviceRole::TargetSerial => "target-serial",
        };
        f.write_str(s)
    }
}
