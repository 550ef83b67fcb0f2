//! Host device discovery for flipper-docker.
//!
//! This crate turns stable hardware serials into host device paths: a pluggable
//! `DeviceEnumerator` trait with a sysfs backend and an in-memory mock, the
//! `DeviceLocator` that distinguishes "not attached right now" from backend
//! faults, and the `resolve_devices` step that assembles the ordered device set
//! a run level grants to its container.

pub mod backend;
pub mod locator;
pub mod mock;
pub mod resolver;
pub mod sysfs;

pub use backend::{select_enumerator, DeviceEnumerator, EnumeratedDevice};
pub use locator::{wait_for_device, DeviceLocator, LocateOutcome};
pub use mock::MockEnumerator;
pub use resolver::{resolve_devices, DeviceSet, DeviceSlot};
pub use sysfs::SysfsEnumerator;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device enumeration I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("device backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
}
