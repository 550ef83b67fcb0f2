//! Configuration and domain vocabulary for flipper-docker.
//!
//! This crate defines the schema layer shared by every other crate: the TOML
//! configuration file (`Config`) with its registration, log-shipping, and runner
//! sections; the ordered `RunLevel` sequence; and the device vocabulary
//! (`DeviceClass`, `DeviceClaim`, `DeviceBinding`, `DeviceRole`) used when
//! binding attached hardware to a runner container.

pub mod config;
pub mod types;

pub use config::{
    default_config_path, Config, ConfigError, GelfSection, GithubSection, RunnerSection,
    DEFAULT_CONFIG_PATH, DEFAULT_IMAGE, DEFAULT_MOUNT_PATH, DEFAULT_SETTLE_SECS,
    DEFAULT_TOOLCHAIN_ROOT,
};
pub use types::{
    ContainerId, DeviceBinding, DeviceClaim, DeviceClass, DeviceRole, HardwareId, RunLevel,
};
