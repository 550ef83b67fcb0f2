//! Supervision and sequencing for flipper-docker.
//!
//! This crate ties device resolution and the container runtime together into
//! the `RunLevelController`: the state machine that walks the run levels in
//! order, grants each attempt the devices present at that moment, supervises
//! exactly one container at a time through the `ContainerSupervisor`, and
//! decides from the exit code whether to advance or abort. It also provides
//! signal handling that stops the live container on interruption, transition
//! validation, and host helpers.

pub mod concurrency;
pub mod controller;
pub mod host;
pub mod lifecycle;
pub mod supervisor;

pub use concurrency::{install_signal_handler, ShutdownSignal};
pub use controller::{
    AbortReason, Attempt, ControllerOptions, RunEvent, RunLevelController, RunReport, SettlePoll,
};
pub use host::{ensure_toolchain_dir, hostname};
pub use lifecycle::{validate_transition, RunState};
pub use supervisor::{ContainerHandle, ContainerStopper, ContainerSupervisor};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] flipper_docker_schema::ConfigError),
    #[error("device error: {0}")]
    Device(#[from] flipper_docker_devices::DeviceError),
    #[error("runtime error: {0}")]
    Runtime(#[from] flipper_docker_runtime::RuntimeError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("container '{0}' is still live; only one container may run at a time")]
    ContainerAlreadyLive(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
