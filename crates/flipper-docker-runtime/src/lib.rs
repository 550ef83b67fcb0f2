//! Container runtime layer for flipper-docker.
//!
//! This crate implements the execution side: the pluggable `ContainerBackend`
//! trait with a docker CLI backend and a scriptable mock, construction of the
//! runner `ContainerSpec` for a run level, and prerequisite checking.

pub mod backend;
pub mod docker;
pub mod mock;
pub mod prereq;
pub mod spec;

pub use backend::{select_backend, ContainerBackend, RunOutcome, StopOutcome};
pub use docker::DockerBackend;
pub use mock::{MockBackend, MockEvent, MOCK_STOPPED_EXIT_CODE};
pub use prereq::{check_docker_prereqs, format_missing, MissingPrereq};
pub use spec::{ContainerSpec, RunnerIdentity, VolumeMount};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("container '{0}' already exists")]
    AlreadyExists(String),
    #[error("container start rejected: {0}")]
    StartFailed(String),
    #[error("waiting for container '{name}' failed: {message}")]
    WaitFailed { name: String, message: String },
    #[error("stopping container '{name}' failed: {message}")]
    StopFailed { name: String, message: String },
}
