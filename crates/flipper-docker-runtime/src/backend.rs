use crate::spec::ContainerSpec;
use crate::RuntimeError;
use flipper_docker_schema::ContainerId;

/// What a finished container left behind. Produced once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i64,
    pub logs: Vec<u8>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn logs_lossy(&self) -> String {
        String::from_utf8_lossy(&self.logs).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Nothing to stop: the container already exited and was removed.
    NotFound,
}

pub trait ContainerBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Start the container in the background. Names are unique: a leftover
    /// container with the same name makes this fail.
    fn run(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError>;

    /// Block until the container exits. Exit code and logs are captured
    /// together, before auto-removal can discard the logs.
    fn wait(&self, id: &ContainerId) -> Result<RunOutcome, RuntimeError>;

    fn stop(&self, id: &ContainerId) -> Result<StopOutcome, RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn ContainerBackend>, RuntimeError> {
    match name {
        "docker" => Ok(Box::new(crate::docker::DockerBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        assert!(select_backend("docker").is_ok());
        assert!(select_backend("mock").is_ok());
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(select_backend("lxc").is_err());
    }

    #[test]
    fn outcome_success_only_on_zero() {
        let ok = RunOutcome {
            exit_code: 0,
            logs: Vec::new(),
        };
        let failed = RunOutcome {
            exit_code: 3,
            logs: b"registration failed\n".to_vec(),
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert_eq!(failed.logs_lossy(), "registration failed\n");
    }
}
