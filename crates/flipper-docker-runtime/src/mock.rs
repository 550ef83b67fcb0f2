use crate::backend::{ContainerBackend, RunOutcome, StopOutcome};
use crate::spec::ContainerSpec;
use crate::RuntimeError;
use flipper_docker_schema::ContainerId;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};

/// Exit code reported for a held container that was stopped from outside.
pub const MOCK_STOPPED_EXIT_CODE: i64 = 143;

/// A backend call as observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Run {
        name: ContainerId,
        run_level: Option<String>,
        devices: Vec<PathBuf>,
    },
    Wait(ContainerId),
    Stop {
        name: ContainerId,
        outcome: StopOutcome,
    },
}

#[derive(Default)]
struct MockState {
    exit_codes: VecDeque<i64>,
    start_failures: usize,
    wait_failures: usize,
    hold_wait: bool,
    running: HashSet<ContainerId>,
    stopped: HashSet<ContainerId>,
    events: Vec<MockEvent>,
}

/// Scriptable container backend. Each `run` consumes the next queued exit
/// code (0 once the queue is empty); containers auto-remove when waited on.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    changed: Condvar,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_codes(codes: impl IntoIterator<Item = i64>) -> Self {
        let backend = Self::new();
        if let Ok(mut state) = backend.state.lock() {
            state.exit_codes = codes.into_iter().collect();
        }
        backend
    }

    /// Reject the next `n` starts.
    pub fn fail_starts(&self, n: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.start_failures = n;
        }
    }

    /// Fail the next `n` waits. The container keeps running, as it would when
    /// the client loses its connection to the daemon.
    pub fn fail_waits(&self, n: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.wait_failures = n;
        }
    }

    /// Make `wait` block until the container is stopped.
    pub fn hold_until_stopped(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.hold_wait = true;
        }
    }

    /// Pretend a container with this name is left over from an earlier run.
    pub fn insert_stale(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.running.insert(ContainerId::new(name));
        }
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state
            .lock()
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    pub fn runs(&self) -> Vec<MockEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, MockEvent::Run { .. }))
            .collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.running.contains(&ContainerId::new(name)))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::StartFailed(format!("mutex poisoned: {e}")))
    }
}

impl ContainerBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn run(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError> {
        let mut state = self.lock()?;
        if state.start_failures > 0 {
            state.start_failures -= 1;
            return Err(RuntimeError::StartFailed(format!(
                "mock rejected {}",
                spec.name
            )));
        }
        if state.running.contains(&spec.name) {
            return Err(RuntimeError::AlreadyExists(spec.name.to_string()));
        }
        state.running.insert(spec.name.clone());
        state.stopped.remove(&spec.name);
        state.events.push(MockEvent::Run {
            name: spec.name.clone(),
            run_level: spec.env_value("RUN_LEVEL").map(str::to_owned),
            devices: spec.devices.clone(),
        });
        Ok(spec.name.clone())
    }

    fn wait(&self, id: &ContainerId) -> Result<RunOutcome, RuntimeError> {
        let mut state = self.lock()?;
        state.events.push(MockEvent::Wait(id.clone()));
        if !state.running.contains(id) && !state.stopped.contains(id) {
            return Err(RuntimeError::WaitFailed {
                name: id.to_string(),
                message: "no such container".to_owned(),
            });
        }
        if state.wait_failures > 0 {
            state.wait_failures -= 1;
            return Err(RuntimeError::WaitFailed {
                name: id.to_string(),
                message: "mock lost the connection".to_owned(),
            });
        }

        if state.hold_wait {
            while !state.stopped.contains(id) {
                state = self
                    .changed
                    .wait(state)
                    .map_err(|e| RuntimeError::WaitFailed {
                        name: id.to_string(),
                        message: format!("mutex poisoned: {e}"),
                    })?;
            }
            return Ok(RunOutcome {
                exit_code: MOCK_STOPPED_EXIT_CODE,
                logs: format!("{id}: terminated\n").into_bytes(),
            });
        }

        state.running.remove(id);
        let exit_code = state.exit_codes.pop_front().unwrap_or(0);
        Ok(RunOutcome {
            exit_code,
            logs: format!("{id}: exited with {exit_code}\n").into_bytes(),
        })
    }

    fn stop(&self, id: &ContainerId) -> Result<StopOutcome, RuntimeError> {
        let mut state = self.lock()?;
        let outcome = if state.running.remove(id) {
            state.stopped.insert(id.clone());
            StopOutcome::Stopped
        } else {
            StopOutcome::NotFound
        };
        state.events.push(MockEvent::Stop {
            name: id.clone(),
            outcome,
        });
        drop(state);
        self.changed.notify_all();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::VolumeMount;

    fn spec(name: &str, level: &str) -> ContainerSpec {
        ContainerSpec {
            name: ContainerId::new(name),
            image: "runner:mock".to_owned(),
            env: vec![("RUN_LEVEL".to_owned(), level.to_owned())],
            devices: vec![PathBuf::from("/dev/ttyACM0")],
            volumes: vec![VolumeMount {
                host: PathBuf::from("/opt/x"),
                container: "/opt/toolchain".to_owned(),
            }],
            auto_remove: true,
            detach: true,
        }
    }

    #[test]
    fn mock_scripted_exit_codes() {
        let backend = MockBackend::with_exit_codes([0, 3]);
        let id = backend.run(&spec("a", "REPAIR")).unwrap();
        assert_eq!(backend.wait(&id).unwrap().exit_code, 0);
        let id = backend.run(&spec("a", "NORMAL")).unwrap();
        assert_eq!(backend.wait(&id).unwrap().exit_code, 3);
        let id = backend.run(&spec("a", "NORMAL")).unwrap();
        assert_eq!(backend.wait(&id).unwrap().exit_code, 0);
        assert_eq!(backend.runs().len(), 3);
    }

    #[test]
    fn mock_enforces_unique_names() {
        let backend = MockBackend::new();
        backend.insert_stale("flip");
        assert!(matches!(
            backend.run(&spec("flip", "REPAIR")),
            Err(RuntimeError::AlreadyExists(_))
        ));
    }

    #[test]
    fn mock_auto_removes_after_wait() {
        let backend = MockBackend::new();
        let id = backend.run(&spec("flip", "REPAIR")).unwrap();
        assert!(backend.is_running("flip"));
        backend.wait(&id).unwrap();
        assert!(!backend.is_running("flip"));
        assert_eq!(backend.stop(&id).unwrap(), StopOutcome::NotFound);
    }

    #[test]
    fn mock_fail_starts() {
        let backend = MockBackend::new();
        backend.fail_starts(1);
        assert!(backend.run(&spec("flip", "REPAIR")).is_err());
        assert!(backend.run(&spec("flip", "REPAIR")).is_ok());
    }

    #[test]
    fn failed_wait_leaves_container_running() {
        let backend = MockBackend::new();
        backend.fail_waits(1);
        let id = backend.run(&spec("flip", "REPAIR")).unwrap();
        assert!(matches!(
            backend.wait(&id),
            Err(RuntimeError::WaitFailed { .. })
        ));
        assert!(backend.is_running("flip"));
        assert_eq!(backend.stop(&id).unwrap(), StopOutcome::Stopped);
    }

    #[test]
    fn held_wait_returns_after_stop() {
        let backend = std::sync::Arc::new(MockBackend::new());
        backend.hold_until_stopped();
        let id = backend.run(&spec("flip", "NORMAL")).unwrap();

        let waiter = {
            let backend = backend.clone();
            let id = id.clone();
            std::thread::spawn(move || backend.wait(&id))
        };
        // Give the waiter a chance to block; correctness does not depend on it.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(backend.stop(&id).unwrap(), StopOutcome::Stopped);

        let outcome = waiter.join().unwrap().unwrap();
        assert_eq!(outcome.exit_code, MOCK_STOPPED_EXIT_CODE);
    }
}
