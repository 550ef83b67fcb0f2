use crate::CoreError;
use flipper_docker_runtime::{ContainerBackend, ContainerSpec, RunOutcome, StopOutcome};
use flipper_docker_schema::ContainerId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

type LiveSlot = Arc<Mutex<Option<ContainerId>>>;

fn lock(slot: &LiveSlot) -> MutexGuard<'_, Option<ContainerId>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the lifecycle of the one container this process runs at a time.
pub struct ContainerSupervisor {
    backend: Arc<dyn ContainerBackend>,
    live: LiveSlot,
}

impl ContainerSupervisor {
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Self {
        Self {
            backend,
            live: Arc::new(Mutex::new(None)),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Start a container. Fails while another handle is live or when the
    /// backend rejects the spec.
    pub fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, CoreError> {
        let mut live = lock(&self.live);
        if let Some(existing) = live.as_ref() {
            return Err(CoreError::ContainerAlreadyLive(existing.to_string()));
        }
        let id = self.backend.run(spec)?;
        info!("container {id} started");
        *live = Some(id.clone());
        Ok(ContainerHandle {
            backend: Arc::clone(&self.backend),
            live: Arc::clone(&self.live),
            id,
            armed: true,
        })
    }

    /// Block until the container exits, with no timeout. On success the
    /// handle is disarmed so the crash-cleanup stop never fires for a
    /// container that already exited and removed itself.
    pub fn await_exit(&self, mut handle: ContainerHandle) -> Result<RunOutcome, CoreError> {
        debug!("waiting for container {}", handle.id);
        let outcome = self.backend.wait(&handle.id)?;
        handle.armed = false;
        Ok(outcome)
    }

    /// Stop the live container, if any. Idempotent.
    pub fn force_stop(&self) -> Result<StopOutcome, CoreError> {
        self.stopper().force_stop()
    }

    pub fn live(&self) -> Option<ContainerId> {
        lock(&self.live).clone()
    }

    /// A cloneable handle that can stop the live container from another
    /// thread, such as a signal handler.
    pub fn stopper(&self) -> ContainerStopper {
        ContainerStopper {
            backend: Arc::clone(&self.backend),
            live: Arc::clone(&self.live),
        }
    }
}

/// Guard for the live container. Dropping an armed handle (error path,
/// unwinding panic) stops the container. Owns its share of the backend and
/// live slot, so it does not borrow the supervisor.
pub struct ContainerHandle {
    backend: Arc<dyn ContainerBackend>,
    live: LiveSlot,
    id: ContainerId,
    armed: bool,
}

impl ContainerHandle {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if self.armed {
            match self.backend.stop(&self.id) {
                Ok(StopOutcome::Stopped) => {
                    info!("container {} stopped due to app exit", self.id);
                }
                Ok(StopOutcome::NotFound) => {
                    info!("nothing to stop, container {} not found", self.id);
                }
                Err(e) => warn!("failed to stop container {}: {e}", self.id),
            }
        }
        *lock(&self.live) = None;
    }
}

#[derive(Clone)]
pub struct ContainerStopper {
    backend: Arc<dyn ContainerBackend>,
    live: LiveSlot,
}

impl ContainerStopper {
    /// Stop the live container. A no-op returning `NotFound` when nothing is
    /// live or the container is already gone.
    pub fn force_stop(&self) -> Result<StopOutcome, CoreError> {
        let Some(id) = lock(&self.live).clone() else {
            return Ok(StopOutcome::NotFound);
        };
        Ok(self.backend.stop(&id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipper_docker_runtime::{MockBackend, MockEvent};
    use flipper_docker_schema::{GithubSection, RunLevel, RunnerSection};
    use flipper_docker_runtime::RunnerIdentity;

    fn spec(level: RunLevel) -> ContainerSpec {
        ContainerSpec::for_run_level(
            level,
            &RunnerIdentity::new("flip_A", "STLINK", "tag", "host"),
            &GithubSection {
                org_name: "org".to_owned(),
                access_token: "tok".to_owned(),
            },
            &RunnerSection::default(),
            Vec::new(),
        )
    }

    fn stops(backend: &MockBackend) -> usize {
        backend
            .events()
            .iter()
            .filter(|e| matches!(e, MockEvent::Stop { .. }))
            .count()
    }

    #[test]
    fn start_then_await_clears_handle() {
        let backend = Arc::new(MockBackend::with_exit_codes([0]));
        let sup = ContainerSupervisor::new(backend.clone());

        let handle = sup.start(&spec(RunLevel::Repair)).unwrap();
        assert_eq!(sup.live(), Some(ContainerId::new("flip_A")));
        let outcome = sup.await_exit(handle).unwrap();
        assert!(outcome.success());
        assert!(sup.live().is_none());
        assert_eq!(stops(&backend), 0);
    }

    #[test]
    fn second_start_while_live_fails() {
        let backend = Arc::new(MockBackend::new());
        let sup = ContainerSupervisor::new(backend.clone());

        let handle = sup.start(&spec(RunLevel::Repair)).unwrap();
        assert!(matches!(
            sup.start(&spec(RunLevel::Normal)),
            Err(CoreError::ContainerAlreadyLive(_))
        ));
        assert_eq!(backend.runs().len(), 1);
        drop(handle);
    }

    #[test]
    fn dropping_armed_handle_stops_container() {
        let backend = Arc::new(MockBackend::new());
        let sup = ContainerSupervisor::new(backend.clone());

        {
            let _handle = sup.start(&spec(RunLevel::Repair)).unwrap();
        }
        assert!(sup.live().is_none());
        assert!(!backend.is_running("flip_A"));
        assert_eq!(stops(&backend), 1);
    }

    #[test]
    fn cleanup_does_not_fire_after_normal_exit() {
        let backend = Arc::new(MockBackend::new());
        let sup = ContainerSupervisor::new(backend.clone());
        let stopper = sup.stopper();

        let handle = sup.start(&spec(RunLevel::Repair)).unwrap();
        sup.await_exit(handle).unwrap();

        assert_eq!(stopper.force_stop().unwrap(), StopOutcome::NotFound);
        assert_eq!(stops(&backend), 0);
    }

    #[test]
    fn handle_owns_its_cleanup() {
        let backend = Arc::new(MockBackend::new());
        let mut sup = ContainerSupervisor::new(backend.clone());
        let handle = sup.start(&spec(RunLevel::Repair)).unwrap();

        // The handle holds no borrow: the supervisor can be replaced while
        // the container is live, and the handle still stops it.
        sup = ContainerSupervisor::new(Arc::new(MockBackend::new()));
        drop(handle);
        assert_eq!(stops(&backend), 1);
        assert!(!backend.is_running("flip_A"));
        assert!(sup.live().is_none());
    }

    #[test]
    fn force_stop_without_container_is_noop() {
        let backend = Arc::new(MockBackend::new());
        let sup = ContainerSupervisor::new(backend.clone());
        assert_eq!(sup.force_stop().unwrap(), StopOutcome::NotFound);
        assert_eq!(sup.force_stop().unwrap(), StopOutcome::NotFound);
        assert!(backend.events().is_empty());
    }

    #[test]
    fn rejected_start_leaves_no_live_handle() {
        let backend = Arc::new(MockBackend::new());
        backend.insert_stale("flip_A");
        let sup = ContainerSupervisor::new(backend.clone());
        assert!(matches!(
            sup.start(&spec(RunLevel::Repair)),
            Err(CoreError::Runtime(_))
        ));
        assert!(sup.live().is_none());
    }

    #[test]
    fn stopper_unblocks_wait_from_another_thread() {
        let backend = Arc::new(MockBackend::new());
        backend.hold_until_stopped();
        let sup = ContainerSupervisor::new(backend.clone());
        let stopper = sup.stopper();

        let handle = sup.start(&spec(RunLevel::Normal)).unwrap();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            stopper.force_stop().unwrap()
        });
        let outcome = sup.await_exit(handle).unwrap();
        assert_eq!(killer.join().unwrap(), StopOutcome::Stopped);
        assert!(!outcome.success());
        assert!(sup.live().is_none());
    }
}
