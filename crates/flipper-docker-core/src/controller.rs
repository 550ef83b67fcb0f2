use crate::concurrency::ShutdownSignal;
use crate::host::ensure_toolchain_dir;
use crate::lifecycle::{validate_transition, RunState};
use crate::supervisor::{ContainerStopper, ContainerSupervisor};
use crate::CoreError;
use flipper_docker_devices::{resolve_devices, wait_for_device, DeviceLocator, DeviceSet};
use flipper_docker_runtime::{ContainerSpec, RunnerIdentity};
use flipper_docker_schema::{
    DeviceClaim, DeviceClass, DeviceRole, GithubSection, RunLevel, RunnerSection,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePoll {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Fixed wait after a clean Repair, for the target to reboot and
    /// re-enumerate.
    pub settle_delay: Duration,
    /// Optional bounded poll for the target's serial after the fixed wait.
    pub settle_poll: Option<SettlePoll>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(flipper_docker_schema::DEFAULT_SETTLE_SECS),
            settle_poll: None,
        }
    }
}

impl ControllerOptions {
    pub fn from_runner(runner: &RunnerSection) -> Self {
        Self {
            settle_delay: Duration::from_secs(runner.settle_secs),
            settle_poll: runner.settle_poll_timeout_secs.map(|secs| SettlePoll {
                interval: Duration::from_millis(500),
                timeout: Duration::from_secs(secs),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    NonZeroExit { level: RunLevel, exit_code: i64 },
    /// A required device was not resolved. Grants are positional, so the
    /// container is never started with a partial list.
    IncompleteDevices { level: RunLevel, missing: Vec<DeviceRole> },
    StartFailed { level: RunLevel, message: String },
    WaitFailed { level: RunLevel, message: String },
    Interrupted { level: RunLevel },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::NonZeroExit { level, exit_code } => {
                write!(f, "{level} container exited with code {exit_code}")
            }
            AbortReason::IncompleteDevices { level, missing } => {
                let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
                write!(f, "{level} is missing devices: {}", names.join(", "))
            }
            AbortReason::StartFailed { level, message } => {
                write!(f, "{level} container failed to start: {message}")
            }
            AbortReason::WaitFailed { level, message } => {
                write!(f, "lost track of {level} container: {message}")
            }
            AbortReason::Interrupted { level } => write!(f, "interrupted during {level}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Transition { from: RunState, to: RunState },
    ContainerStarted { level: RunLevel },
    ContainerExited { level: RunLevel, exit_code: i64 },
    Settle { delay: Duration },
    TargetPolled { found: bool },
}

/// One container attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub level: RunLevel,
    pub devices: DeviceSet,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub state: RunState,
    pub attempts: Vec<Attempt>,
    pub events: Vec<RunEvent>,
    pub abort: Option<AbortReason>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn settled(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, RunEvent::Settle { .. }))
    }
}

/// Walks Repair then Normal, one supervised container per level.
pub struct RunLevelController {
    identity: RunnerIdentity,
    registration: GithubSection,
    runner: RunnerSection,
    locator: DeviceLocator,
    supervisor: ContainerSupervisor,
    options: ControllerOptions,
    shutdown: ShutdownSignal,
    state: RunState,
}

impl RunLevelController {
    pub fn new(
        identity: RunnerIdentity,
        registration: GithubSection,
        runner: RunnerSection,
        locator: DeviceLocator,
        supervisor: ContainerSupervisor,
    ) -> Self {
        let options = ControllerOptions::from_runner(&runner);
        Self {
            identity,
            registration,
            runner,
            locator,
            supervisor,
            options,
            shutdown: ShutdownSignal::new(),
            state: RunState::Repair,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stopper(&self) -> ContainerStopper {
        self.supervisor.stopper()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run the whole sequence once. Only a failure to prepare the toolchain
    /// directory or an internal transition bug is returned as `Err`; every
    /// container-level problem ends in `RunState::Aborted`.
    pub fn run(&mut self) -> Result<RunReport, CoreError> {
        info!(
            "app started for {} (flasher {}, {} backend)",
            self.identity.flipper_id,
            self.identity.st_link_id,
            self.supervisor.backend_name()
        );
        ensure_toolchain_dir(&self.runner.toolchain_root, &self.identity.flipper_id)?;

        let mut report = RunReport {
            state: self.state,
            attempts: Vec::new(),
            events: Vec::new(),
            abort: None,
        };

        while let Some(level) = self.state.run_level() {
            if self.shutdown.is_requested() {
                self.abort(&mut report, AbortReason::Interrupted { level })?;
                continue;
            }
            debug!("running into {level} mode");
            self.step(level, &mut report)?;
        }

        report.state = self.state;
        match &report.abort {
            None => info!("all run levels completed"),
            Some(reason) => error!("run aborted: {reason}"),
        }
        Ok(report)
    }

    fn step(&mut self, level: RunLevel, report: &mut RunReport) -> Result<(), CoreError> {
        // Resolved fresh each attempt: Repair may have rebooted the target.
        let devices = resolve_devices(
            &self.locator,
            level,
            &self.identity.st_link_id,
            &self.identity.flipper_id,
        );
        let grants = devices.grants();
        let missing = devices.missing();
        report.attempts.push(Attempt {
            level,
            devices,
            exit_code: None,
        });
        let Some(grants) = grants else {
            error!("not starting {level} container, device set is incomplete");
            return self.abort(report, AbortReason::IncompleteDevices { level, missing });
        };

        let spec = ContainerSpec::for_run_level(
            level,
            &self.identity,
            &self.registration,
            &self.runner,
            grants,
        );

        let started = self.supervisor.start(&spec);
        let handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to start {level} container: {e}");
                let message = e.to_string();
                return self.abort(report, AbortReason::StartFailed { level, message });
            }
        };
        report.events.push(RunEvent::ContainerStarted { level });

        let exited = self.supervisor.await_exit(handle);
        let outcome = match exited {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("failed waiting for {level} container: {e}");
                let message = e.to_string();
                return self.abort(report, AbortReason::WaitFailed { level, message });
            }
        };
        report.events.push(RunEvent::ContainerExited {
            level,
            exit_code: outcome.exit_code,
        });
        if let Some(attempt) = report.attempts.last_mut() {
            attempt.exit_code = Some(outcome.exit_code);
        }

        if self.shutdown.is_requested() {
            return self.abort(report, AbortReason::Interrupted { level });
        }

        if !outcome.success() {
            // No retry: a failing runner usually means a hardware or
            // registration fault that needs a human.
            error!("container exited with code {}", outcome.exit_code);
            error!("{}", outcome.logs_lossy());
            return self.abort(
                report,
                AbortReason::NonZeroExit {
                    level,
                    exit_code: outcome.exit_code,
                },
            );
        }

        match level.next() {
            Some(next) => {
                self.settle(report);
                self.transition(report, RunState::from(next))
            }
            None => self.transition(report, RunState::Done),
        }
    }

    fn settle(&self, report: &mut RunReport) {
        let delay = self.options.settle_delay;
        info!("waiting {}s for target to boot", delay.as_secs_f32());
        std::thread::sleep(delay);
        report.events.push(RunEvent::Settle { delay });

        if let Some(poll) = self.options.settle_poll {
            let claim = DeviceClaim::new(self.identity.flipper_id.clone(), DeviceClass::Serial);
            let found = match wait_for_device(&self.locator, &claim, poll.interval, poll.timeout) {
                Ok(outcome) => outcome.is_found(),
                Err(e) => {
                    warn!("polling for {claim} failed: {e}");
                    false
                }
            };
            if !found {
                warn!(
                    "target {claim} did not reappear within {}s",
                    poll.timeout.as_secs()
                );
            }
            report.events.push(RunEvent::TargetPolled { found });
        }
    }

    fn transition(&mut self, report: &mut RunReport, to: RunState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        report.events.push(RunEvent::Transition {
            from: self.state,
            to,
        });
        self.state = to;
        Ok(())
    }

    fn abort(&mut self, report: &mut RunReport, reason: AbortReason) -> Result<(), CoreError> {
        report.abort = Some(reason);
        self.transition(report, RunState::Aborted)
    }
}
