use crate::backend::{ContainerBackend, RunOutcome, StopOutcome};
use crate::spec::ContainerSpec;
use crate::RuntimeError;
use flipper_docker_schema::ContainerId;
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

struct Attached {
    client: Child,
    auto_remove: bool,
}

/// Drives the `docker` command line client.
///
/// A container is created first, so name clashes and bad images fail `run`
/// directly. It is then started with an attached client running in the
/// background: that client's exit status is the container's exit code and
/// its output is the container's log, both available after `--rm` has
/// removed the container.
pub struct DockerBackend {
    binary: String,
    attached: Mutex<HashMap<ContainerId, Attached>>,
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::with_binary("docker")
    }
}

impl DockerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            attached: Mutex::new(HashMap::new()),
        }
    }

    /// `docker create` for `spec`. Environment values are handed over through
    /// the client's own environment and only the names appear on the command
    /// line, which other local users can read.
    fn create_command(&self, spec: &ContainerSpec) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("create");
        if spec.auto_remove {
            cmd.arg("--rm");
        }
        cmd.args(["--name", spec.name.as_str()]);
        for (k, v) in &spec.env {
            cmd.args(["--env", k.as_str()]);
            cmd.env(k, v);
        }
        for dev in &spec.devices {
            cmd.arg("--device").arg(dev);
        }
        for vol in &spec.volumes {
            cmd.arg("--volume")
                .arg(format!("{}:{}", vol.host.display(), vol.container));
        }
        cmd.arg(&spec.image);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn docker(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(RuntimeError::Io)
    }

    fn attached(&self) -> MutexGuard<'_, HashMap<ContainerId, Attached>> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a container that is already gone or about to be. Covers a
    /// container that was created but never ran, which `--rm` leaves behind.
    fn remove_quietly(&self, id: &ContainerId) {
        match self.docker(&["rm", "--force", id.as_str()]) {
            Ok(out) if out.status.success() => debug!("removed container {id}"),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !is_no_such_container(&stderr) {
                    warn!("failed to remove container {id}: {}", stderr.trim());
                }
            }
            Err(e) => warn!("failed to remove container {id}: {e}"),
        }
    }
}

fn is_no_such_container(stderr: &str) -> bool {
    let msg = stderr.to_lowercase();
    msg.contains("no such container") || msg.contains("is not running")
}

/// Exit code of the attached client; a client killed by a signal reports it
/// the way a shell does.
fn exit_code_of(status: ExitStatus) -> i64 {
    match (status.code(), status.signal()) {
        (Some(code), _) => i64::from(code),
        (None, Some(signal)) => 128 + i64::from(signal),
        (None, None) => -1,
    }
}

impl ContainerBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn available(&self) -> bool {
        self.docker(&["version", "--format", "{{.Server.Version}}"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError> {
        let output = self.create_command(spec).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = stderr.trim();
            if msg.contains("is already in use") {
                return Err(RuntimeError::AlreadyExists(spec.name.to_string()));
            }
            return Err(RuntimeError::StartFailed(format!(
                "{} create exited with {}: {msg}",
                self.binary,
                output.status.code().unwrap_or(-1)
            )));
        }
        let created = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        debug!("container {} created as {created}", spec.name);

        let client = Command::new(&self.binary)
            .args(["start", "--attach", spec.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                self.remove_quietly(&spec.name);
                return Err(RuntimeError::StartFailed(format!(
                    "failed to start {}: {e}",
                    spec.name
                )));
            }
        };

        self.attached().insert(
            spec.name.clone(),
            Attached {
                client,
                auto_remove: spec.auto_remove,
            },
        );
        Ok(spec.name.clone())
    }

    fn wait(&self, id: &ContainerId) -> Result<RunOutcome, RuntimeError> {
        let Some(attached) = self.attached().remove(id) else {
            return Err(RuntimeError::WaitFailed {
                name: id.to_string(),
                message: "no attached client for this container".to_owned(),
            });
        };

        let output = attached
            .client
            .wait_with_output()
            .map_err(|e| RuntimeError::WaitFailed {
                name: id.to_string(),
                message: e.to_string(),
            })?;
        if attached.auto_remove {
            self.remove_quietly(id);
        }

        let mut logs = output.stdout;
        logs.extend_from_slice(&output.stderr);
        Ok(RunOutcome {
            exit_code: exit_code_of(output.status),
            logs,
        })
    }

    fn stop(&self, id: &ContainerId) -> Result<StopOutcome, RuntimeError> {
        let output = self.docker(&["stop", id.as_str()])?;
        if output.status.success() {
            return Ok(StopOutcome::Stopped);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_no_such_container(&stderr) {
            return Ok(StopOutcome::NotFound);
        }
        Err(RuntimeError::StopFailed {
            name: id.to_string(),
            message: stderr.trim().to_owned(),
        })
    }
}
