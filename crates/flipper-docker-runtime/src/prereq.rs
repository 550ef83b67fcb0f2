use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn docker_daemon_reachable() -> bool {
    Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check prerequisites for the docker backend. Empty means ready.
pub fn check_docker_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("docker") {
        missing.push(MissingPrereq {
            name: "docker",
            purpose: "running the CI runner container",
            install_hint: "apt install docker.io | dnf install moby-engine | https://docs.docker.com/engine/install/",
        });
    } else if !docker_daemon_reachable() {
        missing.push(MissingPrereq {
            name: "docker daemon",
            purpose: "starting and supervising containers",
            install_hint: "systemctl start docker, and add this user to the docker group",
        });
    }

    missing
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nflipper-docker needs these to start runner containers.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "docker",
            purpose: "containers",
            install_hint: "apt install docker.io",
        };
        let s = format!("{m}");
        assert!(s.contains("docker"));
        assert!(s.contains("containers"));
        assert!(s.contains("apt install docker.io"));
    }

    #[test]
    fn format_missing_lists_every_item() {
        let items = vec![
            MissingPrereq {
                name: "docker",
                purpose: "containers",
                install_hint: "apt install docker.io",
            },
            MissingPrereq {
                name: "docker daemon",
                purpose: "supervision",
                install_hint: "systemctl start docker",
            },
        ];
        let output = format_missing(&items);
        assert!(output.starts_with("missing prerequisites:"));
        assert!(output.contains("docker daemon"));
    }

    #[test]
    fn check_does_not_panic() {
        let _ = check_docker_prereqs();
    }
}
