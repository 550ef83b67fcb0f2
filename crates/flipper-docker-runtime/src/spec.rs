use flipper_docker_schema::{ContainerId, GithubSection, HardwareId, RunLevel, RunnerSection};
use std::path::{Path, PathBuf};

/// Who this runner is: the hardware pair it is bound to and the label it
/// registers under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerIdentity {
    pub flipper_id: HardwareId,
    pub st_link_id: HardwareId,
    pub tag: String,
    /// Host name, short form (up to the first dot).
    pub hostname: String,
}

impl RunnerIdentity {
    pub fn new(
        flipper_id: impl Into<HardwareId>,
        st_link_id: impl Into<HardwareId>,
        tag: impl Into<String>,
        hostname: &str,
    ) -> Self {
        Self {
            flipper_id: flipper_id.into(),
            st_link_id: st_link_id.into(),
            tag: tag.into(),
            hostname: short_hostname(hostname).to_owned(),
        }
    }

    /// Name the runner registers with, also used to tag shipped logs.
    pub fn runner_name(&self) -> String {
        format!("{}-{}", self.hostname, self.flipper_id)
    }

    /// Containers are named after the target so a stale one from a crashed
    /// run collides instead of running twice.
    pub fn container_name(&self) -> ContainerId {
        ContainerId::new(self.flipper_id.as_str())
    }

    pub fn toolchain_dir(&self, root: &Path) -> PathBuf {
        root.join(self.flipper_id.as_str())
    }
}

pub fn short_hostname(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
}

/// Everything needed to start one runner container. Built fresh for every
/// attempt and never modified afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: ContainerId,
    pub image: String,
    pub env: Vec<(String, String)>,
    /// Host device paths in grant order.
    pub devices: Vec<PathBuf>,
    pub volumes: Vec<VolumeMount>,
    pub auto_remove: bool,
    pub detach: bool,
}

impl ContainerSpec {
    pub fn for_run_level(
        level: RunLevel,
        identity: &RunnerIdentity,
        registration: &GithubSection,
        runner: &RunnerSection,
        devices: Vec<PathBuf>,
    ) -> Self {
        let env = vec![
            ("ORG_NAME".to_owned(), registration.org_name.clone()),
            ("ACCESS_TOKEN".to_owned(), registration.access_token.clone()),
            ("RUNNER_NAME".to_owned(), identity.runner_name()),
            ("LABELS".to_owned(), identity.tag.clone()),
            ("RUN_LEVEL".to_owned(), level.as_str().to_owned()),
            ("RUNNER_SCOPE".to_owned(), "org".to_owned()),
            ("EPHEMERAL".to_owned(), "1".to_owned()),
        ];

        Self {
            name: identity.container_name(),
            image: runner.image.clone(),
            env,
            devices,
            volumes: vec![VolumeMount {
                host: identity.toolchain_dir(&runner.toolchain_root),
                container: runner.mount_path.clone(),
            }],
            auto_remove: true,
            detach: true,
        }
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| {
                if k == "ACCESS_TOKEN" {
                    format!("{k}=<redacted>")
                } else {
                    format!("{k}={v}")
                }
            })
            .collect();
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("env", &env)
            .field("devices", &self.devices)
            .field("volumes", &self.volumes)
            .field("auto_remove", &self.auto_remove)
            .field("detach", &self.detach)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> GithubSection {
        GithubSection {
            org_name: "flipperdevices".to_owned(),
            access_token: "ghp_token".to_owned(),
        }
    }

    fn identity() -> RunnerIdentity {
        RunnerIdentity::new("flip_Ovyrah", "066DFF343", "FlipperZeroTest", "bench-3.lab.local")
    }

    #[test]
    fn runner_name_uses_short_hostname() {
        let id = identity();
        assert_eq!(id.hostname, "bench-3");
        assert_eq!(id.runner_name(), "bench-3-flip_Ovyrah");
        assert_eq!(id.container_name(), ContainerId::new("flip_Ovyrah"));
        assert_eq!(short_hostname("plainhost"), "plainhost");
    }

    #[test]
    fn environment_contract() {
        let spec = ContainerSpec::for_run_level(
            RunLevel::Repair,
            &identity(),
            &registration(),
            &RunnerSection::default(),
            Vec::new(),
        );
        let keys: Vec<&str> = spec.env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "ORG_NAME",
                "ACCESS_TOKEN",
                "RUNNER_NAME",
                "LABELS",
                "RUN_LEVEL",
                "RUNNER_SCOPE",
                "EPHEMERAL"
            ]
        );
        assert_eq!(spec.env_value("RUN_LEVEL"), Some("REPAIR"));
        assert_eq!(spec.env_value("LABELS"), Some("FlipperZeroTest"));
        assert_eq!(spec.env_value("RUNNER_SCOPE"), Some("org"));
        assert_eq!(spec.env_value("EPHEMERAL"), Some("1"));
        assert!(spec.auto_remove);
        assert!(spec.detach);
    }

    #[test]
    fn mounts_toolchain_dir_and_keeps_device_order() {
        let devices = vec![
            PathBuf::from("/dev/ttyACM1"),
            PathBuf::from("/dev/bus/usb/003/009"),
            PathBuf::from("/dev/ttyACM0"),
        ];
        let spec = ContainerSpec::for_run_level(
            RunLevel::Normal,
            &identity(),
            &registration(),
            &RunnerSection::default(),
            devices.clone(),
        );
        assert_eq!(spec.devices, devices);
        assert_eq!(spec.image, flipper_docker_schema::DEFAULT_IMAGE);
        assert_eq!(
            spec.volumes,
            vec![VolumeMount {
                host: PathBuf::from("/opt/flip_Ovyrah"),
                container: "/opt/toolchain".to_owned(),
            }]
        );
        assert_eq!(spec.env_value("RUN_LEVEL"), Some("NORMAL"));
    }

    #[test]
    fn debug_hides_access_token() {
        let spec = ContainerSpec::for_run_level(
            RunLevel::Repair,
            &identity(),
            &registration(),
            &RunnerSection::default(),
            Vec::new(),
        );
        let dbg = format!("{spec:?}");
        assert!(!dbg.contains("ghp_token"));
        assert!(dbg.contains("ACCESS_TOKEN=<redacted>"));
    }
}
