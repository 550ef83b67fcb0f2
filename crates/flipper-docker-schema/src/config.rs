use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/flipper-docker/flipper-docker.toml";
pub const DEFAULT_IMAGE: &str = "flipperdevices/flipper-github-runner-docker-qa:0.0.9";
pub const DEFAULT_TOOLCHAIN_ROOT: &str = "/opt";
pub const DEFAULT_MOUNT_PATH: &str = "/opt/toolchain";
pub const DEFAULT_SETTLE_SECS: u64 = 7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "found legacy INI config {legacy} but no {expected}; rewrite it as TOML there \
         (same [github] and [gelf] sections and keys, string values in double quotes, \
         port as a bare number)"
    )]
    LegacyFormat { legacy: PathBuf, expected: PathBuf },
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("missing [github] section with registration credentials")]
    MissingRegistration,
    #[error("config value {section}.{key} must not be empty")]
    EmptyValue {
        section: &'static str,
        key: &'static str,
    },
    #[error("unknown backend '{0}' in [runner]")]
    UnknownBackend(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Registration credentials. Optional at parse time so the fatal error
    /// names the problem instead of a serde field path.
    #[serde(default)]
    pub github: Option<GithubSection>,
    #[serde(default)]
    pub gelf: Option<GelfSection>,
    #[serde(default)]
    pub runner: RunnerSection,
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GithubSection {
    pub org_name: String,
    pub access_token: String,
}

impl fmt::Debug for GithubSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubSection")
            .field("org_name", &self.org_name)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Remote GELF log sink, reached over HTTPS with basic auth.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GelfSection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for GelfSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GelfSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_toolchain_root")]
    pub toolchain_root: PathBuf,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// When set, after the fixed delay the target device is polled for up to
    /// this many seconds before the next run level starts.
    #[serde(default)]
    pub settle_poll_timeout_secs: Option<u64>,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_device_backend")]
    pub device_backend: String,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            image: default_image(),
            toolchain_root: default_toolchain_root(),
            mount_path: default_mount_path(),
            settle_secs: default_settle_secs(),
            settle_poll_timeout_secs: None,
            backend: default_backend(),
            device_backend: default_device_backend(),
            sysfs_root: default_sysfs_root(),
            dev_root: default_dev_root(),
        }
    }
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_owned()
}

fn default_toolchain_root() -> PathBuf {
    PathBuf::from(DEFAULT_TOOLCHAIN_ROOT)
}

fn default_mount_path() -> String {
    DEFAULT_MOUNT_PATH.to_owned()
}

fn default_settle_secs() -> u64 {
    DEFAULT_SETTLE_SECS
}

fn default_backend() -> String {
    "docker".to_owned()
}

fn default_device_backend() -> String {
    "sysfs".to_owned()
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_dev_root() -> PathBuf {
    PathBuf::from("/dev")
}

impl Config {
    /// Load from `FLIPPER_DOCKER_CONFIG`, falling back to the system path.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&default_config_path())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(source) => {
                let legacy = path.with_extension("cfg");
                if source.kind() == ErrorKind::NotFound && legacy != path && legacy.is_file() {
                    return Err(ConfigError::LegacyFormat {
                        legacy,
                        expected: path.to_path_buf(),
                    });
                }
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let github = self
            .github
            .as_ref()
            .ok_or(ConfigError::MissingRegistration)?;
        require("github", "org_name", &github.org_name)?;
        require("github", "access_token", &github.access_token)?;

        if let Some(gelf) = &self.gelf {
            require("gelf", "host", &gelf.host)?;
            require("gelf", "username", &gelf.username)?;
            require("gelf", "password", &gelf.password)?;
        }

        require("runner", "image", &self.runner.image)?;
        require("runner", "mount_path", &self.runner.mount_path)?;
        match self.runner.backend.as_str() {
            "docker" | "mock" => {}
            other => return Err(ConfigError::UnknownBackend(other.to_owned())),
        }
        match self.runner.device_backend.as_str() {
            "sysfs" | "mock" => {}
            other => return Err(ConfigError::UnknownBackend(other.to_owned())),
        }
        Ok(())
    }

    /// Registration credentials; only valid after `validate()` succeeded.
    pub fn registration(&self) -> Result<&GithubSection, ConfigError> {
        self.github.as_ref().ok_or(ConfigError::MissingRegistration)
    }
}

fn require(section: &'static str, key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue { section, key });
    }
    Ok(())
}

pub fn default_config_path() -> PathBuf {
    std::env::var_os("FLIPPER_DOCKER_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}
