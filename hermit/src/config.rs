//! Configuration management
//!
//! Environment variable helpers, the on-disk layout of the shared cache
//! directory, and loading of the declarative model-list file.

use crate::error::{HermitError, Result};
use crate::models::descriptor::RawModelEntry;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default model-list file name, looked up in the root directory.
pub const CONFIG_FILE_NAME: &str = "hermit.config.yaml";

/// Default gateway URL handed to client sessions.
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:4000";

/// Default URL of the local model server, as seen from the host.
pub const DEFAULT_LOCAL_SERVER_URL: &str = "http://localhost:1234";

/// Default client program launched for each session.
pub const DEFAULT_CLIENT_PROGRAM: &str = "claude";

/// Get a non-empty environment variable
///
/// Empty values are treated as unset so that `FOO= hermit` behaves like
/// the variable was never exported.
pub fn get_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value
pub fn get_env_or(name: &str, default: &str) -> String {
    get_env(name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable, parsing to a specific type
///
/// Falls back to `default` when the variable is unset or does not parse;
/// an unparsable value is reported with a warning.
pub fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match get_env(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    "Environment variable '{}' has invalid value '{}', using default",
                    name,
                    raw
                );
                default
            }
        },
        None => default,
    }
}

/// Filesystem layout used by hermit
///
/// Everything under `cache_dir` is ephemeral and safe to delete while no
/// instance is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HermitPaths {
    /// Installation root (contains `docker/` and the model-list file)
    pub root: PathBuf,
    /// Shared cache directory
    pub cache_dir: PathBuf,
    /// Model-list file
    pub config_file: PathBuf,
    /// Compose file describing the shared services
    pub compose_file: PathBuf,
}

impl HermitPaths {
    /// Build the layout for `root`, optionally overriding the model-list file.
    pub fn new(root: impl Into<PathBuf>, config_override: Option<PathBuf>) -> Self {
        let root = root.into();
        let config_file = config_override.unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
        Self {
            cache_dir: root.join(".cache"),
            compose_file: root.join("docker").join("docker-compose.yml"),
            config_file,
            root,
        }
    }

    /// Resolve the root from an explicit value or the current directory.
    pub fn resolve(root: Option<PathBuf>, config_override: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        Ok(Self::new(root, config_override))
    }

    /// Generated routing config consumed by the gateway
    pub fn routing_config(&self) -> PathBuf {
        self.cache_dir.join("config.yaml")
    }

    /// Environment file written in detached mode
    pub fn env_file(&self) -> PathBuf {
        self.cache_dir.join(".hermit-env")
    }

    /// Lock file guarding start/stop decisions
    pub fn lifecycle_lock(&self) -> PathBuf {
        self.cache_dir.join(crate::lock::LIFECYCLE_LOCK_FILE)
    }

    /// Directory for log files
    pub fn log_dir(&self) -> PathBuf {
        self.cache_dir.join("logs")
    }
}

/// Runtime settings read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Gateway base URL handed to clients (`HERMIT_GATEWAY_URL`)
    pub gateway_url: String,
    /// Local model server URL (`HERMIT_LOCAL_SERVER_URL`)
    pub local_server_url: String,
    /// Client program (`HERMIT_CLIENT`)
    pub client_program: String,
    /// How long to wait for the container runtime (`HERMIT_RUNTIME_TIMEOUT_SECS`)
    pub runtime_timeout: Duration,
    /// How long to wait for the local model server (`HERMIT_LOCAL_SERVER_TIMEOUT_SECS`)
    pub local_server_timeout: Duration,
    /// How long to wait for the gateway health endpoint (`HERMIT_GATEWAY_TIMEOUT_SECS`)
    pub gateway_timeout: Duration,
    /// Shell command starting the local model server (`HERMIT_LOCAL_SERVER_LAUNCH`)
    pub local_server_launch: Option<String>,
    /// Shell command starting the container runtime (`HERMIT_RUNTIME_LAUNCH`)
    pub runtime_launch: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            local_server_url: DEFAULT_LOCAL_SERVER_URL.to_string(),
            client_program: DEFAULT_CLIENT_PROGRAM.to_string(),
            runtime_timeout: Duration::from_secs(60),
            local_server_timeout: Duration::from_secs(30),
            gateway_timeout: Duration::from_secs(60),
            local_server_launch: None,
            runtime_launch: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gateway_url: get_env_or("HERMIT_GATEWAY_URL", DEFAULT_GATEWAY_URL)
                .trim_end_matches('/')
                .to_string(),
            local_server_url: get_env_or("HERMIT_LOCAL_SERVER_URL", DEFAULT_LOCAL_SERVER_URL)
                .trim_end_matches('/')
                .to_string(),
            client_program: get_env_or("HERMIT_CLIENT", DEFAULT_CLIENT_PROGRAM),
            runtime_timeout: Duration::from_secs(get_env_parse(
                "HERMIT_RUNTIME_TIMEOUT_SECS",
                defaults.runtime_timeout.as_secs(),
            )),
            local_server_timeout: Duration::from_secs(get_env_parse(
                "HERMIT_LOCAL_SERVER_TIMEOUT_SECS",
                defaults.local_server_timeout.as_secs(),
            )),
            gateway_timeout: Duration::from_secs(get_env_parse(
                "HERMIT_GATEWAY_TIMEOUT_SECS",
                defaults.gateway_timeout.as_secs(),
            )),
            local_server_launch: get_env("HERMIT_LOCAL_SERVER_LAUNCH"),
            runtime_launch: get_env("HERMIT_RUNTIME_LAUNCH"),
        }
    }
}

/// Model aliases for the client's semantic roles
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RoleAliases {
    /// Model used for the fast tier
    #[serde(default)]
    pub fast: Option<String>,
    /// Model used for the high-capability tier
    #[serde(default)]
    pub strong: Option<String>,
}

/// Contents of the model-list file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelListFile {
    /// Declared models; `None` when the key is absent
    #[serde(default)]
    pub models: Option<Vec<RawModelEntry>>,
    /// Optional role aliases
    #[serde(default)]
    pub aliases: RoleAliases,
}

impl ModelListFile {
    /// Parse a model-list document.
    pub fn parse(raw: &str, path: &Path) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| HermitError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read and parse the model-list file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| HermitError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&raw, path)
    }
}
