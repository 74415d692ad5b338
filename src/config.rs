//! # Engine Configuration
//!
//! Everything that varies between installations lives in [`EngineConfig`]:
//! the deployment port range, resource ceilings for containers, the commands
//! the native backend runs, the advisor endpoint and on-disk locations.
//!
//! ## Sources
//!
//! Configuration is layered the same way for the library and the CLI:
//!
//! 1. [`EngineConfig::default()`] supplies working defaults
//! 2. [`EngineConfig::from_file()`] reads a YAML document; missing keys keep defaults
//! 3. [`EngineConfig::apply_env()`] overrides individual values from `FORGE_*` variables
//!
//! [`EngineConfig::from_env()`] is shorthand for defaults plus environment.
//!
//! ## Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `FORGE_PORT_RANGE_START` | `port_range_start` | `4000` |
//! | `FORGE_PORT_RANGE_END` | `port_range_end` | `5000` |
//! | `FORGE_WORKSPACE_DIR` | `workspace_dir` | `.forgekit/workspaces` |
//! | `FORGE_DATA_DIR` | `data_dir` | `.forgekit/data` |
//! | `FORGE_BACKEND` | `backend` | `auto` |
//! | `FORGE_CONTAINER_MEMORY` | `container.memory_bytes` | `536870912` |
//! | `FORGE_CONTAINER_NANO_CPUS` | `container.nano_cpus` | `500000000` |
//! | `FORGE_NATIVE_RUNTIME` | `native.runtime` | `node` |
//! | `FORGE_NATIVE_INSTALL` | `native.install` | `npm install --production` |
//! | `FORGE_STARTUP_GRACE_MS` | `native.startup_grace_ms` | `3000` |
//! | `FORGE_DATABASE_URL` | `database_url` | `mongodb://localhost:27017/{project}` |
//! | `FORGE_ADVISOR_URL` | `advisor.url` | unset |
//! | `FORGE_ADVISOR_TIMEOUT_MS` | `advisor.timeout_ms` | `15000` |
//! | `FORGE_TEMPLATE_DIR` | `template_dir` | unset |
//!
//! ## Example
//!
//! ```yaml
//! port_range_start: 4100
//! port_range_end: 4199
//! backend: native
//! native:
//!   runtime: node
//!   startup_grace_ms: 5000
//! advisor:
//!   url: http://localhost:8090/suggest
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Failure loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid port range {start}..={end}")]
    PortRange { start: u16, end: u16 },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Which execution backend the orchestrator should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Check the container control plane at startup, fall back to native.
    #[default]
    Auto,
    Container,
    Native,
}

impl FromStr for BackendPreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "container" | "docker" => Ok(BackendPreference::Container),
            "native" | "process" => Ok(BackendPreference::Native),
            _ => Err(ConfigError::InvalidValue {
                key: "FORGE_BACKEND",
                value: s.to_string(),
            }),
        }
    }
}

/// Settings for the isolated-container backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Prefix for image tags and container names.
    pub image_prefix: String,
    /// Port the generated server listens on inside the container.
    pub internal_port: u16,
    /// Memory ceiling in bytes.
    pub memory_bytes: i64,
    /// CPU ceiling in units of 10^-9 CPUs.
    pub nano_cpus: i64,
    /// Base image for synthesized build descriptors.
    pub base_image: String,
    /// Lines of history replayed when following logs.
    pub log_tail: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image_prefix: "forgekit-app".to_string(),
            internal_port: 3000,
            memory_bytes: 512 * 1024 * 1024,
            nano_cpus: 500_000_000,
            base_image: "node:20-alpine".to_string(),
            log_tail: 100,
        }
    }
}

/// Settings for the native-process backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Program that runs the server entry point.
    pub runtime: String,
    /// Entry point relative to the workspace.
    pub entry: String,
    /// Dependency install command, run through the shell.
    pub install: String,
    /// Front-end dependency install command, run in `client/`.
    pub frontend_install: String,
    /// Front-end build command, run in `client/`.
    pub frontend_build: String,
    /// How long a freshly spawned process must survive to count as started.
    pub startup_grace_ms: u64,
    /// Pause between stop and respawn on restart.
    pub restart_delay_ms: u64,
    /// How long to wait after SIGTERM before SIGKILL.
    pub stop_timeout_ms: u64,
    /// Upper bound on any single install/build command.
    pub command_timeout_ms: u64,
    /// Lines of history replayed when following logs.
    pub log_tail: usize,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            runtime: "node".to_string(),
            entry: "src/index.js".to_string(),
            install: "npm install --production".to_string(),
            frontend_install: "npm install".to_string(),
            frontend_build: "npm run build".to_string(),
            startup_grace_ms: 3000,
            restart_delay_ms: 1000,
            stop_timeout_ms: 5000,
            command_timeout_ms: 600_000,
            log_tail: 100,
        }
    }
}

impl NativeConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Settings for the optional enrichment advisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Endpoint accepting `{kind, payload}` POSTs. Unset disables the advisor.
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 15_000,
        }
    }
}

impl AdvisorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First port handed out by the port pool (inclusive).
    pub port_range_start: u16,
    /// Last port handed out by the port pool (inclusive).
    pub port_range_end: u16,
    /// Where generated bundles are written before building.
    pub workspace_dir: PathBuf,
    /// Where bundles are persisted by the filesystem store.
    pub data_dir: PathBuf,
    pub backend: BackendPreference,
    /// Connection string injected into deployments; `{project}` is substituted.
    pub database_url: String,
    /// Directory of `*.jinja` files overriding built-in templates.
    pub template_dir: Option<PathBuf>,
    pub container: ContainerConfig,
    pub native: NativeConfig,
    pub advisor: AdvisorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port_range_start: 4000,
            port_range_end: 5000,
            workspace_dir: PathBuf::from(".forgekit/workspaces"),
            data_dir: PathBuf::from(".forgekit/data"),
            backend: BackendPreference::Auto,
            database_url: "mongodb://localhost:27017/{project}".to_string(),
            template_dir: None,
            container: ContainerConfig::default(),
            native: NativeConfig::default(),
            advisor: AdvisorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FORGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a YAML file; keys absent from the file keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from any `FORGE_*` variables that are set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = parse_var("FORGE_PORT_RANGE_START")? {
            self.port_range_start = v;
        }
        if let Some(v) = parse_var("FORGE_PORT_RANGE_END")? {
            self.port_range_end = v;
        }
        if let Ok(v) = env::var("FORGE_WORKSPACE_DIR") {
            self.workspace_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FORGE_BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = parse_var("FORGE_CONTAINER_MEMORY")? {
            self.container.memory_bytes = v;
        }
        if let Some(v) = parse_var("FORGE_CONTAINER_NANO_CPUS")? {
            self.container.nano_cpus = v;
        }
        if let Ok(v) = env::var("FORGE_NATIVE_RUNTIME") {
            self.native.runtime = v;
        }
        if let Ok(v) = env::var("FORGE_NATIVE_INSTALL") {
            self.native.install = v;
        }
        if let Some(v) = parse_var("FORGE_STARTUP_GRACE_MS")? {
            self.native.startup_grace_ms = v;
        }
        if let Ok(v) = env::var("FORGE_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = env::var("FORGE_ADVISOR_URL") {
            self.advisor.url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = parse_var("FORGE_ADVISOR_TIMEOUT_MS")? {
            self.advisor.timeout_ms = v;
        }
        if let Ok(v) = env::var("FORGE_TEMPLATE_DIR") {
            self.template_dir = Some(PathBuf::from(v));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_range_start == 0 || self.port_range_start > self.port_range_end {
            return Err(ConfigError::PortRange {
                start: self.port_range_start,
                end: self.port_range_end,
            });
        }
        Ok(())
    }

    /// Database connection string for a project.
    pub fn database_url_for(&self, project: &str) -> String {
        self.database_url.replace("{project}", project)
    }
}

fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}
