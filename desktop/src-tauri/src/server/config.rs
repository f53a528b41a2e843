//! Shell configuration with validation and versioning.

use crate::server::environment::validate_public_url;
use crate::server::{ServerError, ServerResult};

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Configuration version for migration support.
/// Increment when adding new fields or changing structure.
pub const CONFIG_VERSION: u32 = 2;

pub const CONFIG_FILENAME: &str = "config.toml";

pub const ENV_BACKEND_PATH: &str = "PLEXIO_BACKEND_PATH";
pub const ENV_PORT: &str = "PLEXIO_PORT";
pub const ENV_LOG_LEVEL: &str = "PLEXIO_LOG_LEVEL";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CACHE_TYPE: &str = "memory";
const DEFAULT_CORS_ORIGIN_REGEX: &str = ".*";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_PROBE_INTERVAL_MS: u64 = 500;
const DEFAULT_PROBE_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_HEALTH_PATH: &str = "/api/v1/test-connection";
// FastAPI answers 422 when it rejects the placeholder query, which still proves it is serving.
const DEFAULT_ACCEPTED_CLIENT_ERROR: u16 = 422;
const DEFAULT_MAX_RESTARTS: u32 = 3;
const DEFAULT_RESTART_DELAY_MS: u64 = 2000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;
const DEFAULT_STDERR_BUFFER_BYTES: usize = 64 * 1024;

const MIN_PORT: u16 = 1024;
const MAX_RESTARTS_LIMIT: u32 = 10;
const MIN_STDERR_BUFFER_BYTES: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Config file format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Backend executable settings
    #[serde(default)]
    pub backend: BackendSettings,

    /// Bind address handed to the backend
    #[serde(default)]
    pub server: ServerSettings,

    /// Backend feature switches passed through its environment
    #[serde(default)]
    pub environment: EnvironmentSettings,

    /// Where the UI is loaded from
    #[serde(default)]
    pub frontend: FrontendSettings,

    /// Readiness probe settings
    #[serde(default)]
    pub readiness: ReadinessSettings,

    /// Restart and shutdown settings
    #[serde(default)]
    pub resilience: ResilienceSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Explicit backend executable; discovered next to the shell when unset
    #[serde(default)]
    pub command: Option<PathBuf>,

    /// Extra arguments for the backend
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; defaults to the executable's directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Bundle resources directory exported as RESOURCES_PATH
    #[serde(default)]
    pub resources_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host the backend binds to (0.0.0.0 so LAN clients can reach the addon)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the backend binds to
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// Backend cache mode (CACHE_TYPE)
    #[serde(default = "default_cache_type")]
    pub cache_type: String,

    /// Allowed CORS origins (CORS_ORIGIN_REGEX)
    #[serde(default = "default_cors_origin_regex")]
    pub cors_origin_regex: String,

    /// Serve the bundled frontend from the backend (SERVE_STATIC)
    #[serde(default = "default_true")]
    pub serve_static: bool,

    /// Public URL used in addon responses (PUBLIC_BASE_URL)
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Public URL used for proxied streams (PUBLIC_STREAMING_BASE_URL)
    #[serde(default)]
    pub public_streaming_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontendSettings {
    /// Dev server URL to load instead of the backend origin
    #[serde(default)]
    pub dev_url: Option<String>,

    /// Headless mode: open the system browser once the UI is reachable
    #[serde(default)]
    pub open_browser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSettings {
    /// Delay between probe attempts (milliseconds)
    #[serde(default = "default_probe_interval")]
    pub interval_ms: u64,

    /// Attempts before giving up and loading anyway
    #[serde(default = "default_probe_max_attempts")]
    pub max_attempts: u32,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_probe_timeout")]
    pub request_timeout_ms: u64,

    /// Health endpoint path
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Client error status that still proves the backend is serving
    #[serde(default = "default_accepted_client_error")]
    pub accepted_client_error: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Maximum backend restart attempts before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Delay before each restart (milliseconds)
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    /// Grace period between SIGTERM and SIGKILL (milliseconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Bytes of backend stderr kept for crash classification
    #[serde(default = "default_stderr_buffer")]
    pub stderr_buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory (relative to data directory)
    #[serde(default = "default_log_dir")]
    pub directory: String,
}

// === Default Value Functions ===

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_host() -> String {
    DEFAULT_HOST.into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_cache_type() -> String {
    DEFAULT_CACHE_TYPE.into()
}
fn default_cors_origin_regex() -> String {
    DEFAULT_CORS_ORIGIN_REGEX.into()
}
fn default_true() -> bool {
    true
}
fn default_probe_interval() -> u64 {
    DEFAULT_PROBE_INTERVAL_MS
}
fn default_probe_max_attempts() -> u32 {
    DEFAULT_PROBE_MAX_ATTEMPTS
}
fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}
fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.into()
}
fn default_accepted_client_error() -> u16 {
    DEFAULT_ACCEPTED_CLIENT_ERROR
}
fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}
fn default_restart_delay() -> u64 {
    DEFAULT_RESTART_DELAY_MS
}
fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}
fn default_stderr_buffer() -> usize {
    DEFAULT_STDERR_BUFFER_BYTES
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.into()
}
fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.into()
}

// === Default Implementations ===

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            backend: BackendSettings::default(),
            server: ServerSettings::default(),
            environment: EnvironmentSettings::default(),
            frontend: FrontendSettings::default(),
            readiness: ReadinessSettings::default(),
            resilience: ResilienceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            cors_origin_regex: default_cors_origin_regex(),
            serve_static: true,
            public_base_url: None,
            public_streaming_base_url: None,
        }
    }
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_probe_interval(),
            max_attempts: default_probe_max_attempts(),
            request_timeout_ms: default_probe_timeout(),
            health_path: default_health_path(),
            accepted_client_error: default_accepted_client_error(),
        }
    }
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_delay_ms: default_restart_delay(),
            shutdown_grace_ms: default_shutdown_grace(),
            stderr_buffer_bytes: default_stderr_buffer(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
        }
    }
}

impl ServerSettings {
    /// Host the shell connects to. A wildcard bind is reached over loopback.
    pub fn connect_host(&self) -> &str {
        match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            host => host,
        }
    }

    /// Origin the backend serves the configuration UI from.
    pub fn local_origin(&self) -> String {
        format!("http://{}:{}", self.connect_host(), self.port)
    }
}

// === Configuration Operations ===

impl ServerConfig {
    /// Origin the window navigates to: the dev server when set, else the backend.
    pub fn frontend_origin(&self) -> String {
        self.frontend
            .dev_url
            .clone()
            .unwrap_or_else(|| self.server.local_origin())
    }

    /// Load config from file, creating default if not exists.
    pub fn load_or_create(data_dir: &Path) -> ServerResult<Self> {
        let config_path = data_dir.join(CONFIG_FILENAME);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let mut config: Self = toml::from_str(&content)
                .map_err(|e| ServerError::config_invalid(e.to_string()))?;

            // Migrate if needed
            if config.version < CONFIG_VERSION {
                config = Self::migrate(config)?;
                config.save(data_dir)?;
            }
            config
        } else {
            let config = Self::default();
            config.save(data_dir)?;
            info!("Wrote default config to {}", config_path.display());
            config
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from an explicit file without creating or migrating it.
    pub fn load_from(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self =
            toml::from_str(&content).map_err(|e| ServerError::config_invalid(e.to_string()))?;
        if config.version < CONFIG_VERSION {
            config = Self::migrate(config)?;
        }
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file atomically.
    ///
    /// Uses write-to-temp-then-rename pattern to prevent
    /// partial writes if the process is interrupted.
    pub fn save(&self, data_dir: &Path) -> ServerResult<()> {
        let config_path = data_dir.join(CONFIG_FILENAME);
        let content =
            toml::to_string_pretty(self).map_err(|e| ServerError::config_invalid(e.to_string()))?;

        let temp_path = config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    /// Migrate config from older version.
    fn migrate(mut config: Self) -> ServerResult<Self> {
        // Version 1 -> 2: restart delay became fixed instead of exponential
        if config.version <= 1 {
            config.resilience.restart_delay_ms = default_restart_delay();
            config.version = 2;
        }

        Ok(config)
    }

    /// Apply `PLEXIO_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) -> ServerResult<()> {
        if let Ok(path) = std::env::var(ENV_BACKEND_PATH)
            && !path.trim().is_empty()
        {
            self.backend.command = Some(PathBuf::from(path.trim()));
        }

        if let Ok(port) = std::env::var(ENV_PORT) {
            self.server.port = port.trim().parse().map_err(|_| {
                ServerError::config_invalid(format!("{ENV_PORT} must be a port number, got '{port}'"))
            })?;
        }

        if let Ok(level) = std::env::var(ENV_LOG_LEVEL)
            && !level.trim().is_empty()
        {
            self.logging.level = level.trim().to_lowercase();
        }

        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> ServerResult<()> {
        // Port must be unprivileged
        if self.server.port < MIN_PORT {
            return Err(ServerError::config_invalid(format!(
                "Port must be >= {MIN_PORT} (unprivileged)"
            )));
        }

        if self.server.host != "localhost" && self.server.host.parse::<IpAddr>().is_err() {
            return Err(ServerError::config_invalid(format!(
                "Host must be an IP address or localhost, got '{}'",
                self.server.host
            )));
        }

        if self.readiness.interval_ms == 0 || self.readiness.request_timeout_ms == 0 {
            return Err(ServerError::config_invalid(
                "Readiness interval and timeout must be > 0",
            ));
        }

        if self.readiness.max_attempts == 0 {
            return Err(ServerError::config_invalid(
                "Readiness max_attempts must be > 0",
            ));
        }

        if !(400..500).contains(&self.readiness.accepted_client_error) {
            return Err(ServerError::config_invalid(format!(
                "accepted_client_error must be a 4xx status, got {}",
                self.readiness.accepted_client_error
            )));
        }

        if !self.readiness.health_path.starts_with('/') {
            return Err(ServerError::config_invalid(
                "Health path must start with '/'",
            ));
        }

        if self.resilience.max_restarts > MAX_RESTARTS_LIMIT {
            return Err(ServerError::config_invalid(format!(
                "max_restarts must be <= {MAX_RESTARTS_LIMIT}"
            )));
        }

        if self.resilience.stderr_buffer_bytes < MIN_STDERR_BUFFER_BYTES {
            return Err(ServerError::config_invalid(format!(
                "stderr_buffer_bytes must be >= {MIN_STDERR_BUFFER_BYTES}"
            )));
        }

        if let Some(url) = &self.environment.public_base_url {
            validate_public_url("public_base_url", url)?;
        }
        if let Some(url) = &self.environment.public_streaming_base_url {
            validate_public_url("public_streaming_base_url", url)?;
        }

        if let Some(dev_url) = &self.frontend.dev_url
            && reqwest::Url::parse(dev_url).is_err()
        {
            return Err(ServerError::config_invalid(format!(
                "frontend.dev_url is not a valid URL: '{dev_url}'"
            )));
        }

        if self.frontend.dev_url.is_some() && self.environment.serve_static {
            warn!("frontend.dev_url is set while serve_static is on; the dev server wins");
        }

        Ok(())
    }
}
