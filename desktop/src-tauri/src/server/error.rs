use std::panic::Location;
use std::path::PathBuf;

use error_location::ErrorLocation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to create data directory at {path}: {source} {location}")]
    DataDirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Configuration invalid: {message} {location}")]
    ConfigInvalid {
        message: String,
        location: ErrorLocation,
    },

    #[error("Backend executable not found at {path} {location}")]
    BinaryNotFound {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("Backend executable at {path} is not executable {location}")]
    NotExecutable {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("Failed to spawn backend process {path}: {source} {location}")]
    ProcessSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Backend is missing the Python module '{name}' {location}")]
    MissingDependency {
        name: String,
        location: ErrorLocation,
    },

    #[error("Backend crashed (exit code {code:?}, signal {signal:?}): {stderr} {location}")]
    ProcessCrashed {
        code: Option<i32>,
        signal: Option<i32>,
        stderr: String,
        location: ErrorLocation,
    },

    #[error("Backend crashed {max} times in a row, giving up {location}")]
    MaxRestartsExceeded { max: u32, location: ErrorLocation },

    #[error("Failed to load {url}: {message} {location}")]
    LoadFailure {
        url: String,
        message: String,
        location: ErrorLocation,
    },

    #[error("Port {port} is in use by another application {location}")]
    PortInUse { port: u16, location: ErrorLocation },

    #[error("Backend did not exit within {grace_ms}ms of termination {location}")]
    ShutdownTimeout {
        grace_ms: u64,
        location: ErrorLocation,
    },

    #[error("Another instance is already running (lock file: {path}) {location}")]
    AlreadyRunning {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("Failed to acquire lock at {path}: {source} {location}")]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Backend stopped and will not be restarted: {message} {location}")]
    BackendFailed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Supervisor is no longer running {location}")]
    SupervisorGone { location: ErrorLocation },

    #[error("IO error: {source} {location}")]
    Io {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("HTTP error: {source} {location}")]
    Http {
        #[source]
        source: reqwest::Error,
        location: ErrorLocation,
    },
}

impl ServerError {
    #[track_caller]
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn missing_dependency(name: impl Into<String>) -> Self {
        Self::MissingDependency {
            name: name.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn load_failure(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadFailure {
            url: url.into(),
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Spawn-class errors happen before a process exists, so there is nothing to restart.
    pub fn is_spawn_error(&self) -> bool {
        matches!(
            self,
            Self::BinaryNotFound { .. } | Self::NotExecutable { .. } | Self::ProcessSpawn { .. }
        )
    }

    /// Whether this error is recoverable via retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProcessCrashed { .. } | Self::Http { .. } | Self::LoadFailure { .. }
        )
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::BinaryNotFound { .. } | Self::NotExecutable { .. } => {
                "The bundled backend is missing or damaged. \
                   Please reinstall Plexio."
            }
            Self::ProcessSpawn { .. } => {
                "The backend could not be started. \
                   Check that your antivirus is not blocking it, then restart Plexio."
            }
            Self::MissingDependency { .. } => {
                "The backend installation is incomplete. \
                   Reinstall Plexio, or run `pip install -r requirements.txt` in a source checkout."
            }
            Self::MaxRestartsExceeded { .. } => {
                "The backend keeps crashing. \
                   Please report this issue with the exported diagnostics."
            }
            Self::LoadFailure { .. } => {
                "The configuration page could not be loaded. \
                   Use Restart from the menu or check the logs."
            }
            Self::PortInUse { .. } => {
                "Another application is using the backend port. \
                   Close it or change `server.port` in config.toml."
            }
            Self::ConfigInvalid { .. } => {
                "Configuration file has invalid settings. \
                   Check the logs for details or delete the config file to use defaults."
            }
            Self::AlreadyRunning { .. } => {
                "Plexio is already running. \
                   Check your menu bar or task manager."
            }
            Self::LockAcquisition { .. } => {
                "Unable to create lock file. \
                   Check file permissions in the application directory."
            }
            Self::BackendFailed { .. } => {
                "See diagnostic.html in the data directory, \
                   or run with --export-diagnostics and report the issue."
            }
            Self::DataDirCreation { .. } => {
                "Unable to create application data directory. \
                   Check file permissions or available disk space."
            }
            _ => "An unexpected error occurred. Please check the logs for details.",
        }
    }
}

impl From<std::io::Error> for ServerError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<reqwest::Error> for ServerError {
    #[track_caller]
    fn from(source: reqwest::Error) -> Self {
        Self::Http {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
