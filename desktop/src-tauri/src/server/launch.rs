//! Resolving what to run for the backend.

use crate::server::environment::backend_environment;
use crate::server::{ServerConfig, ServerError, ServerResult};

use std::collections::BTreeMap;
use std::panic::Location;
use std::path::{Path, PathBuf};

use error_location::ErrorLocation;
use tracing::info;

const BACKEND_DIR: &str = "backend";
const BACKEND_NAME: &str = "backend";

/// Everything needed to spawn one backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Resolve the backend binary and assemble its arguments and environment.
    pub fn from_config(
        config: &ServerConfig,
        exe_dir: Option<&Path>,
        resources_dir: Option<&Path>,
    ) -> ServerResult<Self> {
        let command = find_backend_binary(config, exe_dir, resources_dir)?;
        let resources = config
            .backend
            .resources_path
            .as_deref()
            .or(resources_dir);

        let working_dir = config
            .backend
            .working_dir
            .clone()
            .or_else(|| command.parent().map(Path::to_path_buf));

        Ok(Self {
            env: backend_environment(config, resources),
            args: config.backend.args.clone(),
            command,
            working_dir,
        })
    }
}

fn executable_name(stem: &str) -> String {
    format!("{stem}{}", std::env::consts::EXE_SUFFIX)
}

/// Find the backend executable.
///
/// Search order:
/// 1. `backend.command` from config (`PLEXIO_BACKEND_PATH` overrides it); bare names go through PATH
/// 2. `backend/backend` next to the shell executable (bundled layout)
/// 3. `<resources>/backend/backend`
/// 4. `backend` on PATH
///
/// An explicitly configured command is returned even if missing, so the
/// spawn preflight reports the path the user actually configured.
pub fn find_backend_binary(
    config: &ServerConfig,
    exe_dir: Option<&Path>,
    resources_dir: Option<&Path>,
) -> ServerResult<PathBuf> {
    // 1. Explicit command
    if let Some(command) = &config.backend.command {
        if command.components().count() == 1
            && let Some(found) = search_path(&command.to_string_lossy())
        {
            info!("Using backend (PATH): {}", found.display());
            return Ok(found);
        }
        info!("Using backend (configured): {}", command.display());
        return Ok(command.clone());
    }

    let name = executable_name(BACKEND_NAME);

    // 2. Bundled next to the shell
    if let Some(dir) = exe_dir {
        let sibling = dir.join(BACKEND_DIR).join(&name);
        if sibling.exists() {
            info!("Using backend (bundled): {}", sibling.display());
            return Ok(sibling);
        }
    }

    // 3. Resources directory
    if let Some(dir) = resources_dir {
        let bundled = dir.join(BACKEND_DIR).join(&name);
        if bundled.exists() {
            info!("Using backend (resources): {}", bundled.display());
            return Ok(bundled);
        }
    }

    // 4. System PATH
    if let Some(found) = search_path(BACKEND_NAME) {
        info!("Using backend (PATH): {}", found.display());
        return Ok(found);
    }

    Err(ServerError::BinaryNotFound {
        path: exe_dir
            .map(|dir| dir.join(BACKEND_DIR).join(&name))
            .unwrap_or_else(|| PathBuf::from(name)),
        location: ErrorLocation::from(Location::caller()),
    })
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    let file = if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        executable_name(name)
    };
    std::env::split_paths(&paths)
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
}
