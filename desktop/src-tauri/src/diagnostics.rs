//! Diagnostics bundle for bug reports.

use crate::server::{CONFIG_FILENAME, LoggingSettings, ServerError, ServerResult, ServerStatus};

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const EXPORT_FILENAME: &str = "diagnostics.zip";
const SENSITIVE_KEYS: [&str; 4] = ["secret", "password", "token", "key"];

/// Everything that goes into one export.
pub struct DiagnosticsInput<'a> {
    pub data_dir: &'a Path,
    pub logging: &'a LoggingSettings,
    pub status: &'a ServerStatus,
    pub stderr_tail: &'a str,
}

/// Write `diagnostics.zip` into the data directory and return its path.
///
/// Contains system info, the backend status, the backend's recent stderr,
/// the sanitized config and the shell's log files.
pub fn export_diagnostics(input: &DiagnosticsInput<'_>) -> ServerResult<PathBuf> {
    let export_path = input.data_dir.join(EXPORT_FILENAME);
    let file = File::create(&export_path)?;
    let mut zip = ZipWriter::new(file);

    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let system_info = format!(
        "OS: {}\nArch: {}\nVersion: {}\nTimestamp: {}\n",
        std::env::consts::OS,
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now().to_rfc3339(),
    );
    add_file(&mut zip, "system_info.txt", system_info.as_bytes(), options)?;

    let status_json = serde_json::to_string_pretty(input.status)
        .map_err(|e| ServerError::from(std::io::Error::other(e)))?;
    add_file(&mut zip, "server_status.json", status_json.as_bytes(), options)?;

    add_file(
        &mut zip,
        "backend_stderr.txt",
        input.stderr_tail.as_bytes(),
        options,
    )?;

    let config_path = input.data_dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        let sanitized = sanitize_config(&std::fs::read_to_string(&config_path)?);
        add_file(&mut zip, CONFIG_FILENAME, sanitized.as_bytes(), options)?;
    }

    let logs_dir = crate::logging::logs_dir(input.data_dir, input.logging);
    if logs_dir.exists() {
        for entry in std::fs::read_dir(&logs_dir)?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            let content = std::fs::read(&path)?;
            add_file(
                &mut zip,
                &format!("logs/{}", name.to_string_lossy()),
                &content,
                options,
            )?;
        }
    }

    zip.finish().map_err(zip_error)?;

    Ok(export_path)
}

/// Drop config lines that might hold credentials.
pub fn sanitize_config(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            let key = line.split('=').next().unwrap_or_default().to_lowercase();
            !SENSITIVE_KEYS.iter().any(|s| key.contains(s))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn add_file(
    zip: &mut ZipWriter<File>,
    name: &str,
    content: &[u8],
    options: SimpleFileOptions,
) -> ServerResult<()> {
    zip.start_file(name, options).map_err(zip_error)?;
    zip.write_all(content)?;
    Ok(())
}

#[track_caller]
fn zip_error(e: zip::result::ZipError) -> ServerError {
    ServerError::from(std::io::Error::other(e))
}
