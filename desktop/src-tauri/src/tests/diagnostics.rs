use crate::diagnostics::{DiagnosticsInput, export_diagnostics, sanitize_config};
use crate::server::{CONFIG_FILENAME, LoggingSettings, ServerState, build_server_status};

use std::io::Read;

use googletest::assert_that;
use googletest::prelude::{contains_substring, eq, not};
use tempfile::TempDir;

fn read_entry(archive: &mut zip::ZipArchive<std::fs::File>, name: &str) -> String {
    let mut entry = archive.by_name(name).unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    content
}

#[test]
fn given_data_dir_when_exported_then_zip_contains_bundle() {
    // Given
    let temp = TempDir::new().unwrap();
    let logging = LoggingSettings::default();
    std::fs::write(
        temp.path().join(CONFIG_FILENAME),
        "version = 2\napi_token = \"hunter2\"\n[server]\nport = 8000\n",
    )
    .unwrap();
    let logs = temp.path().join(&logging.directory);
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join("plexio-desktop.2026-01-01.log"), "INFO started\n").unwrap();

    let status = build_server_status(
        &ServerState::Failed {
            error: "Backend crashed".into(),
            hint: "Check logs".into(),
        },
        None,
    );

    // When
    let path = export_diagnostics(&DiagnosticsInput {
        data_dir: temp.path(),
        logging: &logging,
        status: &status,
        stderr_tail: "Traceback (most recent call last):",
    })
    .unwrap();

    // Then
    let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
    assert_that!(
        read_entry(&mut archive, "system_info.txt"),
        contains_substring(std::env::consts::OS)
    );
    assert_that!(
        read_entry(&mut archive, "server_status.json"),
        contains_substring("\"failed\"")
    );
    assert_that!(
        read_entry(&mut archive, "backend_stderr.txt"),
        eq("Traceback (most recent call last):")
    );
    let config = read_entry(&mut archive, CONFIG_FILENAME);
    assert_that!(config, contains_substring("port = 8000"));
    assert_that!(config, not(contains_substring("hunter2")));
    assert_that!(
        read_entry(&mut archive, "logs/plexio-desktop.2026-01-01.log"),
        eq("INFO started\n")
    );
}

#[test]
fn given_fresh_data_dir_when_exported_then_optional_entries_skipped() {
    let temp = TempDir::new().unwrap();
    let logging = LoggingSettings::default();
    let status = build_server_status(&ServerState::Stopped, None);

    let path = export_diagnostics(&DiagnosticsInput {
        data_dir: temp.path(),
        logging: &logging,
        status: &status,
        stderr_tail: "",
    })
    .unwrap();

    let archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort_unstable();
    assert_that!(
        names,
        eq(&vec!["backend_stderr.txt", "server_status.json", "system_info.txt"])
    );
}

#[test]
fn given_config_with_credentials_when_sanitized_then_lines_dropped() {
    let content = "port = 8000\nPlex_Token = \"abc\"\nadmin_password = \"x\"\napi_key = \"y\"\nhost = \"0.0.0.0\"";

    let sanitized = sanitize_config(content);

    assert_that!(sanitized, eq("port = 8000\nhost = \"0.0.0.0\""));
}
