// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(
    all(not(debug_assertions), feature = "desktop"),
    windows_subsystem = "windows"
)]

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let cli = app_lib::Cli::parse();

    #[cfg(feature = "desktop")]
    if !cli.headless && !cli.export_diagnostics {
        app_lib::run(cli);
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(app_lib::run_headless(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}\n\nHint: {}", e.recovery_hint());
            ExitCode::FAILURE
        }
    }
}
