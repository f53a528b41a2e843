use std::path::PathBuf;

use clap::Parser;

/// Desktop shell for the Plexio bridge.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "plexio-desktop", version, about)]
pub struct Cli {
    /// Directory for config, logs and the lock file
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Use this config file instead of <data-dir>/config.toml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run without a window; the UI is served to the browser
    #[arg(long)]
    pub headless: bool,

    /// Open the configuration page in the default browser once it loads
    #[arg(long)]
    pub open_browser: bool,

    /// Write diagnostics.zip into the data directory and exit
    #[arg(long)]
    pub export_diagnostics: bool,
}
