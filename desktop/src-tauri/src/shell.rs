//! UI shell seam between the supervisor and whatever displays the frontend.

use crate::server::{DiagnosticPage, SupervisorHandle};

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{error, info, warn};

const DIAGNOSTIC_FILENAME: &str = "diagnostic.html";
const PAGE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// What the supervisor drives. Calls come from the supervisor task and must
/// not block; navigation completion is reported back through the handle.
pub trait UiShell: Send + 'static {
    /// Start loading `url`, then report `page_loaded` or `load_failed` on `events`.
    fn navigate(&self, url: &str, events: SupervisorHandle);

    fn reveal(&self);

    fn show_error(&self, page: &DiagnosticPage);
}

/// Load `url` the way a browser would and return the final URL after redirects.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    if status.is_success() {
        Ok(resp.url().to_string())
    } else {
        Err(format!("HTTP {status}"))
    }
}

/// Shell without a window: checks the page loads and points the user at it.
pub struct HeadlessShell {
    client: reqwest::Client,
    open_browser: bool,
    diagnostic_path: PathBuf,
    last_url: Mutex<Option<String>>,
}

impl HeadlessShell {
    pub fn new(data_dir: PathBuf, open_browser: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PAGE_CHECK_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            open_browser,
            diagnostic_path: data_dir.join(DIAGNOSTIC_FILENAME),
            last_url: Mutex::new(None),
        }
    }

    pub fn diagnostic_path(&self) -> &PathBuf {
        &self.diagnostic_path
    }

    fn last_url(&self) -> Option<String> {
        self.last_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UiShell for HeadlessShell {
    fn navigate(&self, url: &str, events: SupervisorHandle) {
        *self.last_url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());

        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            match fetch_page(&client, &url).await {
                Ok(loaded) => events.page_loaded(loaded),
                Err(e) => events.load_failed(url, e),
            }
        });
    }

    fn reveal(&self) {
        let Some(url) = self.last_url() else {
            return;
        };
        info!("Plexio is ready at {url}");
        if self.open_browser {
            open_in_browser(&url);
        }
    }

    fn show_error(&self, page: &DiagnosticPage) {
        error!("{}: {}", page.title, page.message);
        if let Some(hint) = &page.hint {
            error!("Hint: {hint}");
        }

        match std::fs::write(&self.diagnostic_path, page.to_html()) {
            Ok(()) => {
                info!("Diagnostic page written to {}", self.diagnostic_path.display());
                if self.open_browser {
                    open_in_browser(&self.diagnostic_path.to_string_lossy());
                }
            }
            Err(e) => warn!("Failed to write diagnostic page: {e}"),
        }
    }
}

/// Hand `target` to the platform's default browser.
pub fn open_in_browser(target: &str) {
    #[cfg(target_os = "macos")]
    let result = std::process::Command::new("open").arg(target).spawn();

    #[cfg(target_os = "windows")]
    let result = std::process::Command::new("cmd")
        .args(["/C", "start", "", target])
        .spawn();

    #[cfg(all(unix, not(target_os = "macos")))]
    let result = std::process::Command::new("xdg-open").arg(target).spawn();

    if let Err(e) = result {
        warn!("Failed to open browser for {target}: {e}");
    }
}
