//! Windowed shell on Tauri.

use crate::logging::setup_logging;
use crate::server::{
    DiagnosticPage, PLACEHOLDER_URL, Supervisor, SupervisorHandle, build_server_status,
};
use crate::shell::{UiShell, fetch_page};
use crate::{Bootstrap, Cli, commands};

use std::time::Duration;

use tauri::webview::PageLoadEvent;
use tauri::{AppHandle, Emitter, Manager, WebviewUrl, WebviewWindow, WebviewWindowBuilder};
use tracing::{error, info, warn};

const MAIN_WINDOW: &str = "main";
const WINDOW_TITLE: &str = "Plexio";
const PAGE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

// Tauri event names
const EVENT_SERVER_STATE_CHANGED: &str = "server-state-changed";

/// Drives the main webview for the supervisor.
pub struct TauriShell {
    app: AppHandle,
    client: reqwest::Client,
}

impl TauriShell {
    pub fn new(app: AppHandle) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PAGE_CHECK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { app, client }
    }

    fn window(&self) -> Option<WebviewWindow> {
        self.app.get_webview_window(MAIN_WINDOW)
    }
}

impl UiShell for TauriShell {
    fn navigate(&self, url: &str, events: SupervisorHandle) {
        let Some(window) = self.window() else {
            events.load_failed(url, "main window is gone");
            return;
        };

        let client = self.client.clone();
        let url = url.to_string();
        tauri::async_runtime::spawn(async move {
            // The webview renders HTTP errors as pages, so check the response first
            if let Err(e) = fetch_page(&client, &url).await {
                events.load_failed(url, e);
                return;
            }

            let target = match url.parse::<tauri::Url>() {
                Ok(target) => target,
                Err(e) => {
                    events.load_failed(url, e.to_string());
                    return;
                }
            };

            // Completion is reported by the window's page-load hook
            if let Err(e) = window.navigate(target) {
                events.load_failed(url, e.to_string());
            }
        });
    }

    fn reveal(&self) {
        if let Some(window) = self.window() {
            window.show().ok();
            window.set_focus().ok();
        }
    }

    fn show_error(&self, page: &DiagnosticPage) {
        let Some(window) = self.window() else {
            error!("{}: {}", page.title, page.message);
            return;
        };

        let html = match serde_json::to_string(&page.to_html()) {
            Ok(html) => html,
            Err(e) => {
                error!("Failed to encode diagnostic page: {e}");
                return;
            }
        };

        if let Err(e) =
            window.eval(&format!("document.open();document.write({html});document.close();"))
        {
            error!("Failed to show diagnostic page: {e}");
        }
    }
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run(cli: Cli) {
    let app = tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app, _argv, _cwd| {
            // Focus existing window on second instance attempt
            if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
                window.show().ok();
                window.set_focus().ok();
            }
        }))
        .setup(move |app| {
            let boot = Bootstrap::prepare(&cli)
                .map_err(|e| format!("{e}\n\nHint: {}", e.recovery_hint()))?;
            setup_logging(&boot.data_dir, &boot.config.logging)?;

            info!("Starting Plexio desktop v{}", env!("CARGO_PKG_VERSION"));
            info!("Data directory: {}", boot.data_dir.display());

            // Hidden until the frontend (or a diagnostic) has rendered
            WebviewWindowBuilder::new(
                app,
                MAIN_WINDOW,
                WebviewUrl::External(PLACEHOLDER_URL.parse()?),
            )
            .title(WINDOW_TITLE)
            .inner_size(1100.0, 800.0)
            .visible(false)
            .on_page_load(|window, payload| {
                if payload.event() == PageLoadEvent::Finished
                    && let Some(handle) = window.try_state::<SupervisorHandle>()
                {
                    handle.page_loaded(payload.url().as_str());
                }
            })
            .build()?;

            let resources_dir = app.path().resource_dir().ok();
            let (supervisor, handle) = Supervisor::new(
                boot.config.clone(),
                boot.data_dir.clone(),
                boot.launch_resolver(resources_dir),
                TauriShell::new(app.handle().clone()),
            );
            app.manage(handle.clone());
            app.manage(boot);

            tauri::async_runtime::spawn(supervisor.run());

            #[cfg(unix)]
            {
                let app_handle = app.handle().clone();
                crate::spawn_signal_listener(move |sig| {
                    info!("Received signal {sig}, shutting down...");
                    app_handle.exit(0);
                });
            }

            // Forward state changes to the frontend
            let app_handle = app.handle().clone();
            let mut state_rx = handle.subscribe();
            tauri::async_runtime::spawn(async move {
                while state_rx.changed().await.is_ok() {
                    let state = state_rx.borrow_and_update().clone();
                    let status =
                        build_server_status(&state, Some(handle.frontend_url().to_string()));
                    app_handle.emit(EVENT_SERVER_STATE_CHANGED, status).ok();
                }
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_server_status,
            commands::restart_server,
            commands::export_diagnostics,
            commands::get_recent_logs,
            commands::quit_app,
        ])
        .build(tauri::generate_context!());

    let app = match app {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to start Plexio: {e}");
            std::process::exit(1);
        }
    };

    app.run(|app_handle, event| {
        use tauri::RunEvent;

        if let RunEvent::ExitRequested { code, .. } = event {
            info!("Exit requested (code: {:?})", code);
            if let Some(handle) = app_handle.try_state::<SupervisorHandle>() {
                let handle = handle.inner().clone();
                tauri::async_runtime::block_on(async move {
                    match handle.shutdown().await {
                        Ok(()) => info!("Backend stopped"),
                        Err(e) => warn!("Failed to stop backend: {e}"),
                    }
                });
            }
        }
    });
}
