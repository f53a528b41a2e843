//! Frontend loading state machine.
//!
//! Pure transitions from loader events to shell effects. The window is only
//! revealed after the first real page load, and at most once per shell
//! lifetime; failures always end with a visible diagnostic page.

use crate::server::{ReadinessOutcome, ServerError};

use serde::Serialize;
use tracing::debug;

/// What the window shows before the first navigation.
pub const PLACEHOLDER_URL: &str = "about:blank";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Starting,
    Ready,
    Loaded,
    Revealed,
    LoadFailed,
    ErrorShown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    BackendStarting,
    ReadinessResolved(ReadinessOutcome),
    PageLoaded { url: String },
    LoadFailed { url: String, error: String },
    BackendFailed(DiagnosticPage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEffect {
    Navigate(String),
    RevealWindow,
    ShowError(DiagnosticPage),
}

/// Error view shown in place of the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticPage {
    pub title: String,
    pub message: String,
    pub url: Option<String>,
    pub hint: Option<String>,
    pub detail: Option<String>,
}

impl DiagnosticPage {
    pub fn load_failure(url: &str, error: &str) -> Self {
        let err = ServerError::load_failure(url, error);
        Self {
            title: "Plexio could not load its configuration page".into(),
            message: error.into(),
            url: Some(url.into()),
            hint: Some(err.recovery_hint().into()),
            detail: None,
        }
    }

    /// Diagnostic for a terminal supervisor failure, with the relevant stderr tail.
    pub fn from_error(error: &ServerError, detail: Option<String>) -> Self {
        Self {
            title: "Plexio backend failed to start".into(),
            message: error.to_string(),
            url: None,
            hint: Some(error.recovery_hint().into()),
            detail: detail.filter(|d| !d.trim().is_empty()),
        }
    }

    pub fn to_html(&self) -> String {
        let mut body = format!(
            "<h1>{}</h1>\n<p class=\"message\">{}</p>\n",
            escape_html(&self.title),
            escape_html(&self.message)
        );
        if let Some(url) = &self.url {
            body.push_str(&format!(
                "<p>URL: <code>{0}</code> <a href=\"{0}\">Retry</a></p>\n",
                escape_html(url)
            ));
        }
        if let Some(hint) = &self.hint {
            body.push_str(&format!("<p class=\"hint\">{}</p>\n", escape_html(hint)));
        }
        if let Some(detail) = &self.detail {
            body.push_str(&format!("<pre>{}</pre>\n", escape_html(detail)));
        }

        format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title>\
             <style>body{{font-family:sans-serif;margin:2em;color:#222}}\
             pre{{background:#f4f4f4;padding:1em;overflow:auto}}\
             .hint{{color:#555}}</style></head>\n<body>\n{}</body></html>\n",
            escape_html(&self.title),
            body
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub struct FrontendLoader {
    origin: String,
    state: LoaderState,
    window_revealed: bool,
}

impl FrontendLoader {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            state: LoaderState::Idle,
            window_revealed: false,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn frontend_url(&self) -> String {
        format!("{}/", self.origin)
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn is_revealed(&self) -> bool {
        self.window_revealed
    }

    /// A new backend lifecycle starts from `Idle`; the reveal flag survives.
    pub fn begin_lifecycle(&mut self) {
        self.state = LoaderState::Idle;
    }

    pub fn handle(&mut self, event: LoaderEvent) -> Vec<LoaderEffect> {
        let mut effects = Vec::new();

        match event {
            LoaderEvent::BackendStarting => {
                self.state = LoaderState::Starting;
            }
            LoaderEvent::ReadinessResolved(outcome) => {
                if self.state != LoaderState::Starting {
                    debug!("Ignoring readiness {outcome:?} in state {:?}", self.state);
                    return effects;
                }
                // A timed-out probe still navigates, so whatever the backend serves is shown
                self.state = LoaderState::Ready;
                effects.push(LoaderEffect::Navigate(self.frontend_url()));
            }
            LoaderEvent::PageLoaded { url } => {
                if !self.is_frontend_url(&url) || !self.accepts_page_events() {
                    debug!("Ignoring page load of {url} in state {:?}", self.state);
                    return effects;
                }
                self.state = LoaderState::Loaded;
                self.reveal_once(&mut effects);
                self.state = LoaderState::Revealed;
            }
            LoaderEvent::LoadFailed { url, error } => {
                if !self.accepts_page_events() {
                    debug!("Ignoring load failure of {url} in state {:?}", self.state);
                    return effects;
                }
                self.state = LoaderState::LoadFailed;
                effects.push(LoaderEffect::ShowError(DiagnosticPage::load_failure(
                    &url, &error,
                )));
                self.reveal_once(&mut effects);
                self.state = LoaderState::ErrorShown;
            }
            LoaderEvent::BackendFailed(page) => {
                effects.push(LoaderEffect::ShowError(page));
                self.reveal_once(&mut effects);
                self.state = LoaderState::ErrorShown;
            }
        }

        effects
    }

    fn reveal_once(&mut self, effects: &mut Vec<LoaderEffect>) {
        if !self.window_revealed {
            self.window_revealed = true;
            effects.push(LoaderEffect::RevealWindow);
        }
    }

    fn accepts_page_events(&self) -> bool {
        !matches!(self.state, LoaderState::Idle | LoaderState::Starting)
    }

    fn is_frontend_url(&self, url: &str) -> bool {
        if url.is_empty() || url == PLACEHOLDER_URL {
            return false;
        }
        url.strip_prefix(&self.origin)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
    }
}
