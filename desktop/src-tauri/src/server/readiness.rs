//! Readiness probing for a freshly spawned backend.

use crate::server::{ReadinessSettings, ServerError, ServerResult};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

const PLACEHOLDER_PLEX_URL: &str = "http://127.0.0.1:1";
const PLACEHOLDER_TOKEN: &str = "placeholder";

/// Result of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Accepted { status: u16 },
    NotReady { reason: String },
}

/// Result of a whole polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl ReadinessOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts } | Self::TimedOut { attempts } => *attempts,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Readiness of one backend lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotChecked,
    Polling(u32),
    Ready,
    GivenUp,
}

impl ReadinessState {
    /// Record one probe result against an attempt ceiling.
    pub fn advance(self, result: &ProbeResult, max_attempts: u32) -> Self {
        match self {
            Self::Ready | Self::GivenUp => self,
            Self::NotChecked | Self::Polling(_) => {
                let attempts = self.attempts() + 1;
                match result {
                    ProbeResult::Accepted { .. } => Self::Ready,
                    ProbeResult::NotReady { .. } if attempts >= max_attempts => Self::GivenUp,
                    ProbeResult::NotReady { .. } => Self::Polling(attempts),
                }
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Polling(attempts) => *attempts,
            _ => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::GivenUp)
    }
}

/// One readiness check against the backend.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> ProbeResult;
}

/// Probes the backend's connection-test endpoint with placeholder parameters.
pub struct HttpProbe {
    client: reqwest::Client,
    url: reqwest::Url,
    accepted_client_error: StatusCode,
}

impl HttpProbe {
    pub fn new(origin: &str, settings: &ReadinessSettings) -> ServerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .pool_max_idle_per_host(1)
            .build()?;

        let mut url = reqwest::Url::parse(origin)
            .and_then(|base| base.join(&settings.health_path))
            .map_err(|e| {
                ServerError::config_invalid(format!("Invalid health check URL for {origin}: {e}"))
            })?;
        url.query_pairs_mut()
            .append_pair("url", PLACEHOLDER_PLEX_URL)
            .append_pair("token", PLACEHOLDER_TOKEN);

        Ok(Self {
            client,
            url,
            accepted_client_error: StatusCode::from_u16(settings.accepted_client_error)
                .unwrap_or(StatusCode::UNPROCESSABLE_ENTITY),
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    fn accepts(&self, status: StatusCode) -> bool {
        status.is_success() || status == self.accepted_client_error
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> ProbeResult {
        match self.client.get(self.url.clone()).send().await {
            Ok(resp) if self.accepts(resp.status()) => ProbeResult::Accepted {
                status: resp.status().as_u16(),
            },
            Ok(resp) => ProbeResult::NotReady {
                reason: format!("HTTP {}", resp.status()),
            },
            Err(e) if e.is_timeout() => ProbeResult::NotReady {
                reason: "timed out".into(),
            },
            Err(e) => ProbeResult::NotReady {
                reason: e.to_string(),
            },
        }
    }
}

/// Poll `probe` every `interval` until it is accepted or `max_attempts` have failed.
///
/// Never issues more than `max_attempts` probes. Callers load the frontend
/// on `TimedOut` as well, so a slow backend degrades to an error page
/// instead of an invisible window.
pub async fn poll_until_ready<P>(probe: &P, interval: Duration, max_attempts: u32) -> ReadinessOutcome
where
    P: Probe + ?Sized,
{
    let mut state = ReadinessState::NotChecked;
    let mut attempts = 0;

    loop {
        let result = probe.probe().await;
        attempts += 1;
        state = state.advance(&result, max_attempts);

        match state {
            ReadinessState::Ready => {
                info!("Backend ready after {attempts} probe(s)");
                return ReadinessOutcome::Ready { attempts };
            }
            ReadinessState::GivenUp => {
                warn!("Backend not ready after {attempts} probes, loading anyway");
                return ReadinessOutcome::TimedOut { attempts };
            }
            ReadinessState::NotChecked | ReadinessState::Polling(_) => {
                if let ProbeResult::NotReady { reason } = &result {
                    debug!("Probe {attempts}/{max_attempts} not ready: {reason}");
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}
