use crate::server::{
    HttpProbe, Probe, ProbeResult, ReadinessOutcome, ReadinessSettings, ReadinessState,
    poll_until_ready,
};
use crate::tests::free_port;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use googletest::assert_that;
use googletest::prelude::eq;
use tokio::time::Instant;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

const INTERVAL: Duration = Duration::from_millis(500);

/// Refuses until attempt `succeed_on`, if ever.
struct ScriptedProbe {
    calls: AtomicU32,
    succeed_on: Option<u32>,
}

impl ScriptedProbe {
    fn new(succeed_on: Option<u32>) -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_on,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self) -> ProbeResult {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(attempt) == self.succeed_on {
            ProbeResult::Accepted { status: 422 }
        } else {
            ProbeResult::NotReady {
                reason: "connection refused".into(),
            }
        }
    }
}

fn settings() -> ReadinessSettings {
    ReadinessSettings {
        request_timeout_ms: 500,
        ..ReadinessSettings::default()
    }
}

// =========================================================================
// Polling
// =========================================================================

#[tokio::test(start_paused = true)]
async fn given_probe_succeeding_on_fifth_attempt_when_polled_then_ready_after_two_seconds() {
    // Given
    let probe = ScriptedProbe::new(Some(5));
    let start = Instant::now();

    // When
    let outcome = poll_until_ready(&probe, INTERVAL, 60).await;

    // Then
    assert_that!(outcome, eq(ReadinessOutcome::Ready { attempts: 5 }));
    assert_that!(probe.calls(), eq(5));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2500), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn given_never_responding_endpoint_when_polled_then_times_out_after_sixty_probes() {
    // Given
    let probe = ScriptedProbe::new(None);
    let start = Instant::now();

    // When
    let outcome = poll_until_ready(&probe, INTERVAL, 60).await;

    // Then
    assert_that!(outcome, eq(ReadinessOutcome::TimedOut { attempts: 60 }));
    assert_that!(probe.calls(), eq(60));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(29_500), "{elapsed:?}");
    assert!(elapsed <= Duration::from_secs(30), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn given_probe_ready_immediately_when_polled_then_no_sleep() {
    let probe = ScriptedProbe::new(Some(1));
    let start = Instant::now();

    let outcome = poll_until_ready(&probe, INTERVAL, 60).await;

    assert_that!(outcome, eq(ReadinessOutcome::Ready { attempts: 1 }));
    assert_that!(start.elapsed(), eq(Duration::ZERO));
}

#[tokio::test(start_paused = true)]
async fn given_success_after_ceiling_when_polled_then_never_probes_past_ceiling() {
    let probe = ScriptedProbe::new(Some(4));

    let outcome = poll_until_ready(&probe, INTERVAL, 3).await;

    assert_that!(outcome, eq(ReadinessOutcome::TimedOut { attempts: 3 }));
    assert_that!(probe.calls(), eq(3));
}

// =========================================================================
// Readiness State
// =========================================================================

#[test]
fn given_ready_state_when_probe_fails_then_stays_ready() {
    let refused = ProbeResult::NotReady {
        reason: "refused".into(),
    };

    let state = ReadinessState::Ready.advance(&refused, 60);

    assert_that!(state, eq(ReadinessState::Ready));
}

#[test]
fn given_given_up_state_when_probe_succeeds_then_stays_given_up() {
    let accepted = ProbeResult::Accepted { status: 200 };

    let state = ReadinessState::GivenUp.advance(&accepted, 60);

    assert_that!(state, eq(ReadinessState::GivenUp));
}

#[test]
fn given_failures_when_advanced_then_attempts_only_increase() {
    let refused = ProbeResult::NotReady {
        reason: "refused".into(),
    };

    let mut state = ReadinessState::NotChecked;
    let mut seen = Vec::new();
    for _ in 0..3 {
        state = state.advance(&refused, 3);
        seen.push(state);
    }

    assert_that!(
        seen,
        eq(&vec![
            ReadinessState::Polling(1),
            ReadinessState::Polling(2),
            ReadinessState::GivenUp,
        ])
    );
    assert!(state.is_terminal());
}

// =========================================================================
// HTTP Probe
// =========================================================================

async fn probe_against(status: u16) -> ProbeResult {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/test-connection"))
        .and(query_param("token", "placeholder"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&mock_server)
        .await;

    let probe = HttpProbe::new(&mock_server.uri(), &settings()).unwrap();
    probe.probe().await
}

#[tokio::test]
async fn given_backend_rejects_placeholder_with_422_when_probed_then_accepted() {
    let result = probe_against(422).await;

    assert_that!(result, eq(&ProbeResult::Accepted { status: 422 }));
}

#[tokio::test]
async fn given_backend_answers_200_when_probed_then_accepted() {
    let result = probe_against(200).await;

    assert_that!(result, eq(&ProbeResult::Accepted { status: 200 }));
}

#[tokio::test]
async fn given_backend_answers_500_when_probed_then_not_ready() {
    let result = probe_against(500).await;

    assert!(matches!(result, ProbeResult::NotReady { .. }), "{result:?}");
}

#[tokio::test]
async fn given_other_client_error_when_probed_then_not_ready() {
    let result = probe_against(404).await;

    assert!(matches!(result, ProbeResult::NotReady { .. }), "{result:?}");
}

#[tokio::test]
async fn given_nothing_listening_when_probed_then_not_ready() {
    let origin = format!("http://127.0.0.1:{}", free_port());
    let probe = HttpProbe::new(&origin, &settings()).unwrap();

    let result = probe.probe().await;

    assert!(matches!(result, ProbeResult::NotReady { .. }), "{result:?}");
}

#[tokio::test]
async fn given_live_backend_when_polled_then_ready_on_first_attempt() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/test-connection"))
        .respond_with(ResponseTemplate::new(422))
        .expect(1)
        .mount(&mock_server)
        .await;
    let probe = HttpProbe::new(&mock_server.uri(), &settings()).unwrap();

    let outcome = poll_until_ready(&probe, Duration::from_millis(10), 5).await;

    assert_that!(outcome, eq(ReadinessOutcome::Ready { attempts: 1 }));
}

#[test]
fn given_origin_when_probe_built_then_url_carries_placeholder_query() {
    let probe = HttpProbe::new("http://127.0.0.1:8000", &settings()).unwrap();

    let url = probe.url().as_str();

    assert!(url.starts_with("http://127.0.0.1:8000/api/v1/test-connection?"));
    assert!(url.contains("token=placeholder"));
    assert!(url.contains("url=http"));
}
