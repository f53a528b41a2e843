//! Decides what happens after the backend exits.
//!
//! The policy is a pure function of the exit, the restart counter and a
//! stderr snapshot, so every branch is testable without a process.

use crate::server::{ExitInfo, ServerError};

use std::panic::Location;
use std::sync::LazyLock;
use std::time::Duration;

use error_location::ErrorLocation;
use regex::Regex;

/// Signatures of failures a respawn cannot fix, most specific first.
static MISSING_DEPENDENCY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"No module named ['"]?([A-Za-z_][A-Za-z0-9_.]*)['"]?"#,
        r#"cannot import name ['"]([A-Za-z_][A-Za-z0-9_]*)['"]"#,
        r#"(?:Failed to load Python shared library|Error loading Python lib) ['"]?([^'"\s:]+)"#,
        r#"([^\s:'"]+\.so[^\s:'"]*): cannot open shared object file"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Best-effort detection of an unresolvable import in backend output.
///
/// Returns the missing module (or library path). A miss is not fatal: the
/// crash then goes through the normal restart ceiling.
pub fn detect_missing_dependency(stderr: &str) -> Option<String> {
    MISSING_DEPENDENCY_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(stderr)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Whether the backend died because its port was taken.
///
/// Not a give-up reason on its own; only refines the error once restarts run out.
pub fn detect_port_conflict(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("address already in use")
        || stderr.contains("only one usage of each socket address")
}

/// Restart attempts since the supervisor started, reset on a successful run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestartCounter(u32);

impl RestartCounter {
    pub fn new(count: u32) -> Self {
        Self(count)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUpReason {
    MissingDependency(String),
    RestartsExhausted { attempts: u32 },
}

impl GiveUpReason {
    #[track_caller]
    pub fn into_error(self) -> ServerError {
        match self {
            Self::MissingDependency(name) => ServerError::missing_dependency(name),
            Self::RestartsExhausted { attempts } => ServerError::MaxRestartsExceeded {
                max: attempts,
                location: ErrorLocation::from(Location::caller()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    RestartAfterDelay(Duration),
    GiveUp(GiveUpReason),
    Ignore,
}

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    ceiling: u32,
    delay: Duration,
}

impl RestartPolicy {
    pub fn new(ceiling: u32, delay: Duration) -> Self {
        Self { ceiling, delay }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn on_exit(&self, exit: &ExitInfo, counter: &mut RestartCounter, stderr: &str) -> Decision {
        if exit.is_clean() {
            counter.reset();
            return Decision::Ignore;
        }

        if let Some(name) = detect_missing_dependency(stderr) {
            return Decision::GiveUp(GiveUpReason::MissingDependency(name));
        }

        if counter.0 < self.ceiling {
            counter.0 += 1;
            return Decision::RestartAfterDelay(self.delay);
        }

        Decision::GiveUp(GiveUpReason::RestartsExhausted {
            attempts: counter.0,
        })
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }
}
