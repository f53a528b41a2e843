//! Bounded tail of backend stderr, kept only for crash classification.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    lines: VecDeque<String>,
    bytes: usize,
}

/// Shared, byte-bounded stderr buffer. Oldest lines are evicted first.
#[derive(Debug, Clone)]
pub struct StderrBuffer {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
}

impl StderrBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity,
        }
    }

    pub fn push_line(&self, line: &str) {
        let mut line = line.to_string();
        if line.len() > self.capacity {
            let mut cut = line.len() - self.capacity;
            while !line.is_char_boundary(cut) {
                cut += 1;
            }
            line.drain(..cut);
        }

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.bytes += line.len();
        inner.lines.push_back(line);
        while inner.bytes > self.capacity {
            match inner.lines.pop_front() {
                Some(evicted) => inner.bytes -= evicted.len(),
                None => break,
            }
        }
    }

    /// Buffered text joined by newlines.
    pub fn snapshot(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Last `count` lines, for user-facing error messages.
    pub fn tail(&self, count: usize) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = inner.lines.len().saturating_sub(count);
        inner
            .lines
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len_bytes(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes
    }
}
