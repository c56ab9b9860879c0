//! Per-identifier attempt limiting.
//!
//! Each identifier gets a fixed window anchored at its first attempt.
//! Within the window at most `max_attempts` calls are allowed; once the
//! window has elapsed the record is reset on the next call. The map of
//! tracked identifiers is bounded by `max_entries`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_WINDOW_MS: i64 = 60_000;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptWindow {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
}

impl AttemptWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_start: now,
            last_attempt: now,
        }
    }
}

pub struct RateLimiter {
    attempts: HashMap<String, AttemptWindow>,
    max_attempts: u32,
    window: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::milliseconds(DEFAULT_WINDOW_MS))
    }
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self::with_clock(max_attempts, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_attempts: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            attempts: HashMap::new(),
            max_attempts,
            window,
            max_entries: DEFAULT_MAX_ENTRIES,
            clock,
        }
    }

    pub fn from_config(config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(config.rate_limit_max_attempts, config.rate_limit_window(), clock)
            .max_entries(config.rate_limit_max_entries)
    }

    /// Cap the number of tracked identifiers (at least 1)
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Check whether `identifier` may make another attempt, recording it if so.
    pub fn is_allowed(&mut self, identifier: &str) -> bool {
        let now = self.clock.now();

        if !self.attempts.contains_key(identifier) {
            self.make_room(now);
            self.attempts
                .insert(identifier.to_string(), AttemptWindow::new(now));
            return true;
        }
        let Some(record) = self.attempts.get_mut(identifier) else {
            return true;
        };

        if now - record.window_start > self.window {
            *record = AttemptWindow::new(now);
            return true;
        }

        if record.count < self.max_attempts {
            record.count += 1;
            record.last_attempt = now;
            return true;
        }

        debug!(identifier, count = record.count, "Attempt denied");
        false
    }

    /// Attempts left for `identifier` in its current window
    pub fn remaining(&self, identifier: &str) -> u32 {
        match self.attempts.get(identifier) {
            Some(record) if self.clock.now() - record.window_start <= self.window => {
                self.max_attempts.saturating_sub(record.count)
            }
            _ => self.max_attempts,
        }
    }

    /// Forget `identifier`, e.g. after a successful login
    pub fn reset(&mut self, identifier: &str) {
        self.attempts.remove(identifier);
    }

    /// Drop every record whose window has elapsed. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now();
        let window = self.window;
        let before = self.attempts.len();
        self.attempts
            .retain(|_, record| now - record.window_start <= window);
        before - self.attempts.len()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&AttemptWindow> {
        self.attempts.get(identifier)
    }

    /// Ensure there is space for one more identifier.
    fn make_room(&mut self, now: DateTime<Utc>) {
        if self.attempts.len() < self.max_entries {
            return;
        }
        let swept = self.sweep();
        if swept > 0 {
            debug!(swept, "Swept expired rate limit windows");
        }
        if self.attempts.len() < self.max_entries {
            return;
        }

        // Still full: evict the least recently active identifier
        let oldest = self
            .attempts
            .iter()
            .min_by_key(|(_, record)| record.last_attempt)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            warn!(
                identifier = %key,
                idle_ms = (now - self.attempts[&key].last_attempt).num_milliseconds(),
                "Rate limiter full, evicting least recent identifier"
            );
            self.attempts.remove(&key);
        }
    }
}
