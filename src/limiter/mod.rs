mod audit;
mod key;

pub use key::{sanitize_key, KeyEncoding};

use crate::backend::Backend;
use crate::clock::{Clock, SystemClock};
use audit::AuditLog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_IDENTIFIER: &str = "default";
pub const DEFAULT_MAX_REQUESTS: u64 = 10;
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// The state of a key's window, as seen by a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Total number of requests that are permitted within the window.
    pub limit: u64,
    /// Number of requests that will be permitted right now.
    pub remaining: u64,
    /// Seconds until the oldest event in the window expires, 0 if the window is empty.
    pub seconds_until_reset: u64,
}

impl RateLimitStatus {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.seconds_until_reset)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_requests must be greater than zero")]
    ZeroMaxRequests,
    #[error("window size must be at least one second")]
    ZeroWindow,
    #[error("invalid identifier {0:?}, expected letters, digits, '_' or '-'")]
    InvalidIdentifier(String),
}

struct Config {
    identifier: String,
    max_requests: u64,
    window: u64,
    key_encoding: KeyEncoding,
    audit: AuditLog,
}

/// A sliding window rate limiter with persistent storage.
///
/// Each key has a window of admission timestamps held by the [Backend]. On every call, events
/// older than the window size are ignored; [RateLimiter::check] only records a new event if fewer
/// than `max_requests` valid events remain, so the Nth request in a window is admitted and the
/// (N+1)th is denied.
///
/// Storage failures never reach the caller: a window that cannot be loaded is treated as empty
/// and a window that cannot be saved is simply not recorded. Both are logged. This means a
/// corrupted or unreadable store lets requests through.
///
/// The load-decide-save cycle is not atomic, so concurrent requests for the same key may
/// briefly exceed the limit.
pub struct RateLimiter<B, C = SystemClock> {
    backend: B,
    clock: C,
    config: Arc<Config>,
}

impl<B: Clone, C: Clone> Clone for RateLimiter<B, C> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> RateLimiter<B> {
    /// # Arguments
    ///
    /// * `backend`: Where the windows are persisted.
    pub fn builder(backend: B) -> RateLimiterBuilder<B> {
        RateLimiterBuilder {
            backend,
            clock: SystemClock,
            identifier: DEFAULT_IDENTIFIER.to_owned(),
            max_requests: DEFAULT_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_WINDOW_SECONDS),
            key_encoding: KeyEncoding::default(),
            audit_log: None,
        }
    }
}

impl<B: Backend, C: Clock> RateLimiter<B, C> {
    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    pub fn max_requests(&self) -> u64 {
        self.config.max_requests
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.config.window)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend key that `key`'s window is stored under, e.g. `login_19216801`.
    pub fn storage_key(&self, key: &str) -> String {
        key::storage_key(&self.config.identifier, key, self.config.key_encoding)
    }

    /// Decide whether a request for `key` is admitted, recording it if so.
    pub async fn check(&self, key: &str) -> bool {
        self.request(key).await.0.is_allowed()
    }

    /// As [RateLimiter::check], also returning the window status after the decision.
    pub async fn request(&self, key: &str) -> (Decision, RateLimitStatus) {
        let storage_key = self.storage_key(key);
        let now = self.clock.now();
        let mut events = self.load_valid(&storage_key, now).await;

        if events.len() as u64 >= self.config.max_requests {
            self.config.audit.excess(
                now,
                &self.config.identifier,
                key,
                self.config.max_requests,
                self.config.window,
            );
            return (Decision::Denied, self.status_of(&events, now));
        }

        events.push(now);
        if let Err(e) = self.backend.save(&storage_key, &events).await {
            log::warn!("Unable to save rate limit window {storage_key}: {e}");
        }
        log::debug!(
            "Rate limit {storage_key}: admitted {} of {}",
            events.len(),
            self.config.max_requests
        );
        (Decision::Allowed, self.status_of(&events, now))
    }

    /// Number of requests `key` may still make in the current window.
    pub async fn remaining_requests(&self, key: &str) -> u64 {
        self.status(key).await.remaining
    }

    /// Seconds until the oldest valid event for `key` leaves the window, 0 if there is none.
    pub async fn time_until_reset(&self, key: &str) -> u64 {
        self.status(key).await.seconds_until_reset
    }

    /// Read-only view of `key`'s window; nothing is recorded or pruned in storage.
    pub async fn status(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let events = self.load_valid(&self.storage_key(key), now).await;
        self.status_of(&events, now)
    }

    /// Forget every event recorded for `key`. Resetting an unknown key is a no-op.
    pub async fn reset(&self, key: &str) {
        let storage_key = self.storage_key(key);
        if let Err(e) = self.backend.delete(&storage_key).await {
            log::warn!("Unable to reset rate limit window {storage_key}: {e}");
        }
    }

    async fn load_valid(&self, storage_key: &str, now: u64) -> Vec<u64> {
        let mut events = match self.backend.load(storage_key).await {
            Ok(events) => events,
            Err(e) => {
                log::warn!(
                    "Unable to load rate limit window {storage_key}, treating it as empty: {e}"
                );
                Vec::new()
            }
        };
        let cutoff = now.saturating_sub(self.config.window);
        events.retain(|&timestamp| timestamp >= cutoff);
        events
    }

    fn status_of(&self, events: &[u64], now: u64) -> RateLimitStatus {
        let seconds_until_reset = events
            .iter()
            .min()
            .map(|oldest| oldest.saturating_add(self.config.window).saturating_sub(now))
            .unwrap_or(0);
        RateLimitStatus {
            limit: self.config.max_requests,
            remaining: self
                .config
                .max_requests
                .saturating_sub(events.len() as u64),
            seconds_until_reset,
        }
    }
}

pub struct RateLimiterBuilder<B, C = SystemClock> {
    backend: B,
    clock: C,
    identifier: String,
    max_requests: u64,
    window: Duration,
    key_encoding: KeyEncoding,
    audit_log: Option<PathBuf>,
}

impl<B: Backend, C: Clock> RateLimiterBuilder<B, C> {
    /// Namespace separating independent limiters sharing a backend, e.g. `login` or `api`.
    ///
    /// Default is `default`. Must only contain letters, digits, `_` or `-`.
    pub fn identifier(mut self, identifier: &str) -> Self {
        self.identifier = identifier.to_owned();
        self
    }

    /// The total requests to be allowed within the window.
    ///
    /// Default is 10.
    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Length of the sliding window, in whole seconds (fractions are dropped).
    ///
    /// Default is 60 seconds.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Replace the time source, e.g. with a [ManualClock](crate::ManualClock) in tests.
    pub fn clock<C2: Clock>(self, clock: C2) -> RateLimiterBuilder<B, C2> {
        RateLimiterBuilder {
            backend: self.backend,
            clock,
            identifier: self.identifier,
            max_requests: self.max_requests,
            window: self.window,
            key_encoding: self.key_encoding,
            audit_log: self.audit_log,
        }
    }

    /// Choose how keys are turned into storage names.
    ///
    /// Default is [KeyEncoding::Strip].
    pub fn key_encoding(mut self, key_encoding: KeyEncoding) -> Self {
        self.key_encoding = key_encoding;
        self
    }

    /// Append a line to this file for every denied request, in addition to the warn log.
    pub fn audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    pub fn build(self) -> Result<RateLimiter<B, C>, ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::ZeroMaxRequests);
        }
        if self.window.as_secs() == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if !key::is_valid_identifier(&self.identifier) {
            return Err(ConfigError::InvalidIdentifier(self.identifier));
        }
        Ok(RateLimiter {
            backend: self.backend,
            clock: self.clock,
            config: Arc::new(Config {
                identifier: self.identifier,
                max_requests: self.max_requests,
                window: self.window.as_secs(),
                key_encoding: self.key_encoding,
                audit: AuditLog::new(self.audit_log),
            }),
        })
    }
}
