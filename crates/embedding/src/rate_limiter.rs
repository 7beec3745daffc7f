//! Process-wide sliding-window rate limiter for the embedding provider.
//!
//! Tracks requests and estimated tokens over a rolling minute. A caller
//! that would exceed either budget sleeps until enough of the window has
//! rolled off, up to a bounded wait. Requests are never dropped silently:
//! a wait beyond the bound is an error.

use std::collections::VecDeque;
use std::time::Duration;
use tenantrag_core::{EmbeddingConfig, RagError, Result};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Limits for [`RateLimiter`]. Zero disables a limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests per window
    pub requests_per_minute: u32,

    /// Estimated tokens per window
    pub tokens_per_minute: u64,

    /// Longest a single acquire may wait
    pub max_wait: Duration,
}

impl From<&EmbeddingConfig> for RateLimitConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            requests_per_minute: config.requests_per_minute,
            tokens_per_minute: config.tokens_per_minute,
            max_wait: config.max_wait(),
        }
    }
}

#[derive(Default)]
struct Window {
    /// Timestamps of admitted requests
    requests: VecDeque<Instant>,
    /// (timestamp, tokens) of admitted requests
    tokens: VecDeque<(Instant, u64)>,
}

impl Window {
    fn prune(&mut self, now: Instant, span: Duration) {
        while self.requests.front().is_some_and(|t| *t + span <= now) {
            self.requests.pop_front();
        }
        while self.tokens.front().is_some_and(|(t, _)| *t + span <= now) {
            self.tokens.pop_front();
        }
    }

    /// Time until a request of `tokens` fits, `None` if it fits now.
    fn wait_for(&self, config: &RateLimitConfig, tokens: u64, now: Instant, span: Duration) -> Option<Duration> {
        let mut wait = Duration::ZERO;

        let rpm = config.requests_per_minute as usize;
        if rpm > 0 && self.requests.len() >= rpm {
            // The request that must roll off is the one `rpm` places back.
            let idx = self.requests.len() - rpm;
            wait = wait.max((self.requests[idx] + span).saturating_duration_since(now));
        }

        if config.tokens_per_minute > 0 && !self.tokens.is_empty() {
            let used: u64 = self.tokens.iter().map(|(_, t)| t).sum();
            if used + tokens > config.tokens_per_minute {
                // Oversized requests still go through once the window is empty.
                let must_free = (used + tokens - config.tokens_per_minute).min(used);
                let mut freed = 0;
                for (at, t) in &self.tokens {
                    freed += t;
                    if freed >= must_free {
                        wait = wait.max((*at + span).saturating_duration_since(now));
                        break;
                    }
                }
            }
        }

        (!wait.is_zero()).then_some(wait)
    }
}

/// Sliding-window limiter shared by every caller of one provider.
pub struct RateLimiter {
    config: RateLimitConfig,
    span: Duration,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// Limiter with a one minute window.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_window(config, Duration::from_secs(60))
    }

    /// Limiter with a custom window length.
    pub fn with_window(config: RateLimitConfig, span: Duration) -> Self {
        Self {
            config,
            span,
            window: Mutex::new(Window::default()),
        }
    }

    /// Limiter that admits everything.
    pub fn unlimited() -> Self {
        Self::new(RateLimitConfig {
            requests_per_minute: 0,
            tokens_per_minute: 0,
            max_wait: Duration::ZERO,
        })
    }

    /// Wait until a request of `tokens` estimated tokens fits, then record it.
    ///
    /// Fails with [`RagError::RateLimited`] when the required wait exceeds
    /// the configured bound.
    pub async fn acquire(&self, tokens: u64) -> Result<()> {
        let deadline = Instant::now() + self.config.max_wait;
        loop {
            let wait = {
                let now = Instant::now();
                let mut window = self.window.lock().await;
                window.prune(now, self.span);
                match window.wait_for(&self.config, tokens, now, self.span) {
                    None => {
                        window.requests.push_back(now);
                        window.tokens.push_back((now, tokens));
                        return Ok(());
                    }
                    Some(wait) => wait,
                }
            };

            if Instant::now() + wait > deadline {
                return Err(RagError::RateLimited(format!(
                    "embedding budget frees up in {:.1}s, beyond the {:.1}s wait bound",
                    wait.as_secs_f64(),
                    self.config.max_wait.as_secs_f64()
                )));
            }
            debug!(wait_ms = wait.as_millis() as u64, tokens, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests and tokens currently inside the window.
    pub async fn usage(&self) -> (usize, u64) {
        let mut window = self.window.lock().await;
        window.prune(Instant::now(), self.span);
        (window.requests.len(), window.tokens.iter().map(|(_, t)| t).sum())
    }

    /// Forget all recorded usage.
    pub async fn reset(&self) {
        let mut window = self.window.lock().await;
        window.requests.clear();
        window.tokens.clear();
    }
}
