//! Adaptive batch sizing.

use std::time::Duration;
use tenantrag_core::IngestionConfig;
use tracing::debug;

/// Grows batches that finish fast and shrinks batches that run slow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveBatchSizer {
    min: usize,
    max: usize,
    current: usize,
    fast: Duration,
    slow: Duration,
}

impl AdaptiveBatchSizer {
    /// Sizer bounded by `[min, max]`, starting at `initial`.
    pub fn new(min: usize, initial: usize, max: usize, fast: Duration, slow: Duration) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            min,
            max,
            current: initial.clamp(min, max),
            fast,
            slow,
        }
    }

    /// Sizer from ingestion settings.
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(
            config.batch_min,
            config.batch_initial,
            config.batch_max,
            Duration::from_millis(config.fast_batch_ms),
            Duration::from_millis(config.slow_batch_ms),
        )
    }

    /// Restart from a size saved in a checkpoint.
    pub fn resume_at(mut self, size: usize) -> Self {
        if size > 0 {
            self.current = size.clamp(self.min, self.max);
        }
        self
    }

    /// Size of the next batch.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Feed back how long the last batch took. Returns the next size.
    pub fn record(&mut self, elapsed: Duration) -> usize {
        let previous = self.current;
        if elapsed < self.fast {
            let grown = (previous as f64 * 1.5).ceil() as usize;
            self.current = grown.max(previous + 1).min(self.max);
        } else if elapsed > self.slow {
            self.shrink();
        }
        if self.current != previous {
            debug!(
                from = previous,
                to = self.current,
                elapsed_ms = elapsed.as_millis() as u64,
                "Batch size adjusted"
            );
        }
        self.current
    }

    /// Halve the batch size, not below the minimum.
    pub fn shrink(&mut self) -> usize {
        self.current = (self.current / 2).max(self.min);
        self.current
    }
}
