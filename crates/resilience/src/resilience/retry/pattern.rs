//! Learned retry patterns
//!
//! One [`RetryPattern`] per `(operation, error category)`, backed by a
//! fixed-capacity ring buffer of [`RetryAttempt`] records. Totals and the
//! success rate are updated together under the entry's lock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorCategory;
use crate::utils::{duration_millis, option_duration_millis};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternKey {
    pub operation: String,
    pub category: ErrorCategory,
}

impl PatternKey {
    pub fn new(operation: impl Into<String>, category: ErrorCategory) -> Self {
        Self { operation: operation.into(), category }
    }
}

/// One attempt of one retry sequence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    /// 1-based attempt number within its sequence
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    /// Delay slept before this attempt
    #[serde(with = "duration_millis")]
    pub delay: Duration,
    pub success: bool,
}

/// Aggregated statistics for one `(operation, category)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPattern {
    pub operation: String,
    pub category: ErrorCategory,
    pub success_rate: f64,
    /// Mean retries (attempts minus one) over finished sequences
    pub average_retries: f64,
    /// Median delay preceding the successes held in the history
    #[serde(with = "option_duration_millis")]
    pub best_delay: Option<Duration>,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub sequences: u64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct PatternEntry {
    pattern: RetryPattern,
    history: VecDeque<RetryAttempt>,
    capacity: usize,
    last_touched: Instant,
}

impl PatternEntry {
    pub(crate) fn new(key: &PatternKey, capacity: usize, now: Instant, now_utc: DateTime<Utc>) -> Self {
        Self {
            pattern: RetryPattern {
                operation: key.operation.clone(),
                category: key.category,
                success_rate: 0.0,
                average_retries: 0.0,
                best_delay: None,
                total_attempts: 0,
                total_successes: 0,
                sequences: 0,
                last_updated: now_utc,
            },
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            last_touched: now,
        }
    }

    pub(crate) fn record(&mut self, attempt: RetryAttempt, now: Instant) {
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        let success = attempt.success;
        self.pattern.last_updated = attempt.timestamp;
        self.history.push_back(attempt);
        self.last_touched = now;

        self.pattern.total_attempts += 1;
        if success {
            self.pattern.total_successes += 1;
            self.pattern.best_delay = median(
                self.history.iter().filter(|a| a.success).map(|a| a.delay).collect(),
            );
        }
        self.pattern.success_rate =
            self.pattern.total_successes as f64 / self.pattern.total_attempts as f64;
    }

    /// Fold a finished sequence into the running mean of retries
    pub(crate) fn record_sequence(&mut self, retries: u32, now: Instant) {
        let p = &mut self.pattern;
        p.sequences += 1;
        p.average_retries += (retries as f64 - p.average_retries) / p.sequences as f64;
        self.last_touched = now;
    }

    /// Learned base delay once the pattern has more than `min_samples` attempts
    pub(crate) fn learned_delay(&self, min_samples: u64) -> Option<Duration> {
        if self.pattern.total_attempts <= min_samples {
            return None;
        }
        self.pattern.best_delay.filter(|d| !d.is_zero())
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched)
    }

    pub(crate) fn pattern(&self) -> &RetryPattern {
        &self.pattern
    }

    pub(crate) fn history(&self) -> impl Iterator<Item = &RetryAttempt> {
        self.history.iter()
    }
}

fn median(mut delays: Vec<Duration>) -> Option<Duration> {
    if delays.is_empty() {
        return None;
    }
    delays.sort_unstable();
    let mid = delays.len() / 2;
    if delays.len() % 2 == 0 {
        Some((delays[mid - 1] + delays[mid]) / 2)
    } else {
        Some(delays[mid])
    }
}
