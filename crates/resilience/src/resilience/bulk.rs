//! Bulk/batch processor
//!
//! Splits a collection into fixed-size batches. Up to `parallel_batches`
//! batches run at once and the items inside a batch run concurrently, each
//! with its own exponential-backoff retry loop. Items are recorded as they
//! finish, in any order; `successful` and `failed` are sorted back into input
//! order before the result is returned.
//!
//! Whenever a batch finishes the processor reports progress, compares the
//! running failure rate (`failed / processed`, in percent) with
//! `failure_threshold` and admits the next queued batch. Once the threshold
//! is exceeded the remaining batches are abandoned and the partial result is
//! returned. Cancellation stops admission and drops the items still running;
//! every item that already finished stays in the result.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError};
use super::retry::ExponentialBackoff;
use crate::utils::duration_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub batch_size: usize,
    /// Batches in flight at once
    pub parallel_batches: usize,
    /// Total attempts per item, the first included
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub jitter: bool,
    /// Abort once the failure rate exceeds this percentage
    pub failure_threshold: f64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            parallel_batches: 1,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            failure_threshold: 50.0,
        }
    }
}

impl BulkConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size must be greater than 0"));
        }
        if self.parallel_batches == 0 {
            return Err(ConfigError::invalid("parallel_batches must be greater than 0"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries must be at least 1"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("backoff_multiplier must be >= 1.0"));
        }
        if !(0.0..=100.0).contains(&self.failure_threshold) {
            return Err(ConfigError::invalid("failure_threshold must be a percentage in [0, 100]"));
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            base_delay: self.retry_delay,
            multiplier: self.backoff_multiplier,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

type ProgressFn = dyn Fn(usize, usize, usize) + Send + Sync;
type FailureFn<I, E> = dyn Fn(&I, &E, u32) + Send + Sync;
type RetryIfFn<E> = dyn Fn(&E) -> bool + Send + Sync;

/// Optional callbacks and cancellation for one `process` call
pub struct BulkHooks<I, E> {
    on_progress: Option<Box<ProgressFn>>,
    on_failure: Option<Box<FailureFn<I, E>>>,
    retry_if: Option<Box<RetryIfFn<E>>>,
    cancel: Option<CancellationToken>,
}

impl<I, E> Default for BulkHooks<I, E> {
    fn default() -> Self {
        Self { on_progress: None, on_failure: None, retry_if: None, cancel: None }
    }
}

impl<I, E> fmt::Debug for BulkHooks<I, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkHooks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("retry_if", &self.retry_if.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl<I, E> BulkHooks<I, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every batch with `(completed, total, failed)`
    pub fn on_progress(mut self, f: impl Fn(usize, usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called after every failed attempt with `(item, error, attempt)`
    pub fn on_failure(mut self, f: impl Fn(&I, &E, u32) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Only retry errors for which `f` returns true
    pub fn retry_if(mut self, f: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Some(Box::new(f));
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure<I, E> {
    /// Position of the item in the input
    pub index: usize,
    pub item: I,
    pub error: E,
    pub attempts: u32,
}

/// Why processing stopped before every batch ran
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BulkAbort {
    ThresholdExceeded { failure_rate: f64, threshold: f64 },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Completed,
    PartiallyCompleted,
    Aborted,
}

#[derive(Debug)]
pub struct BulkOperationResult<I, T, E> {
    /// Outputs of successful items, in input order
    pub successful: Vec<T>,
    pub failed: Vec<BulkFailure<I, E>>,
    pub total_processed: usize,
    pub total_failed: usize,
    pub duration: Duration,
    /// Batches that ran to completion
    pub batch_count: usize,
    pub abort: Option<BulkAbort>,
}

impl<I, T, E> BulkOperationResult<I, T, E> {
    pub fn status(&self) -> BulkStatus {
        if self.abort.is_some() {
            BulkStatus::Aborted
        } else if self.total_failed > 0 {
            BulkStatus::PartiallyCompleted
        } else {
            BulkStatus::Completed
        }
    }

    pub fn failure_rate(&self) -> f64 {
        failure_rate(self.total_failed, self.total_processed)
    }

    /// The abort reason as a resilience error, if processing stopped early
    pub fn abort_error<X>(&self, operation: &str) -> Option<ResilienceError<X>>
    where
        X: std::error::Error + Send + Sync + 'static,
    {
        match self.abort? {
            BulkAbort::ThresholdExceeded { failure_rate, threshold } => {
                Some(ResilienceError::ThresholdExceeded {
                    failure_rate,
                    threshold,
                    processed: self.total_processed,
                })
            }
            BulkAbort::Cancelled => Some(ResilienceError::cancelled(operation)),
        }
    }
}

enum ItemOutcome<I, T, E> {
    Success(T),
    Failure(BulkFailure<I, E>),
}

fn failure_rate(failed: usize, processed: usize) -> f64 {
    if processed == 0 {
        return 0.0;
    }
    failed as f64 / processed as f64 * 100.0
}

/// Outcomes gathered as items finish, in completion order
struct Tally<I, T, E> {
    successful: Vec<(usize, T)>,
    failed: Vec<BulkFailure<I, E>>,
    processed: usize,
    /// Unfinished items per batch
    remaining: Vec<usize>,
    batch_count: usize,
}

impl<I, T, E> Tally<I, T, E> {
    fn new(remaining: Vec<usize>) -> Self {
        Self { successful: Vec::new(), failed: Vec::new(), processed: 0, remaining, batch_count: 0 }
    }

    /// Returns true when `outcome` was the last item of its batch
    fn record(&mut self, batch: usize, index: usize, outcome: ItemOutcome<I, T, E>) -> bool {
        self.processed += 1;
        match outcome {
            ItemOutcome::Success(value) => self.successful.push((index, value)),
            ItemOutcome::Failure(failure) => self.failed.push(failure),
        }

        let Some(left) = self.remaining.get_mut(batch) else { return false };
        *left = left.saturating_sub(1);
        if *left == 0 {
            self.batch_count += 1;
            true
        } else {
            false
        }
    }

    fn finish(mut self, duration: Duration, abort: Option<BulkAbort>) -> BulkOperationResult<I, T, E> {
        self.successful.sort_by_key(|(index, _)| *index);
        self.failed.sort_by_key(|failure| failure.index);
        BulkOperationResult {
            total_processed: self.processed,
            total_failed: self.failed.len(),
            successful: self.successful.into_iter().map(|(_, value)| value).collect(),
            failed: self.failed,
            duration,
            batch_count: self.batch_count,
            abort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BulkProcessor {
    config: BulkConfig,
}

impl BulkProcessor {
    pub fn new(config: BulkConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: BulkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Process every item without callbacks or cancellation
    pub async fn process<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        operation: F,
    ) -> BulkOperationResult<I, T, E>
    where
        I: Clone,
        E: fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.process_with(items, operation, &BulkHooks::default()).await
    }

    #[instrument(skip_all, fields(items = items.len(), batch_size = self.config.batch_size))]
    pub async fn process_with<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        operation: F,
        hooks: &BulkHooks<I, E>,
    ) -> BulkOperationResult<I, T, E>
    where
        I: Clone,
        E: fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let total = items.len();
        let batch_size = self.config.batch_size;
        let batches = into_batches(items, batch_size);
        info!(total, batches = batches.len(), parallel = self.config.parallel_batches, "starting bulk operation");

        let mut tally = Tally::new(batches.iter().map(Vec::len).collect());
        let mut queued = batches.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut active_batches = 0;
        let operation = &operation;
        let mut abort = None;

        loop {
            while active_batches < self.config.parallel_batches && !is_cancelled(hooks.cancel.as_ref()) {
                let Some(batch) = queued.next() else { break };
                active_batches += 1;
                for (index, item) in batch {
                    in_flight.push(self.run_item(index, item, operation, hooks));
                }
            }

            let (index, outcome) = tokio::select! {
                biased;

                _ = wait_cancelled(hooks.cancel.as_ref()) => {
                    // Keep items that finished alongside the cancellation.
                    while let Some(Some((index, outcome))) = in_flight.next().now_or_never() {
                        tally.record(index / batch_size, index, outcome);
                    }
                    warn!(processed = tally.processed, total, "bulk operation cancelled");
                    abort = Some(BulkAbort::Cancelled);
                    break;
                }
                next = in_flight.next() => match next {
                    Some(finished) => finished,
                    None => break,
                },
            };

            if !tally.record(index / batch_size, index, outcome) {
                continue;
            }
            active_batches -= 1;

            debug!(
                batch = tally.batch_count,
                processed = tally.processed,
                failed = tally.failed.len(),
                "batch completed"
            );
            if let Some(on_progress) = &hooks.on_progress {
                on_progress(tally.processed, total, tally.failed.len());
            }

            let rate = failure_rate(tally.failed.len(), tally.processed);
            if rate > self.config.failure_threshold {
                warn!(
                    failure_rate = rate,
                    threshold = self.config.failure_threshold,
                    processed = tally.processed,
                    total,
                    "failure threshold exceeded, aborting remaining batches"
                );
                abort = Some(BulkAbort::ThresholdExceeded {
                    failure_rate: rate,
                    threshold: self.config.failure_threshold,
                });
                break;
            }
        }

        let result = tally.finish(started.elapsed(), abort);
        info!(
            processed = result.total_processed,
            failed = result.total_failed,
            batches = result.batch_count,
            duration_ms = result.duration.as_millis() as u64,
            "bulk operation finished"
        );
        result
    }

    async fn run_item<I, T, E, F, Fut>(
        &self,
        index: usize,
        item: I,
        operation: &F,
        hooks: &BulkHooks<I, E>,
    ) -> (usize, ItemOutcome<I, T, E>)
    where
        I: Clone,
        E: fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let backoff = self.config.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation(item.clone()).await {
                Ok(value) => return (index, ItemOutcome::Success(value)),
                Err(error) => error,
            };

            if let Some(on_failure) = &hooks.on_failure {
                on_failure(&item, &error, attempt);
            }

            let retryable = hooks.retry_if.as_ref().map_or(true, |retry_if| retry_if(&error));
            if !retryable || attempt >= self.config.max_retries {
                debug!(index, attempts = attempt, error = %error, "item failed");
                return (index, ItemOutcome::Failure(BulkFailure { index, item, error, attempts: attempt }));
            }

            tokio::time::sleep(backoff.delay(attempt, 1.0)).await;
        }
    }
}

fn into_batches<I>(items: Vec<I>, batch_size: usize) -> Vec<Vec<(usize, I)>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    for pair in items.into_iter().enumerate() {
        current.push(pair);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn is_cancelled(token: Option<&CancellationToken>) -> bool {
    token.is_some_and(CancellationToken::is_cancelled)
}

async fn wait_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
