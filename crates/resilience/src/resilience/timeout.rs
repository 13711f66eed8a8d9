//! Timeout and cancellation wrapper
//!
//! Races a single attempt of an operation against a deadline and an optional
//! external [`CancellationToken`]. Whichever settles first decides the
//! outcome:
//!
//! - operation first: its `Ok`/`Err` propagates unchanged (errors wrapped in
//!   [`ResilienceError::OperationFailed`])
//! - deadline first: [`ResilienceError::Timeout`] with elapsed time and attempt
//!   number, and the operation future is dropped without being awaited
//! - cancellation first: [`ResilienceError::Cancelled`]
//!
//! Dropping the future stops it at its next suspension point. Work it handed
//! to other tasks keeps running; use [`TimeoutWrapper::execute_with_token`] to
//! give the operation a child token it can forward to such work.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark_resilience::error::CommonError;
//! use bulwark_resilience::resilience::TimeoutWrapper;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let result = TimeoutWrapper::new("lookup", Duration::from_millis(100))
//!     .execute(async { Ok::<_, CommonError>(7) })
//!     .await;
//! assert_eq!(result.unwrap(), 7);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ResilienceError, ResilienceResult};

/// Single-attempt deadline and cancellation guard
#[derive(Debug, Clone)]
pub struct TimeoutWrapper {
    operation: String,
    timeout: Duration,
    attempt: u32,
    cancel: Option<CancellationToken>,
}

impl TimeoutWrapper {
    pub fn new(operation: impl Into<String>, timeout: Duration) -> Self {
        Self { operation: operation.into(), timeout, attempt: 1, cancel: None }
    }

    /// Attempt number reported in a timeout error (defaults to 1)
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Abort with `Cancelled` once `token` fires
    pub fn cancel_on(mut self, token: Option<&CancellationToken>) -> Self {
        self.cancel = token.cloned();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Race `operation` against the deadline and the cancellation signal
    pub async fn execute<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();
        let cancelled = wait_cancelled(self.cancel.as_ref());

        tokio::select! {
            biased;

            _ = cancelled => {
                debug!(operation = %self.operation, attempt = self.attempt, "operation cancelled");
                Err(ResilienceError::cancelled(&self.operation))
            }
            result = operation => {
                result.map_err(|source| ResilienceError::OperationFailed { source })
            }
            _ = tokio::time::sleep(self.timeout) => {
                let elapsed = started.elapsed();
                warn!(
                    operation = %self.operation,
                    attempt = self.attempt,
                    timeout_ms = self.timeout.as_millis() as u64,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "operation timed out"
                );
                Err(ResilienceError::timeout(&self.operation, self.timeout, elapsed, self.attempt))
            }
        }
    }

    /// Like [`execute`](Self::execute), handing the operation a child token
    ///
    /// The child token is cancelled when the deadline or the parent signal
    /// fires, so detached work the operation started can observe it.
    pub async fn execute_with_token<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let child = match &self.cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let result = self.execute(operation(child.clone())).await;
        if result.as_ref().is_err_and(|e| e.is_timeout() || e.is_cancelled()) {
            child.cancel();
        }
        result
    }
}

/// Free-function form of [`TimeoutWrapper::execute`]
pub async fn with_timeout<F, T, E>(
    operation_name: &str,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
    operation: F,
) -> ResilienceResult<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    TimeoutWrapper::new(operation_name, timeout).cancel_on(cancel).execute(operation).await
}

async fn wait_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::CommonError;

    #[tokio::test]
    async fn test_fast_operation_returns_value() {
        let wrapper = TimeoutWrapper::new("fast", Duration::from_secs(1));
        let result = wrapper.execute(async { Ok::<_, CommonError>("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_operation_error_propagates_unchanged() {
        let wrapper = TimeoutWrapper::new("failing", Duration::from_secs(1));
        let result: ResilienceResult<(), _> =
            wrapper.execute(async { Err(CommonError::validation("id", "empty")) }).await;

        match result {
            Err(ResilienceError::OperationFailed { source }) => {
                assert!(matches!(source, CommonError::Validation { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Validates a never-resolving operation hitting the deadline.
    ///
    /// Assertions:
    /// - Returns `Timeout` carrying the attempt number.
    /// - Elapsed time is at least the configured timeout (paused clock).
    #[tokio::test(start_paused = true)]
    async fn test_pending_operation_times_out() {
        let wrapper = TimeoutWrapper::new("hang", Duration::from_millis(250)).attempt(3);
        let result: ResilienceResult<(), CommonError> =
            wrapper.execute(std::future::pending()).await;

        match result {
            Err(ResilienceError::Timeout { elapsed, attempt, timeout, .. }) => {
                assert_eq!(attempt, 3);
                assert_eq!(timeout, Duration::from_millis(250));
                assert!(elapsed >= Duration::from_millis(250));
                assert!(elapsed < Duration::from_millis(300));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_resolution_is_abandoned() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let wrapper = TimeoutWrapper::new("slow", Duration::from_millis(100));

        let result = wrapper
            .execute(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, CommonError>(1)
            })
            .await;
        assert!(result.unwrap_err().is_timeout());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!finished.load(Ordering::SeqCst), "dropped operation must not keep running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wins_over_pending_operation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: ResilienceResult<(), CommonError> = with_timeout(
            "cancellable",
            Duration::from_secs(5),
            Some(&token),
            std::future::pending(),
        )
        .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_token_skips_operation() {
        let token = CancellationToken::new();
        token.cancel();
        let polled = Arc::new(AtomicBool::new(false));
        let flag = polled.clone();

        let result = TimeoutWrapper::new("skipped", Duration::from_secs(1))
            .cancel_on(Some(&token))
            .execute(async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, CommonError>(())
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert!(!polled.load(Ordering::SeqCst));
    }

    /// Validates cooperative cancellation through the child token.
    ///
    /// Assertions:
    /// - The child token handed to the operation is cancelled on timeout.
    #[tokio::test(start_paused = true)]
    async fn test_execute_with_token_cancels_child_on_timeout() {
        let observed = Arc::new(parking_lot::Mutex::new(None::<CancellationToken>));
        let slot = observed.clone();

        let result: ResilienceResult<(), CommonError> =
            TimeoutWrapper::new("detached", Duration::from_millis(50))
                .execute_with_token(|child| {
                    *slot.lock() = Some(child);
                    std::future::pending()
                })
                .await;

        assert!(result.unwrap_err().is_timeout());
        let child = observed.lock().take().unwrap();
        assert!(child.is_cancelled());
    }
}
