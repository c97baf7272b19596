use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Fixed delay between attempts, optionally bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
    pub interval: Duration,
    /// `None` retries until the operation succeeds or is cancelled.
    pub max_retries: Option<u32>,
}

impl ConstantBackoff {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries: Some(max_retries),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: None,
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt > max)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{0} cancelled")]
    Cancelled(String),
    #[error("{0}")]
    Failed(E),
}

/// Runs `operation` until it succeeds, returns a non-retryable error, runs
/// out of retries or the token is cancelled.
///
/// Logs a warning on each retried failure and an error once retries are exhausted.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    name: &str,
    backoff: &ConstantBackoff,
    token: &CancellationToken,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled(name.to_string()));
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(RetryError::Failed(err));
        }

        attempt += 1;
        if backoff.exhausted(attempt) {
            error!("max retries exceeded while running {name}: {err}");
            return Err(RetryError::Failed(err));
        }

        warn!("attempt {attempt} of {name} failed: {err}, retrying in {:?}", backoff.interval);
        tokio::select! {
            _ = token.cancelled() => return Err(RetryError::Cancelled(name.to_string())),
            _ = sleep(backoff.interval) => {}
        }
    }
}
