//! Shared retry-with-backoff utility.
//!
//! The article source's page loop, the generator's call loop, and the vector
//! store's collection-readiness poll all retry the same way: bounded attempts,
//! a delay between them, and an early exit for errors the caller deems
//! non-retryable. Cancellation is honoured before every attempt and during
//! every backoff wait.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay between every attempt.
    Fixed,
    /// `attempt * base_delay` (1-based), so waits grow linearly.
    Linear,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

/// Why a `RetryPolicy::run` gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error the caller marked non-retryable.
    Fatal(E),
    /// The cancellation token fired before or between attempts.
    Cancelled,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff,
        }
    }

    /// Delay to wait after a failed `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay * attempt,
        }
    }

    /// Runs `op` until it succeeds, the attempt budget is spent, a
    /// non-retryable error occurs, or `cancel` fires. `op` receives the
    /// 1-based attempt number.
    pub async fn run<T, E, Fut, Op, P>(
        &self,
        cancel: &CancellationToken,
        is_retryable: P,
        mut op: Op,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !is_retryable(&err) => return Err(RetryError::Fatal(err)),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        err,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
