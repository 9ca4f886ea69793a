use std::{future::Future, time::Duration};

use snafu::Snafu;
use tokio::time::{Instant, timeout_at};

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum DeadlineError {
    #[snafu(display("Deadline elapsed before the operation started."))]
    Elapsed,
    #[snafu(display("Operation did not complete before the deadline."))]
    TimedOut,
}

/// A point in time shared by every step of one request.
///
/// Operations started after the deadline fail immediately without being
/// polled, so no network request is issued once the deadline has passed.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Runs `future` to completion, or until the deadline passes.
    pub async fn run<F: Future>(self, future: F) -> Result<F::Output, DeadlineError> {
        if self.has_elapsed() {
            return Err(DeadlineError::Elapsed);
        }
        self.bound(future).await
    }

    /// Like [`Self::run`], but `future` is polled once even after the
    /// deadline, so waits that are already satisfied still succeed.
    pub async fn bound<F: Future>(self, future: F) -> Result<F::Output, DeadlineError> {
        timeout_at(self.0, future)
            .await
            .map_err(|_| DeadlineError::TimedOut)
    }
}
