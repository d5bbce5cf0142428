//! Per-pull deadline guard

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cancellation::wait_cancelled;
use super::PullStream;
use crate::error::PullResult;

/// Terminal event yielded when a pull outlives its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutEvent {
    /// The configured per-pull timeout
    #[serde(with = "millis")]
    pub after: Duration,
    /// Items delivered before the timeout
    pub items_before: usize,
}

impl TimeoutEvent {
    pub fn message(&self) -> String {
        format!("Timeout after {}ms", self.after.as_millis())
    }
}

/// Item type of a [`TimeoutGuard`]: an upstream item or the timeout event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Timed<T> {
    Item(T),
    TimedOut(TimeoutEvent),
}

impl<T> Timed<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            Timed::Item(item) => Some(item),
            Timed::TimedOut(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Timed::TimedOut(_))
    }
}

/// Races every upstream pull against a deadline armed when that pull begins
///
/// When the deadline wins the upstream pull future is dropped, one
/// [`Timed::TimedOut`] is yielded and the guard is done from then on.
pub struct TimeoutGuard<S> {
    upstream: S,
    timeout: Duration,
    deadline: Option<Instant>,
    delivered: usize,
    finished: bool,
    cancel: Option<CancellationToken>,
}

impl<S> TimeoutGuard<S> {
    pub(crate) fn new(upstream: S, timeout: Duration) -> Self {
        Self {
            upstream,
            timeout,
            deadline: None,
            delivered: 0,
            finished: false,
            cancel: None,
        }
    }

    /// End the stream (without a timeout event) once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Deadline of the pull currently in flight, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[async_trait]
impl<S: PullStream> PullStream for TimeoutGuard<S> {
    type Item = Timed<S::Item>;

    async fn pull(&mut self) -> PullResult<Timed<S::Item>> {
        if self.finished {
            return Ok(None);
        }

        let deadline = Instant::now() + self.timeout;
        self.deadline = Some(deadline);

        let outcome = tokio::select! {
            biased;
            _ = wait_cancelled(self.cancel.as_ref()) => {
                debug!("with_timeout: cancelled");
                self.finished = true;
                Ok(None)
            }
            result = self.upstream.pull() => match result {
                Ok(Some(item)) => {
                    self.delivered += 1;
                    Ok(Some(Timed::Item(item)))
                }
                Ok(None) => {
                    self.finished = true;
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    delivered = self.delivered,
                    "with_timeout: upstream stalled, ending stream"
                );
                self.finished = true;
                Ok(Some(Timed::TimedOut(TimeoutEvent {
                    after: self.timeout,
                    items_before: self.delivered,
                })))
            }
        };

        self.deadline = None;
        outcome
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }
        // Upstream items plus at most one timeout event
        let (_, upper) = self.upstream.size_hint();
        (0, upper.and_then(|u| u.checked_add(1)))
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }
}
