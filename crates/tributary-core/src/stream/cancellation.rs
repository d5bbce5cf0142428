//! Cancellation support for stream pipelines
//!
//! One token is handed to every stage that suspends; cancelling it ends the
//! pipeline at the next suspension point.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::PullStream;
use crate::error::PullResult;

/// Wrapper around CancellationToken for pipeline cancellation
#[derive(Clone, Debug)]
pub struct StreamCancellation {
    token: CancellationToken,
}

impl StreamCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Cancel every stage observing this token
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token itself, for stages that take one
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Get a child token for a sub-pipeline
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Create a fresh token (for starting a new run)
    pub fn reset(&mut self) {
        self.token = CancellationToken::new();
    }
}

impl Default for StreamCancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when `token` is cancelled; never resolves without a token
pub(crate) async fn wait_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Stream that ends as soon as its token is cancelled
///
/// The in-flight upstream pull is dropped on cancellation, so the consumer is
/// released even when the producer would have kept it waiting.
pub struct Cancellable<S> {
    inner: S,
    token: CancellationToken,
    finished: bool,
}

impl<S> Cancellable<S> {
    pub(crate) fn new(inner: S, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            finished: false,
        }
    }
}

#[async_trait]
impl<S: PullStream> PullStream for Cancellable<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        if self.finished || self.token.is_cancelled() {
            self.finished = true;
            return Ok(None);
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!("cancel_on: token cancelled, ending stream");
                self.finished = true;
                Ok(None)
            }
            result = self.inner.pull() => {
                if matches!(result, Ok(None)) {
                    self.finished = true;
                }
                result
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }
        (0, self.inner.size_hint().1)
    }
}
