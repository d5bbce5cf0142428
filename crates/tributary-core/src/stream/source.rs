//! Producers: the leaves of a pipeline

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cancellation::wait_cancelled;
use super::PullStream;
use crate::error::PullResult;

/// Stream over an owned list, sleeping `delay` before each item
pub struct FromArray<T> {
    items: std::vec::IntoIter<T>,
    delay: Duration,
    cancel: Option<CancellationToken>,
}

/// Create a stream that yields `items` in order, pacing each one by `delay`
pub fn from_array<T: Send>(items: impl Into<Vec<T>>, delay: Duration) -> FromArray<T> {
    FromArray {
        items: items.into().into_iter(),
        delay,
        cancel: None,
    }
}

impl<T> FromArray<T> {
    /// Stop producing once `token` is cancelled, including mid-delay
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[async_trait]
impl<T: Send> PullStream for FromArray<T> {
    type Item = T;

    async fn pull(&mut self) -> PullResult<T> {
        if self.items.as_slice().is_empty() {
            return Ok(None);
        }
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Ok(None);
        }

        // The item is only taken once the delay has fully elapsed, so a dropped
        // pull never loses it.
        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = wait_cancelled(self.cancel.as_ref()) => {
                    debug!("from_array: cancelled during delay");
                    return Ok(None);
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        Ok(self.items.next())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.items.len();
        if self.cancel.is_some() {
            (0, Some(left))
        } else {
            (left, Some(left))
        }
    }
}

/// Stream over any iterator, without pacing
pub struct FromIter<I> {
    iter: I,
}

pub fn from_iter<I>(iter: I) -> FromIter<I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: Send,
    I::Item: Send,
{
    FromIter {
        iter: iter.into_iter(),
    }
}

#[async_trait]
impl<I> PullStream for FromIter<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    type Item = I::Item;

    async fn pull(&mut self) -> PullResult<I::Item> {
        Ok(self.iter.next())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// Stream driven by an async closure, one call per pull
///
/// This is the seam for external producers (paginated clients, chunked file
/// readers): the closure returns `Ok(Some(item))`, `Ok(None)` when exhausted,
/// or an error.
pub struct FromFn<F> {
    f: F,
    finished: bool,
    upper: Option<usize>,
}

pub fn from_fn<T, F, Fut>(f: F) -> FromFn<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = PullResult<T>> + Send,
    T: Send,
{
    FromFn {
        f,
        finished: false,
        upper: None,
    }
}

impl<F> FromFn<F> {
    /// Declare that the producer yields at most `max` items, making it collectable
    pub fn with_upper_bound(mut self, max: usize) -> Self {
        self.upper = Some(max);
        self
    }
}

#[async_trait]
impl<T, F, Fut> PullStream for FromFn<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = PullResult<T>> + Send,
    T: Send,
{
    type Item = T;

    async fn pull(&mut self) -> PullResult<T> {
        if self.finished {
            return Ok(None);
        }
        let result = (self.f)().await;
        match &result {
            Ok(Some(_)) => {
                if let Some(upper) = self.upper.as_mut() {
                    *upper = upper.saturating_sub(1);
                }
            }
            Ok(None) => self.finished = true,
            Err(_) => {}
        }
        result
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (0, self.upper)
        }
    }
}

/// A stream that never produces and never finishes
pub struct Pending<T> {
    _marker: PhantomData<fn() -> T>,
}

pub fn pending<T: Send>() -> Pending<T> {
    Pending {
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T: Send> PullStream for Pending<T> {
    type Item = T;

    async fn pull(&mut self) -> PullResult<T> {
        std::future::pending().await
    }
}
