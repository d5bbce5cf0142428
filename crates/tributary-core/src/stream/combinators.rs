//! Single-upstream combinators and the terminal `collect`
//!
//! Every combinator here keeps at most one upstream pull in flight and
//! preserves upstream order.

use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::envelope::Envelope;
use super::PullStream;
use crate::error::{ErrorMode, PullResult, StreamError};

/// Synchronous 1:1 transform, see [`StreamExt::map`](super::StreamExt::map)
pub struct Map<S, F> {
    upstream: S,
    f: F,
}

impl<S, F> Map<S, F> {
    pub(crate) fn new(upstream: S, f: F) -> Self {
        Self { upstream, f }
    }
}

#[async_trait]
impl<S, F, U> PullStream for Map<S, F>
where
    S: PullStream,
    F: FnMut(S::Item) -> U + Send,
    U: Send,
{
    type Item = U;

    async fn pull(&mut self) -> PullResult<U> {
        Ok(self.upstream.pull().await?.map(&mut self.f))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

/// Asynchronous 1:1 transform, see [`StreamExt::then`](super::StreamExt::then)
pub struct Then<S, F> {
    upstream: S,
    f: F,
}

impl<S, F> Then<S, F> {
    pub(crate) fn new(upstream: S, f: F) -> Self {
        Self { upstream, f }
    }
}

#[async_trait]
impl<S, F, Fut> PullStream for Then<S, F>
where
    S: PullStream,
    F: FnMut(S::Item) -> Fut + Send,
    Fut: Future + Send,
    Fut::Output: Send,
{
    type Item = Fut::Output;

    async fn pull(&mut self) -> PullResult<Fut::Output> {
        match self.upstream.pull().await? {
            Some(item) => Ok(Some((self.f)(item).await)),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

/// Fallible asynchronous transform
///
/// In [`ErrorMode::Propagate`] the first transform error is returned and the
/// stream then reports done. In [`ErrorMode::Resilient`] each error is returned
/// and pulling continues with the next item.
pub struct TryMap<S, F> {
    upstream: S,
    f: F,
    mode: ErrorMode,
    index: usize,
    failed: bool,
}

impl<S, F> TryMap<S, F> {
    pub(crate) fn new(upstream: S, f: F, mode: ErrorMode) -> Self {
        Self {
            upstream,
            f,
            mode,
            index: 0,
            failed: false,
        }
    }
}

#[async_trait]
impl<S, F, Fut, U> PullStream for TryMap<S, F>
where
    S: PullStream,
    F: FnMut(S::Item) -> Fut + Send,
    Fut: Future<Output = anyhow::Result<U>> + Send,
    U: Send,
{
    type Item = U;

    async fn pull(&mut self) -> PullResult<U> {
        if self.failed {
            return Ok(None);
        }

        let item = match self.upstream.pull().await {
            Ok(Some(item)) => item,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.failed = self.mode == ErrorMode::Propagate;
                return Err(e);
            }
        };

        let index = self.index;
        self.index += 1;

        match (self.f)(item).await {
            Ok(mapped) => Ok(Some(mapped)),
            Err(source) => {
                if self.mode == ErrorMode::Propagate {
                    debug!(index, "try_map: transform failed, terminating stage");
                    self.failed = true;
                }
                Err(StreamError::Transform { index, source })
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let (_, upper) = self.upstream.size_hint();
        (0, upper)
    }
}

/// Drops items failing the predicate; one pull may consume many upstream items
pub struct Filter<S, F> {
    upstream: S,
    predicate: F,
}

impl<S, F> Filter<S, F> {
    pub(crate) fn new(upstream: S, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
        }
    }
}

#[async_trait]
impl<S, F> PullStream for Filter<S, F>
where
    S: PullStream,
    F: FnMut(&S::Item) -> bool + Send,
{
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        while let Some(item) = self.upstream.pull().await? {
            if (self.predicate)(&item) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.upstream.size_hint().1)
    }
}

/// Filter with a fallible predicate, following the same [`ErrorMode`] rules as [`TryMap`]
pub struct TryFilter<S, F> {
    upstream: S,
    predicate: F,
    mode: ErrorMode,
    index: usize,
    failed: bool,
}

impl<S, F> TryFilter<S, F> {
    pub(crate) fn new(upstream: S, predicate: F, mode: ErrorMode) -> Self {
        Self {
            upstream,
            predicate,
            mode,
            index: 0,
            failed: false,
        }
    }
}

#[async_trait]
impl<S, F> PullStream for TryFilter<S, F>
where
    S: PullStream,
    F: FnMut(&S::Item) -> anyhow::Result<bool> + Send,
{
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        if self.failed {
            return Ok(None);
        }

        loop {
            let item = match self.upstream.pull().await {
                Ok(Some(item)) => item,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.failed = self.mode == ErrorMode::Propagate;
                    return Err(e);
                }
            };

            let index = self.index;
            self.index += 1;

            match (self.predicate)(&item) {
                Ok(true) => return Ok(Some(item)),
                Ok(false) => continue,
                Err(source) => {
                    self.failed = self.mode == ErrorMode::Propagate;
                    return Err(StreamError::Predicate { index, source });
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        (0, self.upstream.size_hint().1)
    }
}

/// Yields at most `limit` items
///
/// Reaching the limit stops pulling; the upstream producer is left as is and
/// is only released when this stream is dropped.
pub struct Take<S> {
    upstream: S,
    remaining: usize,
}

impl<S> Take<S> {
    pub(crate) fn new(upstream: S, limit: usize) -> Self {
        Self {
            upstream,
            remaining: limit,
        }
    }

    /// Give back the upstream stream, e.g. to keep consuming it
    pub fn into_inner(self) -> S {
        self.upstream
    }
}

#[async_trait]
impl<S: PullStream> PullStream for Take<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let item = self.upstream.pull().await?;
        match item {
            Some(_) => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    debug!("take: limit reached, no further upstream pulls");
                }
            }
            None => self.remaining = 0,
        }
        Ok(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.upstream.size_hint();
        let upper = match upper {
            Some(upper) => upper.min(self.remaining),
            None => self.remaining,
        };
        (lower.min(self.remaining), Some(upper))
    }
}

/// Side-effect hook on each item
pub struct Inspect<S, F> {
    upstream: S,
    f: F,
}

impl<S, F> Inspect<S, F> {
    pub(crate) fn new(upstream: S, f: F) -> Self {
        Self { upstream, f }
    }
}

#[async_trait]
impl<S, F> PullStream for Inspect<S, F>
where
    S: PullStream,
    F: FnMut(&S::Item) + Send,
{
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        let item = self.upstream.pull().await?;
        if let Some(item) = &item {
            (self.f)(item);
        }
        Ok(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

/// Turns per-item errors into [`Envelope::Failure`] and keeps pulling
///
/// Upstream stages should run in [`ErrorMode::Resilient`] so that they keep
/// producing after an error; a propagating upstream simply ends after its
/// failure envelope.
pub struct Resilient<S> {
    upstream: S,
    index: usize,
}

impl<S> Resilient<S> {
    pub(crate) fn new(upstream: S) -> Self {
        Self { upstream, index: 0 }
    }
}

#[async_trait]
impl<S: PullStream> PullStream for Resilient<S> {
    type Item = Envelope<S::Item>;

    async fn pull(&mut self) -> PullResult<Envelope<S::Item>> {
        let index = self.index;
        let envelope = match self.upstream.pull().await {
            Ok(Some(item)) => Envelope::success(item, index),
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(index, error = %e, "resilient: item failed, continuing");
                Envelope::failure(e, index)
            }
        };
        self.index += 1;
        Ok(Some(envelope))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

/// Pull `stream` until done, accumulating items in order
///
/// Streams without a known upper bound are rejected with
/// [`StreamError::UnboundedStream`] before the first pull. The first error
/// aborts collection.
pub async fn collect<S: PullStream>(mut stream: S) -> Result<Vec<S::Item>, StreamError> {
    let (lower, upper) = stream.size_hint();
    if upper.is_none() {
        return Err(StreamError::UnboundedStream);
    }

    let mut items = Vec::with_capacity(lower);
    while let Some(item) = stream.pull().await? {
        items.push(item);
    }
    Ok(items)
}
