//! Pull-based asynchronous streams
//!
//! A [`PullStream`] is a single-consumer, single-pass sequence that may suspend on
//! every pull. Producers live in [`source`], derived streams in [`combinators`],
//! the per-pull deadline in [`timeout`] and fan-in in [`merge`].
//!
//! ## Module Structure
//! - `source`: array, iterator, closure and never-producing producers
//! - `combinators`: map/filter/take/resilient/inspect and the terminal `collect`
//! - `envelope`: success/failure envelopes for resilient pipelines
//! - `timeout`: per-pull deadline guard
//! - `merge`: race and round-robin fan-in
//! - `cancellation`: token wrapper and the `cancel_on` combinator
//! - `interop`: conversion to and from `futures::Stream`

pub mod cancellation;
pub mod combinators;
pub mod envelope;
pub mod interop;
pub mod merge;
pub mod source;
pub mod timeout;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorMode, PullResult, StreamError};

pub use cancellation::{Cancellable, StreamCancellation};
pub use combinators::{collect, Filter, Inspect, Map, Resilient, Take, Then, TryFilter, TryMap};
pub use envelope::Envelope;
pub use interop::{from_stream, into_stream, FromStream};
pub use merge::{merge, Merge, MergeOptions, MergePolicy, Tagged};
pub use source::{from_array, from_fn, from_iter, pending, FromArray, FromFn, FromIter, Pending};
pub use timeout::{Timed, TimeoutEvent, TimeoutGuard};

/// A single-consumer asynchronous sequence
///
/// `pull` takes `&mut self`, so at most one pull is ever outstanding per
/// instance. Dropping an unfinished pull future cancels it and releases
/// whatever timers or upstream pulls it owned.
#[async_trait]
pub trait PullStream: Send {
    type Item: Send;

    /// Request the next item. `Ok(None)` means the stream is exhausted.
    async fn pull(&mut self) -> PullResult<Self::Item>;

    /// Bounds on the number of items left, like `Iterator::size_hint`
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// Owned, type-erased stream
pub type BoxStream<T> = Box<dyn PullStream<Item = T>>;

#[async_trait]
impl<S: PullStream + ?Sized> PullStream for Box<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        (**self).pull().await
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (**self).size_hint()
    }
}

#[async_trait]
impl<S: PullStream + ?Sized> PullStream for &mut S {
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        (**self).pull().await
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (**self).size_hint()
    }
}

/// Combinator methods available on every [`PullStream`]
pub trait StreamExt: PullStream {
    /// Apply a synchronous transform to each item
    fn map<U, F>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> U + Send,
        U: Send,
    {
        Map::new(self, f)
    }

    /// Apply an asynchronous transform to each item
    fn then<F, Fut>(self, f: F) -> Then<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> Fut + Send,
        Fut: Future + Send,
        Fut::Output: Send,
    {
        Then::new(self, f)
    }

    /// Apply a fallible asynchronous transform to each item
    fn try_map<U, F, Fut>(self, f: F, mode: ErrorMode) -> TryMap<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<U>> + Send,
        U: Send,
    {
        TryMap::new(self, f, mode)
    }

    /// Keep only items matching `predicate`
    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) -> bool + Send,
    {
        Filter::new(self, predicate)
    }

    /// Keep only items matching a fallible `predicate`
    fn try_filter<F>(self, predicate: F, mode: ErrorMode) -> TryFilter<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) -> anyhow::Result<bool> + Send,
    {
        TryFilter::new(self, predicate, mode)
    }

    /// Yield at most `limit` items. Upstream is not cancelled when the limit is hit.
    fn take(self, limit: usize) -> Take<Self>
    where
        Self: Sized,
    {
        Take::new(self, limit)
    }

    /// Observe each item without changing it
    fn inspect<F>(self, f: F) -> Inspect<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) + Send,
    {
        Inspect::new(self, f)
    }

    /// Report per-item errors inline as [`Envelope::Failure`] and keep going
    fn resilient(self) -> Resilient<Self>
    where
        Self: Sized,
    {
        Resilient::new(self)
    }

    /// Race every pull against a deadline started when the pull begins
    fn with_timeout(self, timeout: Duration) -> TimeoutGuard<Self>
    where
        Self: Sized,
    {
        TimeoutGuard::new(self, timeout)
    }

    /// End the stream as soon as `token` is cancelled
    fn cancel_on(self, token: CancellationToken) -> Cancellable<Self>
    where
        Self: Sized,
    {
        Cancellable::new(self, token)
    }

    /// Erase the concrete stream type
    fn boxed(self) -> BoxStream<Self::Item>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }

    /// Pull until done, see [`collect`]
    fn collect(self) -> impl Future<Output = Result<Vec<Self::Item>, StreamError>> + Send
    where
        Self: Sized,
    {
        combinators::collect(self)
    }
}

impl<S: PullStream + ?Sized> StreamExt for S {}
