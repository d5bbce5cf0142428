//! Fan-in of several streams into one
//!
//! Two scheduling policies are available and they are observably different:
//!
//! - [`MergePolicy::Race`] keeps one pull in flight for every live source and
//!   yields whichever resolves first, then immediately re-issues a pull for that
//!   source. Interleaving follows arrival order, so it is a fairness property
//!   rather than a fixed schedule.
//! - [`MergePolicy::RoundRobin`] pulls sources one at a time in index order,
//!   cycling and dropping exhausted sources. The output order is deterministic
//!   and no source waits longer than one full cycle, but a slow source holds
//!   up the others.
//!
//! Both preserve per-source order and end only when every source is done.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt as _};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancellation::wait_cancelled;
use super::{BoxStream, PullStream};
use crate::error::{ErrorMode, PullResult, StreamError};

/// Scheduling policy for [`merge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Yield whichever source produces first
    #[default]
    Race,
    /// Visit sources in a fixed cycle
    RoundRobin,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Race => write!(f, "race"),
            MergePolicy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// Configuration for [`merge`]
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub policy: MergePolicy,
    /// `Propagate` fails the whole merge on a source error, `Resilient` drops that source
    pub error_mode: ErrorMode,
    pub cancellation: Option<CancellationToken>,
}

impl MergeOptions {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// An item tagged with the index of the source that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tagged<T> {
    pub source: usize,
    pub value: T,
}

/// Merge `streams` into one stream of [`Tagged`] items
///
/// Fails immediately with [`StreamError::EmptyMerge`] when `streams` is empty.
pub fn merge<T: Send + 'static>(
    streams: Vec<BoxStream<T>>,
    options: MergeOptions,
) -> Result<Merge<T>, StreamError> {
    if streams.is_empty() {
        return Err(StreamError::EmptyMerge);
    }

    let upper = streams
        .iter()
        .map(|s| s.size_hint().1)
        .try_fold(0usize, |acc, upper| upper.map(|u| acc.saturating_add(u)));

    info!(
        sources = streams.len(),
        policy = %options.policy,
        error_mode = ?options.error_mode,
        "merge: starting fan-in"
    );

    let scheduler = match options.policy {
        MergePolicy::Race => Scheduler::Race(RaceSet::new(streams)),
        MergePolicy::RoundRobin => Scheduler::RoundRobin(RoundRobin::new(streams)),
    };

    Ok(Merge {
        scheduler,
        error_mode: options.error_mode,
        cancel: options.cancellation,
        upper,
        finished: false,
    })
}

/// Fan-in stream returned by [`merge`]
pub struct Merge<T> {
    scheduler: Scheduler<T>,
    error_mode: ErrorMode,
    cancel: Option<CancellationToken>,
    upper: Option<usize>,
    finished: bool,
}

impl<T: Send + 'static> Merge<T> {
    /// Number of sources that have not signalled done yet
    pub fn live_sources(&self) -> usize {
        match &self.scheduler {
            Scheduler::Race(set) => set.live.len(),
            Scheduler::RoundRobin(rr) => rr.sources.len(),
        }
    }

    fn shut_down(&mut self) {
        self.finished = true;
        self.scheduler.clear();
    }
}

#[async_trait]
impl<T: Send + 'static> PullStream for Merge<T> {
    type Item = Tagged<T>;

    async fn pull(&mut self) -> PullResult<Tagged<T>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let step = tokio::select! {
                biased;
                _ = wait_cancelled(self.cancel.as_ref()) => {
                    debug!("merge: cancelled, releasing live sources");
                    self.shut_down();
                    return Ok(None);
                }
                step = self.scheduler.step() => step,
            };

            match step {
                Step::Item { source, value } => {
                    if let Some(upper) = self.upper.as_mut() {
                        *upper = upper.saturating_sub(1);
                    }
                    return Ok(Some(Tagged { source, value }));
                }
                Step::Failed { source, error } => match self.error_mode {
                    ErrorMode::Propagate => {
                        warn!(source, error = %error, "merge: source failed, aborting merge");
                        self.shut_down();
                        return Err(StreamError::Source {
                            index: source,
                            source: Box::new(error),
                        });
                    }
                    ErrorMode::Resilient => {
                        warn!(source, error = %error, "merge: source failed, dropping it");
                        continue;
                    }
                },
                Step::Exhausted => {
                    info!("merge: all sources exhausted");
                    self.finished = true;
                    return Ok(None);
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }
        (0, self.upper)
    }
}

/// Outcome of one scheduler step
enum Step<T> {
    Item { source: usize, value: T },
    Failed { source: usize, error: StreamError },
    Exhausted,
}

enum Scheduler<T> {
    Race(RaceSet<T>),
    RoundRobin(RoundRobin<T>),
}

impl<T: Send + 'static> Scheduler<T> {
    async fn step(&mut self) -> Step<T> {
        match self {
            Scheduler::Race(set) => set.step().await,
            Scheduler::RoundRobin(rr) => rr.step().await,
        }
    }

    fn clear(&mut self) {
        match self {
            Scheduler::Race(set) => set.live = FuturesUnordered::new(),
            Scheduler::RoundRobin(rr) => rr.sources.clear(),
        }
    }
}

/// A pull in flight: owns its source and hands it back with the result
type InFlight<T> = BoxFuture<'static, (usize, BoxStream<T>, PullResult<T>)>;

fn issue_pull<T: Send + 'static>(source: usize, mut stream: BoxStream<T>) -> InFlight<T> {
    async move {
        let result = stream.pull().await;
        (source, stream, result)
    }
    .boxed()
}

/// Live set for the race policy: exactly one in-flight pull per live source
///
/// Sources that finished are simply not re-issued, so they can never come back.
struct RaceSet<T> {
    live: FuturesUnordered<InFlight<T>>,
}

impl<T: Send + 'static> RaceSet<T> {
    fn new(streams: Vec<BoxStream<T>>) -> Self {
        let live = streams
            .into_iter()
            .enumerate()
            .map(|(source, stream)| issue_pull(source, stream))
            .collect();
        Self { live }
    }

    async fn step(&mut self) -> Step<T> {
        // FuturesUnordered::next is cancel-safe: if this step is dropped the
        // in-flight pulls stay in the set.
        while let Some((source, stream, result)) = self.live.next().await {
            match result {
                Ok(Some(value)) => {
                    self.live.push(issue_pull(source, stream));
                    return Step::Item { source, value };
                }
                Ok(None) => {
                    debug!(source, remaining = self.live.len(), "merge: source exhausted");
                }
                Err(error) => return Step::Failed { source, error },
            }
        }
        Step::Exhausted
    }
}

/// Live set for the round-robin policy
struct RoundRobin<T> {
    sources: Vec<(usize, BoxStream<T>)>,
    next: usize,
}

impl<T: Send + 'static> RoundRobin<T> {
    fn new(streams: Vec<BoxStream<T>>) -> Self {
        Self {
            sources: streams.into_iter().enumerate().collect(),
            next: 0,
        }
    }

    async fn step(&mut self) -> Step<T> {
        while !self.sources.is_empty() {
            if self.next >= self.sources.len() {
                self.next = 0;
            }

            // The source stays in place while its pull is in flight, so a
            // dropped step loses nothing.
            let (source, stream) = &mut self.sources[self.next];
            let source = *source;
            match stream.pull().await {
                Ok(Some(value)) => {
                    self.next += 1;
                    return Step::Item { source, value };
                }
                Ok(None) => {
                    self.sources.remove(self.next);
                    debug!(source, remaining = self.sources.len(), "merge: source exhausted");
                }
                Err(error) => {
                    self.sources.remove(self.next);
                    return Step::Failed { source, error };
                }
            }
        }
        Step::Exhausted
    }
}
