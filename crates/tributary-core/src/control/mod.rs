//! Controllable streams
//!
//! A [`ControllableStream`] walks a [`ChunkSource`] with a cursor and can be
//! paused, resumed, stopped and restarted from other tasks through a
//! [`StreamController`].
//!
//! ```text
//! ready -> running <-> paused
//!             |           |
//!             +-> completed | stopped | error    (restart -> ready)
//! ```
//!
//! While paused the consumer's pull is parked on a `Notify` that `resume`,
//! `stop` and `restart` signal; `stop` additionally cancels the run's token,
//! which also interrupts the inter-chunk delay.
//!
//! ## Module Structure
//! - `state`: lifecycle states, snapshots and options
//! - `observer`: state change observers
//! - `source`: indexed data sources

mod observer;
mod source;
mod state;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{PullResult, StreamError};
use crate::stream::{PullStream, StreamCancellation};

pub use observer::{ChannelObserver, StateChange, StateObserver};
pub use source::ChunkSource;
pub use state::{ControlOptions, ControlState, StateSnapshot};

/// What a controllable stream yields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Controlled<T> {
    /// An item read at `index`
    Item {
        data: T,
        index: usize,
        timestamp: DateTime<Utc>,
    },
    /// Every item of the run was delivered
    Completed,
    /// The run was stopped before the end
    Stopped,
    /// Reading from the source failed
    Failed { message: String },
}

impl<T> Controlled<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Controlled::Item { .. })
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Controlled::Item { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Mutable run state, guarded by one lock
struct Core {
    state: ControlState,
    cursor: usize,
    /// Bumped by `restart`; pulls that began in an older run report it stopped
    generation: u64,
    /// Whether this run's terminal signal has been handed to the consumer
    terminal_reported: bool,
    run: StreamCancellation,
}

impl Core {
    fn set(&mut self, state: ControlState) -> StateChange {
        let previous = self.state;
        self.state = state;
        StateChange {
            previous,
            state,
            cursor: self.cursor,
        }
    }
}

struct Shared<T> {
    source: Box<dyn ChunkSource<T>>,
    options: ControlOptions,
    core: Mutex<Core>,
    wake: Notify,
    observer: Option<Box<dyn StateObserver>>,
}

impl<T> Shared<T> {
    fn notify(&self, change: &StateChange) {
        observer::dispatch(self.observer.as_deref(), change);
    }

    fn snapshot(&self) -> StateSnapshot {
        let core = self.core.lock();
        StateSnapshot::new(core.state, core.cursor, self.source.len())
    }

    fn pause(&self) -> bool {
        let change = {
            let mut core = self.core.lock();
            if core.state != ControlState::Running {
                debug!(state = %core.state, "controllable: pause ignored");
                return false;
            }
            core.set(ControlState::Paused)
        };
        info!(cursor = change.cursor, "controllable: paused");
        self.wake.notify_waiters();
        self.notify(&change);
        true
    }

    fn resume(&self) -> bool {
        let change = {
            let mut core = self.core.lock();
            if core.state != ControlState::Paused {
                debug!(state = %core.state, "controllable: resume ignored");
                return false;
            }
            core.set(ControlState::Running)
        };
        info!(cursor = change.cursor, "controllable: resumed");
        self.wake.notify_waiters();
        self.notify(&change);
        true
    }

    fn stop(&self) -> bool {
        let change = {
            let mut core = self.core.lock();
            if !core.state.is_stoppable() {
                debug!(state = %core.state, "controllable: stop ignored");
                return false;
            }
            core.terminal_reported = false;
            core.run.cancel();
            core.set(ControlState::Stopped)
        };
        info!(cursor = change.cursor, "controllable: stopped");
        self.wake.notify_waiters();
        self.notify(&change);
        true
    }

    fn restart(&self) {
        self.stop();
        let change = {
            let mut core = self.core.lock();
            core.cursor = 0;
            core.generation += 1;
            core.terminal_reported = false;
            core.run.reset();
            core.set(ControlState::Ready)
        };
        info!("controllable: restarted");
        self.wake.notify_waiters();
        self.notify(&change);
    }
}

/// What the consumer should do next, decided under the lock
enum Next<T> {
    Yield(Controlled<T>),
    Done,
    /// Re-evaluate immediately (a transition just happened)
    Again,
    /// Parked until resume/stop
    Park(CancellationToken),
    /// Wait for the inter-chunk delay
    Sleep(Instant, CancellationToken),
}

/// Cloneable handle for controlling a [`ControllableStream`] from other tasks
pub struct StreamController<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StreamController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> StreamController<T> {
    /// running -> paused. Returns whether the transition applied.
    pub fn pause(&self) -> bool {
        self.shared.pause()
    }

    /// paused -> running
    pub fn resume(&self) -> bool {
        self.shared.resume()
    }

    /// ready/running/paused -> stopped; wakes any parked or sleeping pull
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    /// stop, then -> ready with the cursor back at 0
    pub fn restart(&self) {
        self.shared.restart()
    }

    pub fn state(&self) -> StateSnapshot {
        self.shared.snapshot()
    }
}

/// Consumer side of a controllable stream
pub struct ControllableStream<T> {
    shared: Arc<Shared<T>>,
    /// Deadline of the pending inter-chunk delay, keyed by (generation, cursor)
    delay_until: Option<(u64, usize, Instant)>,
}

impl<T: Send + 'static> ControllableStream<T> {
    /// Create a stream over `data`
    ///
    /// Fails immediately with [`StreamError::InvalidChunkSize`] when
    /// `options.chunk_size` is 0.
    pub fn new(
        data: impl ChunkSource<T> + 'static,
        options: ControlOptions,
        observer: Option<Box<dyn StateObserver>>,
    ) -> Result<Self, StreamError> {
        options.validate()?;
        info!(
            total = data.len(),
            chunk_size = options.chunk_size,
            delay_ms = options.delay.as_millis() as u64,
            "controllable: created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                source: Box::new(data),
                options,
                core: Mutex::new(Core {
                    state: ControlState::Ready,
                    cursor: 0,
                    generation: 0,
                    terminal_reported: false,
                    run: StreamCancellation::new(),
                }),
                wake: Notify::new(),
                observer,
            }),
            delay_until: None,
        })
    }

    pub fn controller(&self) -> StreamController<T> {
        StreamController {
            shared: self.shared.clone(),
        }
    }

    pub fn pause(&self) -> bool {
        self.shared.pause()
    }

    pub fn resume(&self) -> bool {
        self.shared.resume()
    }

    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    pub fn restart(&self) {
        self.shared.restart()
    }

    pub fn state(&self) -> StateSnapshot {
        self.shared.snapshot()
    }

    fn step(&mut self, generation: u64) -> Next<T> {
        let shared = Arc::clone(&self.shared);
        let mut changes = Vec::new();

        let next = {
            let mut core = shared.core.lock();
            if core.generation != generation {
                // A restart happened while this pull was waiting
                return Next::Yield(Controlled::Stopped);
            }

            match core.state {
                ControlState::Ready => {
                    changes.push(core.set(ControlState::Running));
                    Next::Again
                }
                ControlState::Running => {
                    let total = shared.source.len();
                    let cursor = core.cursor;
                    if cursor >= total {
                        core.terminal_reported = true;
                        changes.push(core.set(ControlState::Completed));
                        Next::Yield(Controlled::Completed)
                    } else if let Some(deadline) = self.pending_delay(core.generation, cursor) {
                        Next::Sleep(deadline, core.run.token())
                    } else {
                        match shared.source.read(cursor) {
                            Ok(data) => {
                                core.cursor += 1;
                                Next::Yield(Controlled::Item {
                                    data,
                                    index: cursor,
                                    timestamp: Utc::now(),
                                })
                            }
                            Err(e) => {
                                error!(cursor, error = %e, "controllable: source read failed");
                                core.terminal_reported = true;
                                changes.push(core.set(ControlState::Error));
                                Next::Yield(Controlled::Failed {
                                    message: e.to_string(),
                                })
                            }
                        }
                    }
                }
                ControlState::Paused => Next::Park(core.run.token()),
                ControlState::Stopped | ControlState::Completed | ControlState::Error => {
                    if core.terminal_reported {
                        Next::Done
                    } else {
                        core.terminal_reported = true;
                        Next::Yield(terminal_signal(core.state))
                    }
                }
            }
        };

        for change in &changes {
            shared.notify(change);
        }
        next
    }

    /// Deadline to wait for before reading `cursor`, if the delay has not elapsed yet
    fn pending_delay(&mut self, generation: u64, cursor: usize) -> Option<Instant> {
        if !self.shared.options.delay_before(cursor) {
            return None;
        }
        let deadline = match self.delay_until {
            Some((g, c, deadline)) if g == generation && c == cursor => deadline,
            _ => {
                let deadline = Instant::now() + self.shared.options.delay;
                self.delay_until = Some((generation, cursor, deadline));
                deadline
            }
        };
        (Instant::now() < deadline).then_some(deadline)
    }
}

fn terminal_signal<T>(state: ControlState) -> Controlled<T> {
    match state {
        ControlState::Completed => Controlled::Completed,
        ControlState::Error => Controlled::Failed {
            message: "source failed".to_string(),
        },
        _ => Controlled::Stopped,
    }
}

#[async_trait]
impl<T: Send + 'static> PullStream for ControllableStream<T> {
    type Item = Controlled<T>;

    async fn pull(&mut self) -> PullResult<Controlled<T>> {
        let shared = self.shared.clone();
        let generation = shared.core.lock().generation;

        loop {
            // Register for wake-ups before looking at the state so a
            // resume between the check and the wait is not lost.
            let notified = shared.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.step(generation) {
                Next::Yield(item) => return Ok(Some(item)),
                Next::Done => return Ok(None),
                Next::Again => continue,
                Next::Park(token) => {
                    debug!("controllable: pull parked while paused");
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = token.cancelled() => {}
                    }
                }
                Next::Sleep(deadline, token) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = &mut notified => {}
                        _ = token.cancelled() => {}
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let core = self.shared.core.lock();
        if core.state.is_terminal() && core.terminal_reported {
            return (0, Some(0));
        }
        // Remaining items plus the terminal signal
        let remaining = self.shared.source.len().saturating_sub(core.cursor);
        (0, remaining.checked_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamExt;
    use std::time::Duration;

    fn letters() -> Vec<String> {
        ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect()
    }

    fn stream(options: ControlOptions) -> ControllableStream<String> {
        ControllableStream::new(letters(), options, None).unwrap()
    }

    fn no_delay() -> ControlOptions {
        ControlOptions::default().with_delay(Duration::ZERO)
    }

    async fn next_data(s: &mut ControllableStream<String>) -> String {
        match s.pull().await.unwrap() {
            Some(Controlled::Item { data, .. }) => data,
            other => panic!("expected an item, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected_at_construction() {
        let result = ControllableStream::new(letters(), no_delay().with_chunk_size(0), None);
        assert!(matches!(result, Err(StreamError::InvalidChunkSize)));
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let s = stream(no_delay());
        let controller = s.controller();
        assert_eq!(controller.state().state, ControlState::Ready);

        let out = s.collect().await.unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(out.last(), Some(&Controlled::Completed));
        let data: Vec<String> = out.into_iter().filter_map(Controlled::into_data).collect();
        assert_eq!(data, letters());

        let snap = controller.state();
        assert_eq!(snap.state, ControlState::Completed);
        assert_eq!(snap.cursor, 5);
        assert_eq!(snap.total, 5);
        assert_eq!(snap.progress_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_blocks_until_resume() {
        let mut s = stream(no_delay());
        let controller = s.controller();

        assert_eq!(next_data(&mut s).await, "a");
        assert_eq!(next_data(&mut s).await, "b");
        assert!(controller.pause());
        assert_eq!(controller.state().state, ControlState::Paused);

        // Nothing comes out while paused
        let blocked = tokio::time::timeout(Duration::from_millis(200), s.pull()).await;
        assert!(blocked.is_err());
        assert_eq!(controller.state().cursor, 2);

        let resumer = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            resumer.resume();
        });

        let start = Instant::now();
        assert_eq!(next_data(&mut s).await, "c");
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(controller.state().state, ControlState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_wakes_paused_pull() {
        let mut s = stream(no_delay());
        let controller = s.controller();

        assert_eq!(next_data(&mut s).await, "a");
        controller.pause();

        let stopper = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.stop();
        });

        let start = Instant::now();
        assert_eq!(s.pull().await.unwrap(), Some(Controlled::Stopped));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(s.pull().await.unwrap(), None);
        assert_eq!(s.pull().await.unwrap(), None);
        assert_eq!(controller.state().state, ControlState::Stopped);
        assert_eq!(controller.state().cursor, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_chunk_delay() {
        let mut s = stream(no_delay().with_delay(Duration::from_secs(30)));
        let controller = s.controller();
        assert_eq!(next_data(&mut s).await, "a");

        let stopper = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stopper.stop();
        });

        let start = Instant::now();
        assert_eq!(s.pull().await.unwrap(), Some(Controlled::Stopped));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_paced() {
        let mut s = stream(
            ControlOptions::default()
                .with_chunk_size(2)
                .with_delay(Duration::from_millis(500)),
        );
        let start = Instant::now();
        assert_eq!(next_data(&mut s).await, "a");
        assert_eq!(next_data(&mut s).await, "b");
        assert!(start.elapsed() < Duration::from_millis(1));
        assert_eq!(next_data(&mut s).await, "c");
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(next_data(&mut s).await, "d");
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_restart_replays_from_start() {
        let mut s = stream(no_delay());
        let controller = s.controller();
        assert_eq!(next_data(&mut s).await, "a");
        assert_eq!(next_data(&mut s).await, "b");

        controller.restart();
        let snap = controller.state();
        assert_eq!(snap.state, ControlState::Ready);
        assert_eq!(snap.cursor, 0);

        let out = s.collect().await.unwrap();
        let data: Vec<String> = out.into_iter().filter_map(Controlled::into_data).collect();
        assert_eq!(data, letters());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_wakes_paused_pull() {
        let mut s = stream(no_delay());
        let controller = s.controller();
        assert_eq!(next_data(&mut s).await, "a");
        assert!(controller.pause());

        let restarter = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            restarter.restart();
        });

        let start = Instant::now();
        assert_eq!(s.pull().await.unwrap(), Some(Controlled::Stopped));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(controller.state().state, ControlState::Ready);
        assert_eq!(controller.state().cursor, 0);

        assert_eq!(next_data(&mut s).await, "a");
        assert_eq!(next_data(&mut s).await, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_interrupts_chunk_delay() {
        let mut s = stream(no_delay().with_delay(Duration::from_secs(30)));
        let controller = s.controller();
        assert_eq!(next_data(&mut s).await, "a");

        let restarter = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            restarter.restart();
        });

        let start = Instant::now();
        assert_eq!(s.pull().await.unwrap(), Some(Controlled::Stopped));
        assert_eq!(next_data(&mut s).await, "a");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_restart_after_completion() {
        let mut s = stream(no_delay());
        let controller = s.controller();
        while let Some(item) = s.pull().await.unwrap() {
            if item.is_terminal() {
                assert_eq!(item, Controlled::Completed);
            }
        }
        controller.restart();
        assert_eq!(next_data(&mut s).await, "a");
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_ignored() {
        let mut s = stream(no_delay());
        let controller = s.controller();
        assert!(!controller.pause());
        assert!(!controller.resume());

        assert_eq!(next_data(&mut s).await, "a");
        assert!(!controller.resume());
        assert!(controller.pause());
        assert!(!controller.pause());
        assert!(controller.stop());
        assert!(!controller.stop());
        assert!(!controller.resume());
    }

    #[tokio::test]
    async fn test_observer_sees_every_transition() {
        let (observer, changes) = ChannelObserver::new();
        let mut s =
            ControllableStream::new(letters(), no_delay(), Some(Box::new(observer))).unwrap();
        let controller = s.controller();

        next_data(&mut s).await;
        controller.pause();
        controller.resume();
        next_data(&mut s).await;
        controller.restart();
        drop(controller);
        drop(s);

        use futures::StreamExt as _;
        let seen: Vec<(ControlState, usize)> =
            changes.map(|c| (c.state, c.cursor)).collect().await;
        assert_eq!(
            seen,
            vec![
                (ControlState::Running, 0),
                (ControlState::Paused, 1),
                (ControlState::Running, 1),
                (ControlState::Stopped, 2),
                (ControlState::Ready, 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_break_stream() {
        let observer = |state: ControlState, _cursor: usize| {
            if state == ControlState::Running {
                panic!("observer failure");
            }
        };
        let s = ControllableStream::new(letters(), no_delay(), Some(Box::new(observer))).unwrap();
        let out = s.collect().await.unwrap();
        assert_eq!(out.len(), 6);
    }

    struct EveryIndex;

    impl ChunkSource<usize> for EveryIndex {
        fn len(&self) -> usize {
            usize::MAX
        }

        fn read(&self, index: usize) -> anyhow::Result<usize> {
            Ok(index)
        }
    }

    #[tokio::test]
    async fn test_size_hint_includes_terminal_signal() {
        assert_eq!(stream(no_delay()).size_hint(), (0, Some(6)));

        let huge = ControllableStream::new(EveryIndex, no_delay(), None).unwrap();
        assert_eq!(huge.size_hint(), (0, None));
        assert!(matches!(
            huge.collect().await,
            Err(StreamError::UnboundedStream)
        ));
    }

    struct FlakySource;

    impl ChunkSource<u32> for FlakySource {
        fn len(&self) -> usize {
            4
        }

        fn read(&self, index: usize) -> anyhow::Result<u32> {
            if index == 2 {
                anyhow::bail!("disk read failed at {}", index);
            }
            Ok(index as u32)
        }
    }

    #[tokio::test]
    async fn test_source_fault_moves_to_error() {
        let mut s = ControllableStream::new(FlakySource, no_delay(), None).unwrap();
        let controller = s.controller();

        assert!(matches!(s.pull().await.unwrap(), Some(Controlled::Item { data: 0, .. })));
        assert!(matches!(s.pull().await.unwrap(), Some(Controlled::Item { data: 1, .. })));
        match s.pull().await.unwrap() {
            Some(Controlled::Failed { message }) => assert!(message.contains("disk read failed")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(s.pull().await.unwrap(), None);
        assert_eq!(controller.state().state, ControlState::Error);
        assert!(!controller.stop());
    }
}
