//! State change observers
//!
//! One observer per stream. Observers run after the state lock is released
//! and a panicking observer is logged, never propagated.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use super::state::ControlState;

/// A single transition record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub previous: ControlState,
    pub state: ControlState,
    /// Cursor at the moment of the transition
    pub cursor: usize,
}

/// Receives every state transition of one controllable stream
///
/// Called synchronously from whichever side made the transition, so
/// implementations should hand off anything slow.
pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

impl<F> StateObserver for F
where
    F: Fn(ControlState, usize) + Send + Sync,
{
    fn on_state_change(&self, change: &StateChange) {
        self(change.state, change.cursor)
    }
}

/// Observer that forwards transitions onto an unbounded channel
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<StateChange>,
}

impl ChannelObserver {
    /// Create the observer and the stream of changes it feeds
    pub fn new() -> (Self, UnboundedReceiverStream<StateChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }
}

impl StateObserver for ChannelObserver {
    fn on_state_change(&self, change: &StateChange) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(*change);
    }
}

/// Invoke `observer`, logging instead of unwinding if it panics
pub(crate) fn dispatch(observer: Option<&dyn StateObserver>, change: &StateChange) {
    debug!(
        from = %change.previous,
        to = %change.state,
        cursor = change.cursor,
        "controllable: state change"
    );
    let Some(observer) = observer else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| observer.on_state_change(change))).is_err() {
        warn!(
            state = %change.state,
            cursor = change.cursor,
            "controllable: observer panicked, continuing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn change(state: ControlState) -> StateChange {
        StateChange {
            previous: ControlState::Ready,
            state,
            cursor: 0,
        }
    }

    #[test]
    fn test_closure_observer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let observer = move |state: ControlState, _cursor: usize| {
            assert_eq!(state, ControlState::Running);
            counter.fetch_add(1, Ordering::SeqCst);
        };
        dispatch(Some(&observer), &change(ControlState::Running));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let observer = |_: ControlState, _: usize| panic!("observer bug");
        dispatch(Some(&observer), &change(ControlState::Paused));
        dispatch(None, &change(ControlState::Paused));
    }

    #[tokio::test]
    async fn test_channel_observer_forwards() {
        let (observer, mut changes) = ChannelObserver::new();
        observer.on_state_change(&change(ControlState::Running));
        observer.on_state_change(&change(ControlState::Completed));
        drop(observer);

        let received: Vec<ControlState> = (&mut changes).map(|c| c.state).collect().await;
        assert_eq!(
            received,
            vec![ControlState::Running, ControlState::Completed]
        );
    }
}
