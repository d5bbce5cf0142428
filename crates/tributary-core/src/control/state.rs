//! Controllable stream state tracking
//!
//! Lifecycle states, snapshots for `state()` and run configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Default pause between chunks
const DEFAULT_DELAY_MS: u64 = 100;

/// Lifecycle of a controllable stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Ready,
    Running,
    Paused,
    Stopped,
    Completed,
    Error,
}

impl ControlState {
    /// Terminal until `restart`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControlState::Stopped | ControlState::Completed | ControlState::Error
        )
    }

    /// States `stop` applies to
    pub fn is_stoppable(&self) -> bool {
        matches!(
            self,
            ControlState::Ready | ControlState::Running | ControlState::Paused
        )
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlState::Ready => "ready",
            ControlState::Running => "running",
            ControlState::Paused => "paused",
            ControlState::Stopped => "stopped",
            ControlState::Completed => "completed",
            ControlState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Point-in-time view returned by `state()`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub state: ControlState,
    pub cursor: usize,
    pub total: usize,
    pub progress_percent: f64,
}

impl StateSnapshot {
    pub(crate) fn new(state: ControlState, cursor: usize, total: usize) -> Self {
        let progress_percent = if total == 0 {
            100.0
        } else {
            cursor as f64 / total as f64 * 100.0
        };
        Self {
            state,
            cursor,
            total,
            progress_percent,
        }
    }

    /// Progress with one decimal, e.g. `"40.0"`
    pub fn progress_label(&self) -> String {
        format!("{:.1}", self.progress_percent)
    }
}

/// Configuration for a controllable stream run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlOptions {
    /// Items emitted back to back before the inter-chunk delay
    pub chunk_size: usize,
    /// Pause between chunks
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl ControlOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        if self.chunk_size == 0 {
            return Err(StreamError::InvalidChunkSize);
        }
        Ok(())
    }

    /// Whether the item at `cursor` opens a new chunk that must wait for the delay
    pub(crate) fn delay_before(&self, cursor: usize) -> bool {
        !self.delay.is_zero() && cursor > 0 && cursor % self.chunk_size == 0
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
