//! Envelopes for resilient pipelines

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one upstream pull in resilient mode
///
/// `index` is the position of the pull in the upstream sequence, so failures
/// can be matched back to their input.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope<T> {
    Success {
        data: T,
        index: usize,
        timestamp: DateTime<Utc>,
    },
    Failure {
        error: String,
        index: usize,
        timestamp: DateTime<Utc>,
    },
}

impl<T> Envelope<T> {
    pub fn success(data: T, index: usize) -> Self {
        Envelope::Success {
            data,
            index,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(error: impl ToString, index: usize) -> Self {
        Envelope::Failure {
            error: error.to_string(),
            index,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    pub fn index(&self) -> usize {
        match self {
            Envelope::Success { index, .. } | Envelope::Failure { index, .. } => *index,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Envelope::Success { data, .. } => Some(data),
            Envelope::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Envelope::Success { .. } => None,
            Envelope::Failure { error, .. } => Some(error),
        }
    }

    /// Convert into a plain `Result`, dropping the metadata
    pub fn into_result(self) -> Result<T, String> {
        match self {
            Envelope::Success { data, .. } => Ok(data),
            Envelope::Failure { error, .. } => Err(error),
        }
    }
}
