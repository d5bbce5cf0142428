//! Error types for stream pipelines

use serde::{Deserialize, Serialize};

/// Errors surfaced by pulls, terminal operations and stream construction
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A `try_map` transform failed on the item at `index`
    #[error("transform failed on item {index}: {source}")]
    Transform {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// A `try_filter` predicate failed on the item at `index`
    #[error("predicate failed on item {index}: {source}")]
    Predicate {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The producer itself failed
    #[error("producer failed: {0}")]
    Producer(#[source] anyhow::Error),

    /// A merged source failed (propagating mode)
    #[error("merge source {index} failed: {source}")]
    Source {
        index: usize,
        #[source]
        source: Box<StreamError>,
    },

    /// `merge` was called without any sources
    #[error("merge requires at least one source stream")]
    EmptyMerge,

    /// `collect` was called on a stream without a known upper bound
    #[error("collect requires a bounded stream (upper size bound is unknown)")]
    UnboundedStream,

    /// A controllable stream was configured with a chunk size of zero
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    /// The pipeline was cancelled while a terminal operation was running
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Wrap an arbitrary producer failure
    pub fn producer(err: impl Into<anyhow::Error>) -> Self {
        StreamError::Producer(err.into())
    }

    /// Whether this error is a configuration error raised before any pull
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StreamError::EmptyMerge | StreamError::UnboundedStream | StreamError::InvalidChunkSize
        )
    }
}

/// Result of a single pull: an item, done (`Ok(None)`), or an error
pub type PullResult<T> = Result<Option<T>, StreamError>;

/// How a stage reacts to a per-item error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Report the first error, then terminate the stage
    #[default]
    Propagate,
    /// Report the error and keep pulling
    Resilient,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_index() {
        let err = StreamError::Transform {
            index: 3,
            source: anyhow::anyhow!("bad input"),
        };
        assert_eq!(err.to_string(), "transform failed on item 3: bad input");

        let nested = StreamError::Source {
            index: 1,
            source: Box::new(StreamError::producer(anyhow::anyhow!("socket closed"))),
        };
        assert_eq!(
            nested.to_string(),
            "merge source 1 failed: producer failed: socket closed"
        );
    }

    #[test]
    fn test_configuration_errors() {
        assert!(StreamError::EmptyMerge.is_configuration());
        assert!(StreamError::UnboundedStream.is_configuration());
        assert!(StreamError::InvalidChunkSize.is_configuration());
        assert!(!StreamError::Cancelled.is_configuration());
    }

    #[test]
    fn test_error_mode_serde() {
        let mode: ErrorMode = serde_json::from_str("\"resilient\"").unwrap();
        assert_eq!(mode, ErrorMode::Resilient);
        assert_eq!(ErrorMode::default(), ErrorMode::Propagate);
    }
}
