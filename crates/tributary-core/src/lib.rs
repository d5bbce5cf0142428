//! Tributary core: pull-based asynchronous stream combinators
//!
//! Producers, transforms, a per-pull timeout guard, fan-in merging and
//! a pausable, stoppable, restartable stream over indexed data.
//!
//! ```no_run
//! use std::time::Duration;
//! use tributary_core::stream::{from_array, StreamExt};
//!
//! # async fn demo() -> Result<(), tributary_core::StreamError> {
//! let doubled_evens = from_array(vec![1, 2, 3, 4, 5, 6], Duration::from_millis(10))
//!     .filter(|n| n % 2 == 0)
//!     .map(|n| n * 2)
//!     .take(2)
//!     .collect()
//!     .await?;
//! assert_eq!(doubled_evens, vec![4, 8]);
//! # Ok(())
//! # }
//! ```

pub mod control;
pub mod error;
pub mod stream;

pub use control::{
    ControlOptions, ControlState, Controlled, ControllableStream, StateSnapshot, StreamController,
};
pub use error::{ErrorMode, PullResult, StreamError};
pub use stream::{BoxStream, PullStream, StreamExt};
