//! Conversions between [`PullStream`] and `futures::Stream`

use async_trait::async_trait;
use futures::StreamExt as _;

use super::PullStream;
use crate::error::{PullResult, StreamError};

/// Adapt a `futures::Stream` into a [`PullStream`]
pub struct FromStream<S> {
    inner: S,
}

pub fn from_stream<S>(inner: S) -> FromStream<S>
where
    S: futures::Stream + Unpin + Send,
    S::Item: Send,
{
    FromStream { inner }
}

#[async_trait]
impl<S> PullStream for FromStream<S>
where
    S: futures::Stream + Unpin + Send,
    S::Item: Send,
{
    type Item = S::Item;

    async fn pull(&mut self) -> PullResult<S::Item> {
        Ok(self.inner.next().await)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Adapt a [`PullStream`] into a `futures::Stream` of results
///
/// The adapted stream ends after the first error, matching propagating mode.
pub fn into_stream<S: PullStream>(
    stream: S,
) -> impl futures::Stream<Item = Result<S::Item, StreamError>> + Send {
    futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        match stream.pull().await {
            Ok(Some(item)) => Some((Ok(item), Some(stream))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{from_array, StreamExt};
    use futures::StreamExt as _;
    use std::time::Duration;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[tokio::test]
    async fn test_channel_receiver_as_pull_stream() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for i in 0..3 {
            tx.send(i).unwrap();
        }
        drop(tx);

        let mut s = from_stream(UnboundedReceiverStream::new(rx));
        assert_eq!(s.pull().await.unwrap(), Some(0));
        assert_eq!(s.pull().await.unwrap(), Some(1));
        assert_eq!(s.pull().await.unwrap(), Some(2));
        assert_eq!(s.pull().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_into_stream_round_trip_with_futures() {
        let pulled = from_array(vec!["x", "y"], Duration::ZERO).map(str::to_uppercase);
        let items: Vec<_> = into_stream(pulled).collect().await;
        let items: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(items, vec!["X", "Y"]);
    }
}
