//! Indexed data behind a controllable stream

use std::sync::Arc;

use anyhow::anyhow;

/// Random-access data a controllable stream walks with its cursor
///
/// `read` failing is an internal fault: the stream moves to `error`.
pub trait ChunkSource<T>: Send + Sync {
    fn len(&self) -> usize;

    fn read(&self, index: usize) -> anyhow::Result<T>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> ChunkSource<T> for Vec<T> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn read(&self, index: usize) -> anyhow::Result<T> {
        self.get(index)
            .cloned()
            .ok_or_else(|| anyhow!("index {} out of range (len {})", index, self.as_slice().len()))
    }
}

impl<T: Clone + Send + Sync> ChunkSource<T> for Arc<[T]> {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn read(&self, index: usize) -> anyhow::Result<T> {
        self.get(index)
            .cloned()
            .ok_or_else(|| anyhow!("index {} out of range (len {})", index, <[T]>::len(self)))
    }
}
