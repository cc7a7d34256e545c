pub mod controller;
pub mod error;
pub mod iter;
pub mod readable;
pub mod reader;
mod signal;
pub mod source;
pub mod tee;

pub use controller::{ReadableStreamDefaultController, StreamState};
pub use error::{ErrorKind, StreamError};
pub use iter::{IterOptions, ReadableStreamIter, ITERATOR_CLOSED};
pub use readable::{ReadableStream, ReadableStreamBuilder};
pub use reader::{ReadFuture, ReadableStreamDefaultReader};
pub use source::{AsyncStreamSource, IteratorSource, ReadableSource};
pub use tee::{TeeBranch, TeeBranchSource, TeeBuilder};

pub type StreamResult<T> = Result<T, StreamError>;

/// Generic queuing strategy trait
pub trait QueuingStrategy<T> {
    /// Return the size of the chunk
    fn size(&self, chunk: &T) -> usize;
    /// Return high water mark (desired max queue size)
    fn high_water_mark(&self) -> usize;
}

/// Count-based strategy. `CountQueuingStrategy::new(1)` is the default for
/// every stream and tee branch.
#[derive(Debug, Clone, Copy)]
pub struct CountQueuingStrategy {
    high_water_mark: usize,
}

impl CountQueuingStrategy {
    pub const fn new(high_water_mark: usize) -> Self {
        Self { high_water_mark }
    }
}

impl Default for CountQueuingStrategy {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<T> QueuingStrategy<T> for CountQueuingStrategy {
    fn size(&self, _chunk: &T) -> usize {
        1
    }

    fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}

/// Byte length strategy for body-like chunk types
#[derive(Debug, Clone, Copy)]
pub struct ByteLengthQueuingStrategy {
    high_water_mark: usize,
}

impl ByteLengthQueuingStrategy {
    pub const fn new(high_water_mark: usize) -> Self {
        Self { high_water_mark }
    }
}

impl QueuingStrategy<Vec<u8>> for ByteLengthQueuingStrategy {
    fn size(&self, chunk: &Vec<u8>) -> usize {
        chunk.len()
    }

    fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}

impl QueuingStrategy<String> for ByteLengthQueuingStrategy {
    fn size(&self, chunk: &String) -> usize {
        chunk.len()
    }

    fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}
