use super::{controller::ReadStep, ReadableStream, StreamError, StreamResult};
use crate::platform::MaybeSend;
use futures::{channel::oneshot, future::poll_fn, FutureExt};
use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    task::{Context, Poll},
};

// ----------- ReadFuture -----------
enum ReadState<T> {
    Ready(Option<StreamResult<Option<T>>>),
    Waiting(oneshot::Receiver<StreamResult<Option<T>>>),
}

/// Result of [`ReadableStreamDefaultReader::read`]. The read is registered
/// when `read()` is called, not when the future is first polled, so
/// concurrent reads resolve in call order. `Ok(None)` means done.
#[must_use = "a read that is never awaited still consumes a chunk"]
pub struct ReadFuture<T>(ReadState<T>);

// Never pin-projects into `T`.
impl<T> Unpin for ReadFuture<T> {}

impl<T> ReadFuture<T> {
    fn ready(result: StreamResult<Option<T>>) -> Self {
        ReadFuture(ReadState::Ready(Some(result)))
    }
}

impl<T> Future for ReadFuture<T> {
    type Output = StreamResult<Option<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            ReadState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(StreamError::ReaderReleased)))
            }
            ReadState::Waiting(rx) => rx
                .poll_unpin(cx)
                .map(|received| received.unwrap_or(Err(StreamError::TaskDropped))),
        }
    }
}

// ----------- Default Reader -----------
/// Exclusive consumer of a [`ReadableStream`]. Obtained from
/// [`ReadableStream::get_reader`]; dropping it releases the lock.
pub struct ReadableStreamDefaultReader<T: MaybeSend + 'static> {
    stream: ReadableStream<T>,
    released: AtomicBool,
}

impl<T: MaybeSend + 'static> ReadableStreamDefaultReader<T> {
    pub(crate) fn new(stream: ReadableStream<T>) -> Self {
        Self {
            stream,
            released: AtomicBool::new(false),
        }
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Takes the front chunk, or waits for the producer. Resolves `Ok(None)`
    /// once the stream is closed and drained, or after a cancel.
    pub fn read(&self) -> ReadFuture<T> {
        if self.is_released() {
            return ReadFuture::ready(Err(StreamError::ReaderReleased));
        }
        match self.stream.controller.read_request() {
            ReadStep::Ready(result) => ReadFuture::ready(result),
            ReadStep::Pending(rx) => {
                self.stream.request_pull();
                ReadFuture(ReadState::Waiting(rx))
            }
        }
    }

    /// Resolves once the stream is closed and drained; fails with the stored
    /// error if it errors, or with `ReaderReleased` once this reader is
    /// released.
    pub async fn closed(&self) -> StreamResult<()> {
        poll_fn(|cx| {
            if self.is_released() {
                return Poll::Ready(Err(StreamError::ReaderReleased));
            }
            self.stream.controller.poll_closed(cx)
        })
        .await
    }

    pub async fn cancel(&self, reason: Option<String>) -> StreamResult<()> {
        if self.is_released() {
            return Err(StreamError::ReaderReleased);
        }
        self.stream.cancel_internal(reason).await
    }

    pub(crate) fn cancel_detached(&self, reason: Option<String>) {
        if !self.is_released() {
            self.stream.cancel_detached(reason);
        }
    }

    /// Detaches the reader and unlocks the stream. Pending reads fail with
    /// `ReaderReleased`. Calling it again does nothing.
    pub fn release_lock(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stream.controller.release_reads();
        self.stream.unlock();
    }
}

impl<T: MaybeSend + 'static> Drop for ReadableStreamDefaultReader<T> {
    fn drop(&mut self) {
        self.release_lock();
    }
}
