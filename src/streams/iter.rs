use super::{ReadFuture, ReadableStreamDefaultReader, StreamResult};
use crate::platform::MaybeSend;
use futures::{stream::Stream, FutureExt};
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// Cancel reason used when an iterator is dropped before the stream ends.
pub const ITERATOR_CLOSED: &str = "iterator closed";

#[derive(Debug, Clone, Copy, Default)]
pub struct IterOptions {
    /// Leave the stream open when the iterator is dropped early.
    pub prevent_cancel: bool,
}

/// Async iterator over a stream's chunks, see [`super::ReadableStream::values`].
///
/// Yields `Ok(chunk)` until the stream is done, or a single `Err` if it
/// errors. Not restartable.
pub struct ReadableStreamIter<T: MaybeSend + 'static> {
    reader: ReadableStreamDefaultReader<T>,
    pending: Option<ReadFuture<T>>,
    finished: bool,
    options: IterOptions,
}

impl<T: MaybeSend + 'static> ReadableStreamIter<T> {
    pub(crate) fn new(reader: ReadableStreamDefaultReader<T>, options: IterOptions) -> Self {
        Self {
            reader,
            pending: None,
            finished: false,
            options,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.pending = None;
        self.reader.release_lock();
    }
}

impl<T: MaybeSend + 'static> Stream for ReadableStreamIter<T> {
    type Item = StreamResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let reader = &this.reader;
        let read = this.pending.get_or_insert_with(|| reader.read());
        let result = match read.poll_unpin(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };
        this.pending = None;

        match result {
            Ok(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Ok(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Err(err) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl<T: MaybeSend + 'static> Drop for ReadableStreamIter<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.options.prevent_cancel {
            tracing::debug!("iterator dropped before the stream ended; canceling");
            self.reader.cancel_detached(Some(ITERATOR_CLOSED.to_string()));
        }
        self.pending = None;
        self.reader.release_lock();
    }
}
