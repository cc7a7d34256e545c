use super::{ReadableStreamDefaultController, StreamResult};
use crate::platform::MaybeSend;
use futures::stream::{Stream, StreamExt};
use std::future::Future;

// ----------- Source Trait -----------
/// The producer's algorithm set. `start` runs once before any pull; `pull`
/// runs when a read finds the queue empty; `cancel` runs at most once when a
/// consumer abandons the stream.
pub trait ReadableSource<T: MaybeSend + 'static>: MaybeSend + 'static {
    fn start(
        &mut self,
        _controller: &mut ReadableStreamDefaultController<T>,
    ) -> impl Future<Output = StreamResult<()>> + MaybeSend {
        async { Ok(()) }
    }

    fn pull(
        &mut self,
        controller: &mut ReadableStreamDefaultController<T>,
    ) -> impl Future<Output = StreamResult<()>> + MaybeSend;

    fn cancel(
        &mut self,
        _reason: Option<String>,
    ) -> impl Future<Output = StreamResult<()>> + MaybeSend {
        async { Ok(()) }
    }
}

// ----------- Example Source Implementations  -----------
pub struct IteratorSource<I: MaybeSend + 'static> {
    iter: I,
}

impl<I: MaybeSend + 'static> IteratorSource<I> {
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I, T: MaybeSend + 'static> ReadableSource<T> for IteratorSource<I>
where
    I: Iterator<Item = T> + MaybeSend + 'static,
{
    async fn pull(
        &mut self,
        controller: &mut ReadableStreamDefaultController<T>,
    ) -> StreamResult<()> {
        if let Some(item) = self.iter.next() {
            controller.enqueue(item)?;
        } else {
            controller.close()?;
        }
        Ok(())
    }
}

pub struct AsyncStreamSource<S: MaybeSend + 'static> {
    stream: S,
}

impl<S: MaybeSend + 'static> AsyncStreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S, T: MaybeSend + 'static> ReadableSource<T> for AsyncStreamSource<S>
where
    S: Stream<Item = T> + Unpin + MaybeSend + 'static,
{
    async fn pull(
        &mut self,
        controller: &mut ReadableStreamDefaultController<T>,
    ) -> StreamResult<()> {
        if let Some(item) = self.stream.next().await {
            controller.enqueue(item)?;
        } else {
            controller.close()?;
        }
        Ok(())
    }
}
