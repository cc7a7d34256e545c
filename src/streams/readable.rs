use super::{
    controller::CancelStep, iter::IterOptions, AsyncStreamSource, CountQueuingStrategy,
    IteratorSource, QueuingStrategy, ReadableSource, ReadableStreamDefaultController,
    ReadableStreamDefaultReader, ReadableStreamIter, StreamError, StreamResult,
};
use crate::platform::{BoxedStrategy, MaybeSend, PlatformBoxFutureStatic, SharedPtr};
use futures::{
    channel::{
        mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    future::poll_fn,
    stream::{Stream, StreamExt},
};
use std::{
    future::Future,
    marker::PhantomData,
    sync::atomic::{AtomicBool, Ordering},
    task::Poll,
};

// ----------- Driver Commands -----------
pub(crate) enum DriverCommand {
    Pull,
    Cancel {
        reason: Option<String>,
        completion: Option<oneshot::Sender<StreamResult<()>>>,
    },
}

// ----------- ReadableStream -----------
/// Handle to a pull-driven stream of `T`. The source and its algorithms live
/// in a driver future that the caller spawns on an executor of its choice.
pub struct ReadableStream<T: MaybeSend + 'static> {
    command_tx: UnboundedSender<DriverCommand>,
    locked: SharedPtr<AtomicBool>,
    pub(crate) controller: ReadableStreamDefaultController<T>,
}

impl<T: MaybeSend + 'static> ReadableStream<T> {
    pub(crate) fn new_inner<Source>(
        source: Source,
        strategy: BoxedStrategy<T>,
    ) -> (Self, impl Future<Output = ()>)
    where
        Source: ReadableSource<T>,
    {
        let (command_tx, command_rx) = unbounded();
        let controller = ReadableStreamDefaultController::new(strategy);

        let task_fut = readable_stream_task(command_rx, controller.clone(), source);

        let stream = Self {
            command_tx,
            locked: SharedPtr::new(AtomicBool::new(false)),
            controller,
        };

        (stream, task_fut)
    }

    /// Second handle onto the same stream; used by readers.
    pub(crate) fn share(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            locked: SharedPtr::clone(&self.locked),
            controller: self.controller.clone(),
        }
    }

    pub fn locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn get_reader(&self) -> StreamResult<ReadableStreamDefaultReader<T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StreamError::Locked);
        }
        Ok(ReadableStreamDefaultReader::new(self.share()))
    }

    pub(crate) fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    /// Cancels an unlocked stream. Fails with `Locked` while a reader is
    /// attached; cancel through the reader instead.
    pub async fn cancel(&self, reason: Option<String>) -> StreamResult<()> {
        if self.locked() {
            return Err(StreamError::Locked);
        }
        self.cancel_internal(reason).await
    }

    pub(crate) async fn cancel_internal(&self, reason: Option<String>) -> StreamResult<()> {
        match self.controller.begin_cancel() {
            CancelStep::Settled(result) => result,
            CancelStep::Dispatch => {
                let (tx, rx) = oneshot::channel();
                self.command_tx
                    .unbounded_send(DriverCommand::Cancel {
                        reason,
                        completion: Some(tx),
                    })
                    .map_err(|_| StreamError::TaskDropped)?;
                rx.await.unwrap_or(Err(StreamError::TaskDropped))
            }
        }
    }

    /// Fire-and-forget cancel, usable from `Drop`.
    pub(crate) fn cancel_detached(&self, reason: Option<String>) {
        if let CancelStep::Dispatch = self.controller.begin_cancel() {
            let _ = self.command_tx.unbounded_send(DriverCommand::Cancel {
                reason,
                completion: None,
            });
        }
    }

    pub(crate) fn request_pull(&self) {
        let _ = self.command_tx.unbounded_send(DriverCommand::Pull);
    }

    /// Iterate the stream's chunks. Holds the lock until the iterator ends or
    /// is dropped; dropping it early cancels the stream.
    pub fn values(&self) -> StreamResult<ReadableStreamIter<T>> {
        self.values_with(IterOptions::default())
    }

    pub fn values_with(&self, options: IterOptions) -> StreamResult<ReadableStreamIter<T>> {
        Ok(ReadableStreamIter::new(self.get_reader()?, options))
    }

    /// Drains every remaining chunk. The reader is released afterwards, also
    /// on error.
    pub async fn read_all(&self) -> StreamResult<Vec<T>> {
        let reader = self.get_reader()?;
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.read().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

impl ReadableStream<Vec<u8>> {
    /// Concatenates a binary body.
    pub async fn bytes(&self) -> StreamResult<Vec<u8>> {
        let reader = self.get_reader()?;
        let mut body = Vec::new();
        while let Some(chunk) = reader.read().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    pub async fn text(&self) -> StreamResult<String> {
        let body = self.bytes().await?;
        String::from_utf8(body).map_err(StreamError::other)
    }
}

// ----------- Stream Task Implementation -----------
#[derive(Debug, PartialEq, Eq)]
enum CancelPhase {
    Idle,
    Requested(Option<String>),
    Running,
    Done,
}

/// Runs `start`, then serves pull requests one at a time and runs `cancel` at
/// most once. Exits once every handle is gone, or once the stream is terminal
/// with nothing left in flight.
async fn readable_stream_task<T, Source>(
    mut command_rx: UnboundedReceiver<DriverCommand>,
    controller: ReadableStreamDefaultController<T>,
    mut source: Source,
) where
    T: MaybeSend + 'static,
    Source: ReadableSource<T>,
{
    // Call start() first before processing any commands
    let mut start_controller = controller.clone();
    if let Err(err) = source.start(&mut start_controller).await {
        controller.error_internal(err);
    }

    let mut source = Some(source);
    let mut pull_future: Option<PlatformBoxFutureStatic<(Source, StreamResult<()>)>> = None;
    let mut cancel_future: Option<PlatformBoxFutureStatic<StreamResult<()>>> = None;
    let mut cancel_phase = CancelPhase::Idle;
    let mut cancel_completions: Vec<oneshot::Sender<StreamResult<()>>> = Vec::new();
    let mut pull_requested = false;
    let mut pull_again = false;
    let mut pull_mark = 0u64;
    let mut commands_open = true;

    poll_fn(|cx| loop {
        // Process commands first
        while commands_open {
            match command_rx.poll_next_unpin(cx) {
                Poll::Ready(Some(DriverCommand::Pull)) => {
                    if pull_future.is_some() {
                        pull_again = true;
                    } else {
                        pull_requested = true;
                    }
                }
                Poll::Ready(Some(DriverCommand::Cancel { reason, completion })) => {
                    if let Some(tx) = completion {
                        match controller.cancel_outcome() {
                            Some(result) => {
                                let _ = tx.send(result);
                            }
                            None => cancel_completions.push(tx),
                        }
                    }
                    if cancel_phase == CancelPhase::Idle {
                        cancel_phase = CancelPhase::Requested(reason);
                    }
                }
                Poll::Ready(None) => commands_open = false,
                Poll::Pending => break,
            }
        }

        // Poll pull future if in progress
        if let Some(fut) = pull_future.as_mut() {
            if let Poll::Ready((returned, result)) = fut.as_mut().poll(cx) {
                pull_future = None;
                source = Some(returned);
                match result {
                    Ok(()) => {
                        let progressed = controller.enqueue_count() > pull_mark;
                        if pull_again || progressed {
                            pull_requested = true;
                        }
                    }
                    Err(err) => controller.error_internal(err),
                }
                pull_again = false;
            }
        }

        // Cancel waits for an in-flight pull to hand the source back
        if pull_future.is_none() && matches!(cancel_phase, CancelPhase::Requested(_)) {
            let reason = match std::mem::replace(&mut cancel_phase, CancelPhase::Running) {
                CancelPhase::Requested(reason) => reason,
                _ => None,
            };
            match source.take() {
                Some(mut src) => {
                    tracing::debug!(?reason, "invoking readable source cancel");
                    cancel_future = Some(Box::pin(async move { src.cancel(reason).await }));
                }
                None => {
                    cancel_phase = CancelPhase::Done;
                    controller.settle_cancel(Ok(()));
                }
            }
        }

        // Poll cancel future if in progress
        if let Some(fut) = cancel_future.as_mut() {
            if let Poll::Ready(result) = fut.as_mut().poll(cx) {
                cancel_future = None;
                cancel_phase = CancelPhase::Done;
                controller.settle_cancel(result.clone());
                for tx in cancel_completions.drain(..) {
                    let _ = tx.send(result.clone());
                }
            }
        }

        // Pull data if needed
        if pull_requested && pull_future.is_none() && cancel_phase == CancelPhase::Idle {
            pull_requested = false;
            if controller.needs_pull() {
                if let Some(mut src) = source.take() {
                    tracing::trace!("pulling from readable source");
                    pull_mark = controller.enqueue_count();
                    let mut pull_controller = controller.clone();
                    pull_future = Some(Box::pin(async move {
                        let result = src.pull(&mut pull_controller).await;
                        (src, result)
                    }));
                    continue;
                }
            }
        }

        // a consumer may have closed the stream for cancel without the
        // command having arrived yet
        let idle = pull_future.is_none()
            && cancel_future.is_none()
            && !matches!(cancel_phase, CancelPhase::Requested(_))
            && !controller.cancel_pending();
        let terminal = matches!(
            controller.state(),
            super::StreamState::Closed | super::StreamState::Errored
        );
        if idle && (!commands_open || terminal) {
            tracing::trace!(commands_open, terminal, "readable stream driver exiting");
            return Poll::Ready(());
        }

        return Poll::Pending;
    })
    .await;
}

// ----------- Builder Pattern Implementation -----------
pub struct ReadableStreamBuilder<T, Source>
where
    T: MaybeSend + 'static,
{
    source: Source,
    strategy: BoxedStrategy<T>,
    _phantom: PhantomData<T>,
}

impl<T: MaybeSend + 'static, Source> ReadableStreamBuilder<T, Source>
where
    Source: ReadableSource<T>,
{
    fn new(source: Source) -> Self {
        Self {
            source,
            strategy: Box::new(CountQueuingStrategy::default()),
            _phantom: PhantomData,
        }
    }

    #[cfg(not(feature = "local"))]
    pub fn strategy<S: QueuingStrategy<T> + Send + 'static>(mut self, s: S) -> Self {
        self.strategy = Box::new(s);
        self
    }

    #[cfg(feature = "local")]
    pub fn strategy<S: QueuingStrategy<T> + 'static>(mut self, s: S) -> Self {
        self.strategy = Box::new(s);
        self
    }

    /// Return stream + future without spawning
    pub fn prepare(self) -> (ReadableStream<T>, impl Future<Output = ()>) {
        ReadableStream::new_inner(self.source, self.strategy)
    }

    /// Spawn the driver with the given spawner, e.g. `tokio::task::spawn_local`
    pub fn spawn<F, R>(self, spawn_fn: F) -> ReadableStream<T>
    where
        F: FnOnce(PlatformBoxFutureStatic<()>) -> R,
    {
        let (stream, fut) = self.prepare();
        spawn_fn(Box::pin(fut));
        stream
    }
}

impl<T: MaybeSend + 'static> ReadableStream<T> {
    /// Returns a builder for this readable stream
    pub fn builder<Source>(source: Source) -> ReadableStreamBuilder<T, Source>
    where
        Source: ReadableSource<T>,
    {
        ReadableStreamBuilder::new(source)
    }

    /// Create from Vec - shortcut for ReadableStreamBuilder::from_vec()
    pub fn from_vec(
        vec: Vec<T>,
    ) -> ReadableStreamBuilder<T, IteratorSource<std::vec::IntoIter<T>>> {
        ReadableStreamBuilder::from_vec(vec)
    }

    /// Create from Iterator - shortcut for ReadableStreamBuilder::from_iterator()
    pub fn from_iterator<I>(iter: I) -> ReadableStreamBuilder<T, IteratorSource<I>>
    where
        I: Iterator<Item = T> + MaybeSend + 'static,
    {
        ReadableStreamBuilder::from_iterator(iter)
    }

    /// Create from Stream - shortcut for ReadableStreamBuilder::from_stream()
    pub fn from_stream<S>(stream: S) -> ReadableStreamBuilder<T, AsyncStreamSource<S>>
    where
        S: Stream<Item = T> + Unpin + MaybeSend + 'static,
    {
        ReadableStreamBuilder::from_stream(stream)
    }
}

// Convenience constructors as static methods on the builder
impl<T: MaybeSend + 'static> ReadableStreamBuilder<T, IteratorSource<std::vec::IntoIter<T>>> {
    /// Create a builder from a Vec
    pub fn from_vec(vec: Vec<T>) -> Self {
        Self::new(IteratorSource::new(vec.into_iter()))
    }
}

impl<T: MaybeSend + 'static, I> ReadableStreamBuilder<T, IteratorSource<I>>
where
    I: Iterator<Item = T> + MaybeSend + 'static,
{
    /// Create a builder from an Iterator
    pub fn from_iterator(iter: I) -> Self {
        Self::new(IteratorSource::new(iter))
    }
}

impl<T: MaybeSend + 'static, S> ReadableStreamBuilder<T, AsyncStreamSource<S>>
where
    S: Stream<Item = T> + Unpin + MaybeSend + 'static,
{
    /// Create a builder from a Stream
    pub fn from_stream(stream: S) -> Self {
        Self::new(AsyncStreamSource::new(stream))
    }
}
