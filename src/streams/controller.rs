use super::{signal::WakerSet, StreamError, StreamResult};
use crate::platform::{BoxedStrategy, MaybeSend, SharedPtr};
use futures::channel::oneshot;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    task::{Context, Poll},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Readable,
    /// Close requested, queue still draining.
    Closing,
    Closed,
    Errored,
}

type ReadRequest<T> = oneshot::Sender<StreamResult<Option<T>>>;

/// Outcome of a read request against the controller.
pub(crate) enum ReadStep<T> {
    Ready(StreamResult<Option<T>>),
    Pending(oneshot::Receiver<StreamResult<Option<T>>>),
}

/// Outcome of a cancel request against the controller.
pub(crate) enum CancelStep {
    Settled(StreamResult<()>),
    /// The driver must run, or is already running, the cancel algorithm.
    Dispatch,
}

// ----------- Inner State -----------
struct ControllerState<T> {
    state: StreamState,
    queue: VecDeque<T>,
    queue_total_size: usize,
    strategy: BoxedStrategy<T>,
    pending_reads: VecDeque<ReadRequest<T>>,
    stored_error: Option<StreamError>,
    cancel_requested: bool,
    cancel_outcome: Option<StreamResult<()>>,
    enqueue_count: u64,
    closed_wakers: WakerSet,
}

impl<T> ControllerState<T> {
    fn get_stored_error(&self) -> StreamError {
        self.stored_error.clone().unwrap_or(StreamError::Errored)
    }

    fn violation(&self) -> StreamError {
        match self.state {
            StreamState::Errored => StreamError::Errored,
            StreamState::Closed => StreamError::Closed,
            _ => StreamError::Closing,
        }
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
        self.queue_total_size = 0;
    }

    fn finish_pending(&mut self) {
        while let Some(tx) = self.pending_reads.pop_front() {
            let _ = tx.send(Ok(None));
        }
    }

    fn reject_pending(&mut self, err: &StreamError) {
        while let Some(tx) = self.pending_reads.pop_front() {
            let _ = tx.send(Err(err.clone()));
        }
    }

    fn enter_errored(&mut self, err: StreamError) {
        self.state = StreamState::Errored;
        self.clear_queue();
        self.reject_pending(&err);
        self.stored_error = Some(err);
        self.closed_wakers.wake_all();
    }
}

// ----------- Controller -----------
/// Producer-side handle of a readable stream. Owns the chunk queue and the
/// stream state; cheap to clone.
pub struct ReadableStreamDefaultController<T> {
    inner: SharedPtr<Mutex<ControllerState<T>>>,
}

impl<T> Clone for ReadableStreamDefaultController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<T: MaybeSend + 'static> ReadableStreamDefaultController<T> {
    pub(crate) fn new(strategy: BoxedStrategy<T>) -> Self {
        Self {
            inner: SharedPtr::new(Mutex::new(ControllerState {
                state: StreamState::Readable,
                queue: VecDeque::new(),
                queue_total_size: 0,
                strategy,
                pending_reads: VecDeque::new(),
                stored_error: None,
                cancel_requested: false,
                cancel_outcome: None,
                enqueue_count: 0,
                closed_wakers: WakerSet::new(),
            })),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_default_strategy() -> Self {
        Self::new(Box::new(super::CountQueuingStrategy::default()))
    }
}

impl<T> ReadableStreamDefaultController<T> {
    /// Advisory backpressure signal: `None` once errored, `Some(0)` once
    /// closing, otherwise the high water mark minus the queued size.
    /// `enqueue` never blocks on it.
    pub fn desired_size(&self) -> Option<usize> {
        let inner = self.inner.lock();
        match inner.state {
            StreamState::Errored => None,
            StreamState::Closing | StreamState::Closed => Some(0),
            StreamState::Readable => Some(
                inner
                    .strategy
                    .high_water_mark()
                    .saturating_sub(inner.queue_total_size),
            ),
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    pub fn enqueue(&self, chunk: T) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != StreamState::Readable {
            return Err(inner.violation());
        }
        inner.enqueue_count += 1;

        let mut chunk = chunk;
        while let Some(tx) = inner.pending_reads.pop_front() {
            match tx.send(Ok(Some(chunk))) {
                // the waiting read was dropped; hand the chunk to the next one
                Err(Ok(Some(returned))) => chunk = returned,
                _ => return Ok(()),
            }
        }

        let size = inner.strategy.size(&chunk);
        inner.queue_total_size += size;
        inner.queue.push_back(chunk);
        Ok(())
    }

    pub fn close(&self) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != StreamState::Readable {
            return Err(inner.violation());
        }
        if inner.queue.is_empty() {
            inner.state = StreamState::Closed;
            inner.finish_pending();
            inner.closed_wakers.wake_all();
        } else {
            inner.state = StreamState::Closing;
        }
        tracing::trace!(state = ?inner.state, "readable stream close requested");
        Ok(())
    }

    /// Errors the stream. Pending and future reads reject with `error`;
    /// chunks still queued are discarded.
    pub fn error(&self, error: StreamError) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            StreamState::Readable | StreamState::Closing => {
                tracing::debug!(%error, "readable stream errored by producer");
                inner.enter_errored(error);
                Ok(())
            }
            _ => Err(inner.violation()),
        }
    }

    /// Error path for failing start/pull algorithms; ignored once terminal.
    pub(crate) fn error_internal(&self, error: StreamError) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, StreamState::Readable | StreamState::Closing) {
            tracing::debug!(%error, "readable source failed");
            inner.enter_errored(error);
        }
    }

    pub(crate) fn read_request(&self) -> ReadStep<T> {
        let mut inner = self.inner.lock();
        match inner.state {
            StreamState::Errored => return ReadStep::Ready(Err(inner.get_stored_error())),
            StreamState::Closed => return ReadStep::Ready(Ok(None)),
            StreamState::Readable | StreamState::Closing => {}
        }

        if let Some(chunk) = inner.queue.pop_front() {
            let size = inner.strategy.size(&chunk);
            inner.queue_total_size = inner.queue_total_size.saturating_sub(size);
            if inner.state == StreamState::Closing && inner.queue.is_empty() {
                inner.state = StreamState::Closed;
                inner.closed_wakers.wake_all();
            }
            return ReadStep::Ready(Ok(Some(chunk)));
        }

        let (tx, rx) = oneshot::channel();
        inner.pending_reads.push_back(tx);
        ReadStep::Pending(rx)
    }

    /// True when a live read is waiting on an empty, readable queue.
    pub(crate) fn needs_pull(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.pending_reads.retain(|tx| !tx.is_canceled());
        inner.state == StreamState::Readable
            && !inner.cancel_requested
            && !inner.pending_reads.is_empty()
    }

    pub(crate) fn has_pending_reads(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.pending_reads.retain(|tx| !tx.is_canceled());
        !inner.pending_reads.is_empty()
    }

    pub(crate) fn enqueue_count(&self) -> u64 {
        self.inner.lock().enqueue_count
    }

    /// Rejects every pending read with `ReaderReleased` and wakes `closed()`
    /// waiters so they can observe the release.
    pub(crate) fn release_reads(&self) {
        let mut inner = self.inner.lock();
        inner.reject_pending(&StreamError::ReaderReleased);
        inner.closed_wakers.wake_all();
    }

    /// Closes the stream on behalf of a consumer. The cancel algorithm itself
    /// is run by the driver at most once.
    pub(crate) fn begin_cancel(&self) -> CancelStep {
        let mut inner = self.inner.lock();
        if let Some(outcome) = &inner.cancel_outcome {
            return CancelStep::Settled(outcome.clone());
        }
        match inner.state {
            StreamState::Errored => CancelStep::Settled(Err(inner.get_stored_error())),
            StreamState::Closed if !inner.cancel_requested => CancelStep::Settled(Ok(())),
            StreamState::Closed => CancelStep::Dispatch,
            StreamState::Readable | StreamState::Closing => {
                inner.cancel_requested = true;
                inner.state = StreamState::Closed;
                inner.clear_queue();
                inner.finish_pending();
                CancelStep::Dispatch
            }
        }
    }

    /// Cancel requested but the cancel algorithm has not settled yet.
    pub(crate) fn cancel_pending(&self) -> bool {
        let inner = self.inner.lock();
        inner.cancel_requested && inner.cancel_outcome.is_none()
    }

    pub(crate) fn cancel_outcome(&self) -> Option<StreamResult<()>> {
        self.inner.lock().cancel_outcome.clone()
    }

    /// Records the cancel algorithm's result. A failing cancel algorithm
    /// moves the stream from closed to errored.
    pub(crate) fn settle_cancel(&self, outcome: StreamResult<()>) {
        let mut inner = self.inner.lock();
        if let Err(err) = &outcome {
            tracing::debug!(error = %err, "readable source cancel failed");
            inner.state = StreamState::Errored;
            inner.stored_error = Some(err.clone());
        }
        inner.cancel_outcome = Some(outcome);
        inner.closed_wakers.wake_all();
    }

    pub(crate) fn poll_closed(&self, cx: &mut Context<'_>) -> Poll<StreamResult<()>> {
        let inner = self.inner.lock();
        match inner.state {
            StreamState::Errored => Poll::Ready(Err(inner.get_stored_error())),
            StreamState::Closed if !inner.cancel_requested || inner.cancel_outcome.is_some() => {
                Poll::Ready(Ok(()))
            }
            _ => {
                inner.closed_wakers.register(cx.waker());
                Poll::Pending
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}
