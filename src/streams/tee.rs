use super::{
    signal::AsyncSignal, CountQueuingStrategy, QueuingStrategy, ReadableSource, ReadableStream,
    ReadableStreamDefaultController, ReadableStreamDefaultReader, StreamResult,
};
use crate::platform::{BoxedStrategy, MaybeSend, PlatformBoxFutureStatic, SharedPtr};
use futures::future::{select, Either};
use parking_lot::Mutex;
use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeeBranch {
    Branch1,
    Branch2,
}

impl TeeBranch {
    fn index(self) -> usize {
        match self {
            TeeBranch::Branch1 => 0,
            TeeBranch::Branch2 => 1,
        }
    }
}

/// State shared between the dispatcher and both branch sources.
struct TeeShared {
    /// Set once a branch is canceled or its driver has dropped the source.
    detached: [AtomicBool; 2],
    cancel_reasons: Mutex<[Option<String>; 2]>,
    /// Raised on branch demand, cancel and detach.
    signal: AsyncSignal,
}

impl TeeShared {
    fn new() -> Self {
        Self {
            detached: [AtomicBool::new(false), AtomicBool::new(false)],
            cancel_reasons: Mutex::new([None, None]),
            signal: AsyncSignal::new(),
        }
    }

    fn is_detached(&self, index: usize) -> bool {
        self.detached[index].load(Ordering::SeqCst)
    }

    fn both_detached(&self) -> bool {
        self.is_detached(0) && self.is_detached(1)
    }

    /// Composite of both branch reasons, `None` when neither gave one.
    fn composite_reason(&self) -> Option<String> {
        let reasons = self.cancel_reasons.lock();
        match (&reasons[0], &reasons[1]) {
            (None, None) => None,
            (Some(r), None) | (None, Some(r)) => Some(r.clone()),
            (Some(r1), Some(r2)) => Some(format!("{r1}; {r2}")),
        }
    }
}

// ----------- Branch Source -----------
/// Source behind each tee branch. Its pull only signals demand: chunks are
/// pushed into the branch controller by the dispatcher.
pub struct TeeBranchSource {
    branch: TeeBranch,
    shared: SharedPtr<TeeShared>,
}

impl<T: MaybeSend + 'static> ReadableSource<T> for TeeBranchSource {
    async fn pull(
        &mut self,
        _controller: &mut ReadableStreamDefaultController<T>,
    ) -> StreamResult<()> {
        self.shared.signal.signal();
        Ok(())
    }

    async fn cancel(&mut self, reason: Option<String>) -> StreamResult<()> {
        let index = self.branch.index();
        self.shared.cancel_reasons.lock()[index] = reason;
        self.shared.detached[index].store(true, Ordering::SeqCst);
        tracing::debug!(branch = ?self.branch, "tee branch canceled");
        self.shared.signal.signal();
        Ok(())
    }
}

// The branch driver drops its source on exit, including when every handle to
// the branch was dropped without a cancel.
impl Drop for TeeBranchSource {
    fn drop(&mut self) {
        let index = self.branch.index();
        if !self.shared.detached[index].swap(true, Ordering::SeqCst) {
            tracing::trace!(branch = ?self.branch, "tee branch dropped");
        }
        self.shared.signal.signal();
    }
}

// ----------- Dispatcher -----------
struct TeeDispatcher<T: MaybeSend + 'static> {
    reader: ReadableStreamDefaultReader<T>,
    branches: [ReadableStreamDefaultController<T>; 2],
    shared: SharedPtr<TeeShared>,
}

impl<T> TeeDispatcher<T>
where
    T: MaybeSend + Clone + 'static,
{
    fn has_demand(&self) -> bool {
        self.branches.iter().any(|branch| branch.has_pending_reads())
    }

    async fn cancel_source(&self) {
        let reason = self.shared.composite_reason();
        tracing::debug!(?reason, "both tee branches detached; canceling source");
        if let Err(err) = self.reader.cancel(reason).await {
            tracing::debug!(error = %err, "tee source cancel failed");
        }
    }

    fn distribute(&self, chunk: T) {
        for (index, branch) in self.branches.iter().enumerate() {
            if !self.shared.is_detached(index) {
                // a branch canceled concurrently refuses the chunk
                let _ = branch.enqueue(chunk.clone());
            }
        }
    }

    /// Reads the source only while some branch is waiting, republishing
    /// every chunk to both branches.
    async fn run(self) {
        loop {
            if self.shared.both_detached() {
                self.cancel_source().await;
                return;
            }
            if !self.has_demand() {
                self.shared.signal.wait().await;
                continue;
            }

            let mut read = self.reader.read();
            let result = loop {
                let wake = Box::pin(self.shared.signal.wait());
                match select(read, wake).await {
                    Either::Left((result, _)) => break result,
                    Either::Right(((), pending)) => {
                        if self.shared.both_detached() {
                            drop(pending);
                            self.cancel_source().await;
                            return;
                        }
                        read = pending;
                    }
                }
            };

            match result {
                Ok(Some(chunk)) => self.distribute(chunk),
                Ok(None) => {
                    tracing::trace!("tee source closed");
                    for branch in &self.branches {
                        let _ = branch.close();
                    }
                    return;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "tee source errored");
                    for branch in &self.branches {
                        let _ = branch.error(err.clone());
                    }
                    return;
                }
            }
        }
    }
}

// ----------- Builder -----------
pub struct TeeBuilder<T>
where
    T: MaybeSend + Clone + 'static,
{
    stream: ReadableStream<T>,
    branch1_strategy: BoxedStrategy<T>,
    branch2_strategy: BoxedStrategy<T>,
}

#[cfg(not(feature = "local"))]
pub trait TeeStrategy<T>: QueuingStrategy<T> + Send + 'static {}
#[cfg(not(feature = "local"))]
impl<T, S: QueuingStrategy<T> + Send + 'static> TeeStrategy<T> for S {}

#[cfg(feature = "local")]
pub trait TeeStrategy<T>: QueuingStrategy<T> + 'static {}
#[cfg(feature = "local")]
impl<T, S: QueuingStrategy<T> + 'static> TeeStrategy<T> for S {}

impl<T> TeeBuilder<T>
where
    T: MaybeSend + Clone + 'static,
{
    fn new(stream: ReadableStream<T>) -> Self {
        Self {
            stream,
            branch1_strategy: Box::new(CountQueuingStrategy::default()),
            branch2_strategy: Box::new(CountQueuingStrategy::default()),
        }
    }

    /// Set queuing strategy for the first branch
    pub fn branch1_strategy<S: TeeStrategy<T>>(mut self, strategy: S) -> Self {
        self.branch1_strategy = Box::new(strategy);
        self
    }

    /// Set queuing strategy for the second branch
    pub fn branch2_strategy<S: TeeStrategy<T>>(mut self, strategy: S) -> Self {
        self.branch2_strategy = Box::new(strategy);
        self
    }

    /// Set the same queuing strategy for both branches
    pub fn strategy<S: TeeStrategy<T> + Clone>(mut self, strategy: S) -> Self {
        self.branch1_strategy = Box::new(strategy.clone());
        self.branch2_strategy = Box::new(strategy);
        self
    }

    /// Prepare without spawning: returns both branches plus the dispatcher
    /// and branch driver futures. Fails with `Locked` if the source stream
    /// already has a reader.
    #[allow(clippy::type_complexity)]
    pub fn prepare(
        self,
    ) -> StreamResult<(
        ReadableStream<T>,
        ReadableStream<T>,
        impl Future<Output = ()>,
        impl Future<Output = ()>,
        impl Future<Output = ()>,
    )> {
        let reader = self.stream.get_reader()?;

        let shared = SharedPtr::new(TeeShared::new());

        let source1 = TeeBranchSource {
            branch: TeeBranch::Branch1,
            shared: SharedPtr::clone(&shared),
        };
        let source2 = TeeBranchSource {
            branch: TeeBranch::Branch2,
            shared: SharedPtr::clone(&shared),
        };

        let (stream1, branch1_fut) = ReadableStream::new_inner(source1, self.branch1_strategy);
        let (stream2, branch2_fut) = ReadableStream::new_inner(source2, self.branch2_strategy);

        let dispatcher = TeeDispatcher {
            reader,
            branches: [stream1.controller.clone(), stream2.controller.clone()],
            shared,
        };

        Ok((stream1, stream2, dispatcher.run(), branch1_fut, branch2_fut))
    }

    /// Spawn the dispatcher and both branch drivers in a single task
    pub fn spawn<F, R>(self, spawn_fn: F) -> StreamResult<(ReadableStream<T>, ReadableStream<T>)>
    where
        F: FnOnce(PlatformBoxFutureStatic<()>) -> R,
    {
        let (stream1, stream2, dispatcher_fut, branch1_fut, branch2_fut) = self.prepare()?;
        spawn_fn(Box::pin(async move {
            futures::join!(dispatcher_fut, branch1_fut, branch2_fut);
        }));
        Ok((stream1, stream2))
    }
}

impl<T> ReadableStream<T>
where
    T: MaybeSend + Clone + 'static,
{
    /// Forks the stream into two branches that each see every chunk.
    /// Finish with [`TeeBuilder::spawn`] or [`TeeBuilder::prepare`].
    pub fn tee(self) -> TeeBuilder<T> {
        TeeBuilder::new(self)
    }
}
