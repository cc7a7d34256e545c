use futures::StreamExt;
use parking_lot::Mutex;
use pullstream::{
    ReadableSource, ReadableStream, ReadableStreamDefaultController, StreamError, StreamResult,
    StreamState, ITERATOR_CLOSED,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::spawn_local;

type Slot = Arc<Mutex<Option<ReadableStreamDefaultController<u32>>>>;

/// Hands its controller to the test and otherwise stays passive.
struct Handle {
    slot: Slot,
    cancels: Arc<AtomicUsize>,
}

impl ReadableSource<u32> for Handle {
    async fn start(
        &mut self,
        controller: &mut ReadableStreamDefaultController<u32>,
    ) -> StreamResult<()> {
        *self.slot.lock() = Some(controller.clone());
        Ok(())
    }

    async fn pull(
        &mut self,
        _controller: &mut ReadableStreamDefaultController<u32>,
    ) -> StreamResult<()> {
        Ok(())
    }

    async fn cancel(&mut self, _reason: Option<String>) -> StreamResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn handle_stream() -> (
    ReadableStream<u32>,
    ReadableStreamDefaultController<u32>,
    Arc<AtomicUsize>,
) {
    let slot: Slot = Arc::new(Mutex::new(None));
    let cancels = Arc::new(AtomicUsize::new(0));
    let stream = ReadableStream::builder(Handle {
        slot: slot.clone(),
        cancels: cancels.clone(),
    })
    .spawn(spawn_local);
    let controller = loop {
        if let Some(controller) = slot.lock().clone() {
            break controller;
        }
        tokio::task::yield_now().await;
    };
    (stream, controller, cancels)
}

#[tokio_localset_test::localset_test]
async fn enqueued_chunks_drain_in_order_then_stay_done() {
    let (stream, controller, _) = handle_stream().await;
    for v in [7, 8, 9] {
        controller.enqueue(v).unwrap();
    }
    controller.close().unwrap();
    assert_eq!(controller.state(), StreamState::Closing);

    let reader = stream.get_reader().unwrap();
    assert_eq!(reader.read().await.unwrap(), Some(7));
    assert_eq!(reader.read().await.unwrap(), Some(8));
    assert_eq!(reader.read().await.unwrap(), Some(9));
    for _ in 0..3 {
        assert_eq!(reader.read().await.unwrap(), None);
    }
    assert_eq!(controller.state(), StreamState::Closed);
    assert!(controller.close().unwrap_err().is_protocol_violation());
}

#[tokio_localset_test::localset_test]
async fn error_beats_buffered_chunks() {
    let (stream, controller, _) = handle_stream().await;
    let reader = stream.get_reader().unwrap();
    let pending = reader.read();

    controller.error("link down".into()).unwrap();
    assert_eq!(pending.await.unwrap_err().to_string(), "link down");

    assert!(controller.enqueue(1).unwrap_err().is_protocol_violation());
    assert_eq!(reader.read().await.unwrap_err().to_string(), "link down");
    assert_eq!(reader.read().await.unwrap_err().to_string(), "link down");
}

#[tokio_localset_test::localset_test]
async fn error_discards_queued_chunks() {
    let (stream, controller, _) = handle_stream().await;
    controller.enqueue(1).unwrap();
    controller.enqueue(2).unwrap();
    controller.error("corrupt".into()).unwrap();

    let reader = stream.get_reader().unwrap();
    assert_eq!(reader.read().await.unwrap_err().to_string(), "corrupt");
}

#[tokio_localset_test::localset_test]
async fn lock_is_exclusive_until_released() {
    let (stream, _controller, _) = handle_stream().await;
    let reader = stream.get_reader().unwrap();
    assert!(stream.locked());

    let err = stream.get_reader().err().unwrap();
    assert!(matches!(err, StreamError::Locked));
    assert!(err.is_protocol_violation());

    reader.release_lock();
    reader.release_lock();
    assert!(!stream.locked());
    assert!(stream.get_reader().is_ok());
}

#[tokio_localset_test::localset_test]
async fn desired_size_tracks_state() {
    let (_stream, controller, _) = handle_stream().await;
    assert_eq!(controller.desired_size(), Some(1));
    controller.enqueue(1).unwrap();
    assert_eq!(controller.desired_size(), Some(0));
    // advisory only
    controller.enqueue(2).unwrap();
    assert_eq!(controller.desired_size(), Some(0));
    controller.close().unwrap();
    assert_eq!(controller.desired_size(), Some(0));
    controller.error("late".into()).unwrap();
    assert_eq!(controller.desired_size(), None);
}

#[tokio_localset_test::localset_test]
async fn cancel_runs_source_cancel_once() {
    let (stream, _controller, cancels) = handle_stream().await;
    let reader = stream.get_reader().unwrap();
    let (a, b) = futures::join!(reader.cancel(Some("x".into())), reader.cancel(None));
    a.unwrap();
    b.unwrap();
    reader.cancel(None).await.unwrap();
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[tokio_localset_test::localset_test]
async fn tee_branches_drain_independently() {
    let (stream, controller, _) = handle_stream().await;
    for v in [1, 2, 3] {
        controller.enqueue(v).unwrap();
    }
    controller.close().unwrap();

    let (a, b) = stream.tee().spawn(spawn_local).unwrap();
    let reader_a = a.get_reader().unwrap();
    let reader_b = b.get_reader().unwrap();

    // a runs ahead, b interleaves late
    assert_eq!(reader_a.read().await.unwrap(), Some(1));
    assert_eq!(reader_a.read().await.unwrap(), Some(2));
    assert_eq!(reader_b.read().await.unwrap(), Some(1));
    assert_eq!(reader_a.read().await.unwrap(), Some(3));
    assert_eq!(reader_a.read().await.unwrap(), None);
    assert_eq!(reader_b.read().await.unwrap(), Some(2));
    assert_eq!(reader_b.read().await.unwrap(), Some(3));
    assert_eq!(reader_b.read().await.unwrap(), None);
}

#[tokio_localset_test::localset_test]
async fn tee_cancels_source_only_after_both_branches() {
    let (stream, _controller, cancels) = handle_stream().await;
    let (a, b) = stream.tee().spawn(spawn_local).unwrap();

    a.cancel(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cancels.load(Ordering::SeqCst), 0);

    b.cancel(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[tokio_localset_test::localset_test]
async fn abandoned_iteration_cancels_with_iterator_closed() {
    struct Endless {
        reason: Arc<Mutex<Option<String>>>,
    }

    impl ReadableSource<u32> for Endless {
        async fn pull(
            &mut self,
            controller: &mut ReadableStreamDefaultController<u32>,
        ) -> StreamResult<()> {
            controller.enqueue(0)
        }

        async fn cancel(&mut self, reason: Option<String>) -> StreamResult<()> {
            *self.reason.lock() = reason;
            Ok(())
        }
    }

    let reason = Arc::new(Mutex::new(None));
    let stream = ReadableStream::builder(Endless {
        reason: reason.clone(),
    })
    .spawn(spawn_local);

    let taken: Vec<u32> = stream
        .values()
        .unwrap()
        .take(3)
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(taken, vec![0, 0, 0]);
    assert!(!stream.locked());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(reason.lock().as_deref(), Some(ITERATOR_CLOSED));
}
