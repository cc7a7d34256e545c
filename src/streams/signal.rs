use crate::platform::SharedPtr;
use futures::future::poll_fn;
use parking_lot::Mutex;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    task::{Poll, Waker},
};

// ----------- WakerSet -----------
#[derive(Clone, Default, Debug)]
pub(crate) struct WakerSet(SharedPtr<Mutex<Vec<Waker>>>);

impl WakerSet {
    pub(crate) fn new() -> Self {
        Self(SharedPtr::new(Mutex::new(Vec::new())))
    }

    pub(crate) fn register(&self, waker: &Waker) {
        let mut wakers = self.0.lock();
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }

    pub(crate) fn wake_all(&self) {
        let wakers: Vec<Waker> = self.0.lock().drain(..).collect();
        for waker in wakers {
            waker.wake();
        }
    }
}

// ----------- AsyncSignal -----------
/// Sticky single-waiter wake-up flag. A `signal()` that lands while nobody is
/// waiting is remembered and consumed by the next `wait()`.
#[derive(Clone)]
pub(crate) struct AsyncSignal {
    waker: SharedPtr<Mutex<Option<Waker>>>,
    signaled: SharedPtr<AtomicBool>,
}

impl AsyncSignal {
    pub(crate) fn new() -> Self {
        Self {
            waker: SharedPtr::new(Mutex::new(None)),
            signaled: SharedPtr::new(AtomicBool::new(false)),
        }
    }

    pub(crate) async fn wait(&self) {
        poll_fn(|cx| {
            if self.signaled.swap(false, Ordering::SeqCst) {
                return Poll::Ready(());
            }
            *self.waker.lock() = Some(cx.waker().clone());
            // a signal may have landed between the swap and the store
            if self.signaled.swap(false, Ordering::SeqCst) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    pub(crate) fn signal(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        if let Some(w) = self.waker.lock().take() {
            w.wake();
        }
    }
}
