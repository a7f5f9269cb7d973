//! Bridging of [`AsyncResult`][crate::AsyncResult] into the standard future machinery.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use crate::{
    error::TaskError,
    promise::Future,
    subscription::{ResolvedBy, Subscription},
};

/// A [`std::future::Future`] observing the outcome of an [`AsyncResult`][crate::AsyncResult].
///
/// Created with [`AsyncResult::to_std`][crate::AsyncResult::to_std]. Yields the outcome exactly
/// once; polling after completion pends forever.
pub struct StdFuture<T> {
    shared: Arc<Bridge<T>>,
}

struct Bridge<T> {
    state: Mutex<BridgeState<T>>,
}

struct BridgeState<T> {
    outcome: Option<Result<T, TaskError>>,
    waker: Option<Waker>,
}

impl<T: Send + 'static> StdFuture<T> {
    pub(crate) fn attach(future: Future<T>) -> Self {
        let shared = Arc::new(Bridge {
            state: Mutex::new(BridgeState {
                outcome: None,
                waker: None,
            }),
        });
        future.subscribe_boxed(Box::new(BridgeSubscription {
            shared: shared.clone(),
        }));
        Self { shared }
    }
}

impl<T> std::future::Future for StdFuture<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match state.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

struct BridgeSubscription<T> {
    shared: Arc<Bridge<T>>,
}

impl<T: Send + 'static> Subscription<T> for BridgeSubscription<T> {
    fn resolve(self: Box<Self>, outcome: Result<T, TaskError>, _by: ResolvedBy) {
        let waker = {
            let mut state = self.shared.state.lock();
            state.outcome = Some(outcome);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}
