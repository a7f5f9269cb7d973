//! Sinks that receive the outcome of a contract exactly once.
//!
//! Each concrete subscription implements one continuation primitive: piping a value through a
//! user callable ([`ThenSubscription`]), recovering from a matching error
//! ([`CatchSubscription`]), mirroring an outcome into another promise
//! ([`ForwardSubscription`]), or chaining through a nested result ([`FlattenSubscription`]).
//! The group aggregation sink lives next to the group state it feeds.

use std::{
    any::Any,
    marker::PhantomData,
    panic::{catch_unwind, AssertUnwindSafe},
};

use crate::{
    error::TaskError,
    pool::{PoolHandle, Runnable},
    promise::Promise,
    result::{AsyncResult, ThenPolicy},
    task::BoundAsyncTask,
};

/// Which side's thread is delivering an outcome to a subscription.
///
/// `Producer` means the resolution is happening right now, inside `set_value`/`set_error`;
/// `Consumer` means the subscription was installed after the fact and the installing thread is
/// delivering the stored outcome. The distinction drives [`ThenPolicy::Eager`] scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolvedBy {
    Producer,
    Consumer,
}

/// A sink receiving either a value or an error, tagged with who resolved it.
///
/// The consuming `Box<Self>` receiver makes the exactly-once discipline structural: whoever
/// delivers the outcome gives up the subscription in the same call.
pub(crate) trait Subscription<T: Send + 'static>: Send {
    fn resolve(self: Box<Self>, outcome: Result<T, TaskError>, by: ResolvedBy);
}

/// Runs a user callable on the received value and drives a downstream promise with the result.
///
/// Errors skip the callable and flow straight into the downstream promise.
pub(crate) struct ThenSubscription<R: Send + 'static, F> {
    func: F,
    promise: Promise<R>,
    pool: Option<PoolHandle>,
    policy: ThenPolicy,
}

impl<R: Send + 'static, F> ThenSubscription<R, F> {
    pub(crate) fn new(
        func: F,
        promise: Promise<R>,
        pool: Option<PoolHandle>,
        mut policy: ThenPolicy,
    ) -> Self {
        if pool.is_none() && policy != ThenPolicy::NoSchedule {
            log::warn!("no continuation pool bound, enforcing ThenPolicy::NoSchedule");
            policy = ThenPolicy::NoSchedule;
        }
        Self {
            func,
            promise,
            pool,
            policy,
        }
    }
}

impl<A, R, F> Subscription<A> for ThenSubscription<R, F>
where
    A: Send + 'static,
    R: Send + 'static,
    F: FnOnce(A) -> R + Send + 'static,
{
    fn resolve(self: Box<Self>, outcome: Result<A, TaskError>, by: ResolvedBy) {
        let ThenSubscription {
            func,
            promise,
            pool,
            policy,
        } = *self;
        match outcome {
            Err(err) => promise.set_error(err),
            Ok(value) => {
                let task: Box<dyn Runnable> = Box::new(BoundAsyncTask::new(func, promise, value));
                let inline = match policy {
                    ThenPolicy::NoSchedule => true,
                    ThenPolicy::Eager => by == ResolvedBy::Producer,
                    ThenPolicy::Lazy => false,
                };
                match pool {
                    Some(pool) if !inline => pool.submit(task),
                    _ => task.run(),
                }
            }
        }
    }
}

/// Forwards values unchanged; on an error with payload type `E`, runs the handler to produce a
/// replacement value.
///
/// Errors of any other kind, and panics raised by the handler itself, flow downstream.
pub(crate) struct CatchSubscription<T: Send + 'static, E, H> {
    handler: H,
    promise: Promise<T>,
    _marker: PhantomData<fn(E)>,
}

impl<T: Send + 'static, E, H> CatchSubscription<T, E, H> {
    pub(crate) fn new(handler: H, promise: Promise<T>) -> Self {
        Self {
            handler,
            promise,
            _marker: PhantomData,
        }
    }
}

impl<T, E, H> Subscription<T> for CatchSubscription<T, E, H>
where
    T: Send + 'static,
    E: Any,
    H: FnOnce(&E) -> T + Send + 'static,
{
    fn resolve(self: Box<Self>, outcome: Result<T, TaskError>, _by: ResolvedBy) {
        let CatchSubscription {
            handler, promise, ..
        } = *self;
        match outcome {
            Ok(value) => promise.set_value(value),
            Err(err) => match err.downcast_ref::<E>() {
                Some(matched) => {
                    // The handler is user code as well; capture its panics.
                    match catch_unwind(AssertUnwindSafe(|| handler(matched))) {
                        Ok(replacement) => promise.set_value(replacement),
                        Err(payload) => promise.set_error(TaskError::from_panic(payload)),
                    }
                }
                None => promise.set_error(err),
            },
        }
    }
}

/// Mirrors the received outcome into another promise.
pub(crate) struct ForwardSubscription<T: Send + 'static> {
    promise: Promise<T>,
}

impl<T: Send + 'static> ForwardSubscription<T> {
    pub(crate) fn new(promise: Promise<T>) -> Self {
        Self { promise }
    }
}

impl<T: Send + 'static> Subscription<T> for ForwardSubscription<T> {
    fn resolve(self: Box<Self>, outcome: Result<T, TaskError>, _by: ResolvedBy) {
        match outcome {
            Ok(value) => self.promise.set_value(value),
            Err(err) => self.promise.set_error(err),
        }
    }
}

/// Receives an inner [`AsyncResult`] and chains the downstream promise onto its future, so the
/// outer handle mirrors the inner outcome.
pub(crate) struct FlattenSubscription<R: Send + 'static> {
    promise: Promise<R>,
}

impl<R: Send + 'static> FlattenSubscription<R> {
    pub(crate) fn new(promise: Promise<R>) -> Self {
        Self { promise }
    }
}

impl<R: Send + 'static> Subscription<AsyncResult<R>> for FlattenSubscription<R> {
    fn resolve(self: Box<Self>, outcome: Result<AsyncResult<R>, TaskError>, _by: ResolvedBy) {
        match outcome {
            Ok(inner) => inner
                .future
                .subscribe_boxed(Box::new(ForwardSubscription::new(self.promise))),
            Err(err) => self.promise.set_error(err),
        }
    }
}
