use std::any::Any;

use crate::{
    contract,
    error::TaskError,
    pool::{PoolHandle, ThreadPool},
    promise::Future,
    std_future::StdFuture,
    subscription::{CatchSubscription, FlattenSubscription, ThenSubscription},
    task::{AsyncTask, BoundAsyncTask},
};

/// How a continuation installed with [`AsyncResult::then_with`] is executed once the upstream
/// value is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThenPolicy {
    /// Always submit the continuation to the bound pool. The default.
    Lazy,
    /// Run the continuation inline on the producer thread if the resolution happens after the
    /// continuation was installed; submit to the pool otherwise.
    Eager,
    /// Always run the continuation inline on whichever thread delivers the value.
    NoSchedule,
}

/// A composable handle to a value that some task will eventually produce.
///
/// An [`AsyncResult`] pairs a [`Future`] with the pool that continuations are scheduled on.
/// It is obtained from [`call_async`], from the instant constructors, or from composing another
/// result. All composing operations consume the handle and return a new one.
pub struct AsyncResult<T: Send + 'static> {
    pub(crate) future: Future<T>,
    pub(crate) pool: Option<PoolHandle>,
}

impl<T: Send + 'static> AsyncResult<T> {
    pub(crate) fn new(future: Future<T>, pool: Option<PoolHandle>) -> Self {
        Self { future, pool }
    }

    /// Creates a ready-made result resolved with `value`.
    ///
    /// The result has no bound pool; continuations installed on it run inline until
    /// [`AsyncResult::in_pool`] is used.
    pub fn instant(value: T) -> Self {
        Self::new(Future::instant(value), None)
    }

    /// Creates a ready-made result resolved with `error`.
    pub fn instant_err(error: TaskError) -> Self {
        Self::new(Future::instant_err(error), None)
    }

    /// Blocks until the result is produced, without consuming the handle.
    pub fn wait(&self) {
        self.future.wait();
    }

    /// Blocks until the result is produced and returns it, consuming the handle.
    pub fn get(self) -> Result<T, TaskError> {
        self.future.get()
    }

    /// Rebinds the pool used to schedule subsequent continuations.
    pub fn in_pool(self, pool: &ThreadPool) -> Self {
        Self::new(self.future, Some(pool.handle()))
    }

    /// Installs a continuation to run on the produced value, with the default
    /// [`ThenPolicy::Lazy`] scheduling.
    ///
    /// If the upstream produces an error, `func` is skipped and the error surfaces in the
    /// returned result.
    pub fn then<R, F>(self, func: F) -> AsyncResult<R>
    where
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.then_with(ThenPolicy::Lazy, func)
    }

    /// Installs a continuation with an explicit scheduling policy.
    ///
    /// With no bound pool the policy degrades to [`ThenPolicy::NoSchedule`] (with a logged
    /// warning).
    pub fn then_with<R, F>(self, policy: ThenPolicy, func: F) -> AsyncResult<R>
    where
        R: Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let (promise, future) = contract();
        let subscription = ThenSubscription::new(func, promise, self.pool.clone(), policy);
        self.future.subscribe_boxed(Box::new(subscription));
        AsyncResult::new(future, self.pool)
    }

    /// Installs an error handler for errors whose payload is of type `E`.
    ///
    /// A matching error is replaced by the handler's return value; values and errors of other
    /// kinds pass through unchanged. A panic raised by the handler replaces the upstream error.
    pub fn catch<E, H>(self, handler: H) -> AsyncResult<T>
    where
        E: Any,
        H: FnOnce(&E) -> T + Send + 'static,
    {
        let (promise, future) = contract();
        self.future
            .subscribe_boxed(Box::new(CatchSubscription::<T, E, H>::new(handler, promise)));
        AsyncResult::new(future, self.pool)
    }

    /// Bridges this result into a standard [`std::future::Future`], consuming the handle.
    ///
    /// The returned future yields `Ok(value)` or `Err(error)` on whatever executor polls it.
    /// `AsyncResult` also implements [`IntoFuture`], so it can be `.await`ed directly.
    pub fn to_std(self) -> StdFuture<T> {
        StdFuture::attach(self.future)
    }
}

impl<T: Send + 'static> AsyncResult<AsyncResult<T>> {
    /// Unwraps a nested result, so the returned handle resolves once the inner task finishes.
    ///
    /// Failures at either level surface in the returned result.
    pub fn flatten(self) -> AsyncResult<T> {
        let (promise, future) = contract();
        self.future
            .subscribe_boxed(Box::new(FlattenSubscription::new(promise)));
        AsyncResult::new(future, self.pool)
    }
}

impl<T: Send + 'static> std::future::IntoFuture for AsyncResult<T> {
    type Output = Result<T, TaskError>;
    type IntoFuture = StdFuture<T>;

    fn into_future(self) -> StdFuture<T> {
        self.to_std()
    }
}

/// Submits `func` to `pool` and returns an [`AsyncResult`] observing its outcome.
///
/// Arguments are closed over by the callable. The returned result is bound to `pool`, so
/// continuations are scheduled there by default.
pub fn call_async<R, F>(pool: &ThreadPool, func: F) -> AsyncResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (promise, future) = contract();
    pool.submit(AsyncTask::new(func, promise));
    AsyncResult::new(future, Some(pool.handle()))
}

/// Wraps `func` into an [`AsyncFunction`] bound to `pool`.
pub fn make_async<F>(pool: &ThreadPool, func: F) -> AsyncFunction<F> {
    AsyncFunction {
        pool: pool.handle(),
        func,
    }
}

/// A callable bound to a pool; every invocation submits one task and yields an [`AsyncResult`].
///
/// Created with [`make_async`]. The callable must be `Clone` because each invocation runs an
/// independent task.
pub struct AsyncFunction<F> {
    pool: PoolHandle,
    func: F,
}

impl<F> AsyncFunction<F> {
    /// Submits one invocation of the wrapped callable with `arg`.
    pub fn call<A, R>(&self, arg: A) -> AsyncResult<R>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(A) -> R + Clone + Send + 'static,
    {
        let (promise, future) = contract();
        self.pool
            .submit(Box::new(BoundAsyncTask::new(self.func.clone(), promise, arg)));
        AsyncResult::new(future, Some(self.pool.clone()))
    }
}
