use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::{error::TaskError, pool::Runnable, promise::Promise};

/// Binds a nullary callable to a promise.
///
/// Running the task calls the function and routes its return value, or the payload of any panic
/// it raises, into the promise. Panics never escape `run`.
pub(crate) struct AsyncTask<R: Send + 'static, F> {
    func: F,
    promise: Promise<R>,
}

impl<R: Send + 'static, F> AsyncTask<R, F> {
    pub(crate) fn new(func: F, promise: Promise<R>) -> Self {
        Self { func, promise }
    }
}

impl<R, F> Runnable for AsyncTask<R, F>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    fn run(self: Box<Self>) {
        let AsyncTask { func, promise } = *self;
        match catch_unwind(AssertUnwindSafe(func)) {
            Ok(value) => promise.set_value(value),
            Err(payload) => promise.set_error(TaskError::from_panic(payload)),
        }
    }
}

/// [`AsyncTask`] with an argument that is moved into the callable at run time.
pub(crate) struct BoundAsyncTask<R: Send + 'static, A, F> {
    func: F,
    promise: Promise<R>,
    arg: A,
}

impl<R: Send + 'static, A, F> BoundAsyncTask<R, A, F> {
    pub(crate) fn new(func: F, promise: Promise<R>, arg: A) -> Self {
        Self { func, promise, arg }
    }
}

impl<R, A, F> Runnable for BoundAsyncTask<R, A, F>
where
    R: Send + 'static,
    A: Send + 'static,
    F: FnOnce(A) -> R + Send + 'static,
{
    fn run(self: Box<Self>) {
        let BoundAsyncTask { func, promise, arg } = *self;
        match catch_unwind(AssertUnwindSafe(move || func(arg))) {
            Ok(value) => promise.set_value(value),
            Err(payload) => promise.set_error(TaskError::from_panic(payload)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::resume_unwind;

    use super::*;
    use crate::contract;

    #[test]
    fn task_resolves_promise_with_value() {
        let (promise, future) = contract();
        let task: Box<dyn Runnable> = Box::new(AsyncTask::new(|| 6 * 7, promise));
        task.run();
        assert_eq!(future.get().unwrap(), 42);
    }

    #[test]
    fn task_converts_panic_into_error() {
        let (promise, future) = contract::<i32>();
        let task: Box<dyn Runnable> = Box::new(AsyncTask::new(
            || resume_unwind(Box::new("kaboom")),
            promise,
        ));
        task.run();
        assert_eq!(future.get().unwrap_err().message(), Some("kaboom"));
    }

    #[test]
    fn bound_task_moves_argument_in() {
        let (promise, future) = contract();
        let task: Box<dyn Runnable> = Box::new(BoundAsyncTask::new(
            |input: String| input.len(),
            promise,
            String::from("sixteen candles!"),
        ));
        task.run();
        assert_eq!(future.get().unwrap(), 16);
    }

    #[test]
    fn dropped_task_breaks_its_promise() {
        let (promise, future) = contract::<i32>();
        let task: Box<dyn Runnable> = Box::new(AsyncTask::new(|| 1, promise));
        drop(task);
        assert!(future.get().unwrap_err().is_broken_promise());
    }
}
