use std::{any::Any, fmt, io};

use thiserror::Error;

/// An error carried through a chain of asynchronous computations.
///
/// A [`TaskError`] is created when a task body or continuation panics (the payload is captured
/// at the task boundary), when user code fails a result explicitly via [`TaskError::new`], or
/// when a [`Promise`][crate::Promise] is dropped without ever being resolved.
///
/// The error is deliberately opaque: the library forwards it downstream without inspecting it.
/// Consumers can match it against a concrete type with [`TaskError::downcast_ref`] (this is what
/// [`AsyncResult::catch`][crate::AsyncResult::catch] does), or extract a panic message with
/// [`TaskError::message`].
pub struct TaskError {
    repr: Repr,
}

enum Repr {
    /// A payload raised by user code; either a captured panic payload or a value passed to
    /// [`TaskError::new`].
    Payload(Box<dyn Any + Send>),
    /// The producing half of a contract went away without resolving it.
    BrokenPromise,
}

impl TaskError {
    /// Creates a [`TaskError`] carrying `error` as its payload.
    pub fn new<E: Any + Send>(error: E) -> Self {
        Self {
            repr: Repr::Payload(Box::new(error)),
        }
    }

    /// Wraps a payload captured by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self {
            repr: Repr::Payload(payload),
        }
    }

    pub(crate) fn broken_promise() -> Self {
        Self {
            repr: Repr::BrokenPromise,
        }
    }

    /// Returns `true` if this error was produced by a [`Promise`][crate::Promise] that was
    /// dropped without being resolved.
    pub fn is_broken_promise(&self) -> bool {
        matches!(self.repr, Repr::BrokenPromise)
    }

    /// Returns `true` if the payload is of type `E`.
    pub fn is<E: Any>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Returns a reference to the payload if it is of type `E`.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        match &self.repr {
            Repr::Payload(payload) => payload.downcast_ref::<E>(),
            Repr::BrokenPromise => None,
        }
    }

    /// Returns the payload message if the payload is a string.
    ///
    /// Panic payloads raised by `panic!` with a literal are `&'static str`, and payloads raised
    /// with a format string are `String`; both are recovered here.
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.downcast_ref::<&'static str>() {
            Some(s)
        } else {
            self.downcast_ref::<String>().map(String::as_str)
        }
    }

    /// Consumes the error, returning the raw payload if there is one.
    pub fn into_payload(self) -> Option<Box<dyn Any + Send>> {
        match self.repr {
            Repr::Payload(payload) => Some(payload),
            Repr::BrokenPromise => None,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Payload(_) => match self.message() {
                Some(msg) => f.write_str(msg),
                None => f.write_str("task failed with a non-string payload"),
            },
            Repr::BrokenPromise => f.write_str("promise was dropped without being resolved"),
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Payload(_) => match self.message() {
                Some(msg) => write!(f, "TaskError({msg:?})"),
                None => f.write_str("TaskError(<non-string payload>)"),
            },
            Repr::BrokenPromise => f.write_str("TaskError(<broken promise>)"),
        }
    }
}

impl std::error::Error for TaskError {}

/// An error returned by the [`ThreadPool`][crate::ThreadPool] lifecycle API.
///
/// Unlike [`TaskError`], which flows through continuation chains, a [`PoolError`] is reported
/// synchronously to the caller that misused the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// [`ThreadPool::start`][crate::ThreadPool::start] was called while workers were already
    /// running.
    #[error("thread pool is already running")]
    AlreadyRunning,
    /// Spawning a worker thread failed.
    #[error("failed to spawn a worker thread: {0}")]
    Spawn(#[from] io::Error),
}
