use std::{mem, sync::Arc};

use parking_lot::{Condvar, Mutex};

use crate::{
    error::TaskError,
    subscription::{ResolvedBy, Subscription},
};

/// Creates a connected pair of [`Promise`] and [`Future`].
///
/// The producing side resolves the contract exactly once with [`Promise::set_value`] or
/// [`Promise::set_error`]; the consuming side retrieves the outcome with [`Future::get`] or
/// has it delivered through a subscription installed with [`Future::subscribe`].
pub fn contract<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let shared = Arc::new(Shared::new());
    (
        Promise {
            shared: shared.clone(),
            resolved: false,
        },
        Future { shared },
    )
}

enum State<T: Send + 'static> {
    /// Neither side has acted yet.
    Empty,
    /// A subscription was installed before the resolution; the producer will invoke it.
    Subscribed(Box<dyn Subscription<T>>),
    /// The resolution happened with no subscription pending; a waiter can pick it up.
    Produced(Result<T, TaskError>),
    /// The outcome has been handed out.
    Consumed,
}

pub(crate) struct Shared<T: Send + 'static> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T: Send + 'static> Shared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Empty),
            condvar: Condvar::new(),
        }
    }

    fn pre_resolved(outcome: Result<T, TaskError>) -> Self {
        Self {
            state: Mutex::new(State::Produced(outcome)),
            condvar: Condvar::new(),
        }
    }

    /// Producer path: stores the outcome, or hands it to a pending subscription.
    ///
    /// The subscription is invoked *after* the state lock is released, so a continuation may
    /// freely use other contracts and pools from inside the callback.
    pub(crate) fn resolve(&self, outcome: Result<T, TaskError>) {
        let mut state = self.state.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Empty => {
                *state = State::Produced(outcome);
                drop(state);
                // There can be no more than one waiter.
                self.condvar.notify_one();
            }
            State::Subscribed(subscription) => {
                drop(state);
                subscription.resolve(outcome, ResolvedBy::Producer);
            }
            State::Produced(_) | State::Consumed => unreachable!("contract resolved twice"),
        }
    }

    fn wait(&self) {
        let mut state = self.state.lock();
        self.condvar
            .wait_while(&mut state, |state| matches!(state, State::Empty));
    }

    fn take(&self) -> Result<T, TaskError> {
        let mut state = self.state.lock();
        self.condvar
            .wait_while(&mut state, |state| matches!(state, State::Empty));
        match mem::replace(&mut *state, State::Consumed) {
            State::Produced(outcome) => outcome,
            _ => unreachable!("resolved state taken twice"),
        }
    }

    fn subscribe(&self, subscription: Box<dyn Subscription<T>>) {
        let mut state = self.state.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Empty => *state = State::Subscribed(subscription),
            State::Produced(outcome) => {
                drop(state);
                subscription.resolve(outcome, ResolvedBy::Consumer);
            }
            _ => unreachable!("resolved state subscribed twice"),
        }
    }
}

impl<T: Send + 'static> Drop for Shared<T> {
    fn drop(&mut self) {
        if let State::Produced(Err(err)) = &*self.state.get_mut() {
            log::error!("unhandled task error discarded: {err}");
        }
    }
}

/// The producing half of a contract created by [`contract`].
///
/// Resolving a [`Promise`] consumes it, so a contract can be resolved at most once. Dropping an
/// unresolved [`Promise`] delivers a broken-promise [`TaskError`] to the consumer instead, which
/// typically means the producing thread has panicked or deliberately abandoned the work.
pub struct Promise<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    resolved: bool,
}

impl<T: Send + 'static> Promise<T> {
    /// Resolves the contract with a value, consuming the promise.
    ///
    /// If a thread is blocked in [`Future::get`] or [`Future::wait`] it is woken up; if a
    /// subscription is installed it is invoked on the calling thread.
    pub fn set_value(mut self, value: T) {
        self.resolved = true;
        self.shared.resolve(Ok(value));
    }

    /// Resolves the contract with an error, consuming the promise.
    pub fn set_error(mut self, error: TaskError) {
        self.resolved = true;
        self.shared.resolve(Err(error));
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.shared.resolve(Err(TaskError::broken_promise()));
        }
    }
}

/// The consuming half of a contract created by [`contract`].
pub struct Future<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Future<T> {
    /// Creates a future that is already resolved with `value` and has no paired [`Promise`].
    pub fn instant(value: T) -> Self {
        Self {
            shared: Arc::new(Shared::pre_resolved(Ok(value))),
        }
    }

    /// Creates a future that is already resolved with `error` and has no paired [`Promise`].
    pub fn instant_err(error: TaskError) -> Self {
        Self {
            shared: Arc::new(Shared::pre_resolved(Err(error))),
        }
    }

    /// Blocks the calling thread until the contract is resolved.
    ///
    /// Does not consume the future; the outcome can still be retrieved afterwards.
    pub fn wait(&self) {
        self.shared.wait();
    }

    /// Blocks the calling thread until the contract is resolved and returns the outcome,
    /// consuming the future.
    pub fn get(self) -> Result<T, TaskError> {
        self.shared.take()
    }

    /// Subscribes to the outcome, consuming the future. Errors are logged and discarded.
    ///
    /// If the contract is already resolved, `on_value` runs immediately on the calling thread;
    /// otherwise it runs on the producer thread, inside [`Promise::set_value`].
    pub fn subscribe<V>(self, on_value: V)
    where
        V: FnOnce(T) + Send + 'static,
    {
        self.subscribe_with(on_value, |err: TaskError| {
            log::error!("unhandled subscription error: {err}");
        });
    }

    /// Subscribes to the outcome with separate value and error callbacks, consuming the future.
    ///
    /// Exactly one of the two callbacks is invoked, exactly once.
    pub fn subscribe_with<V, E>(self, on_value: V, on_error: E)
    where
        V: FnOnce(T) + Send + 'static,
        E: FnOnce(TaskError) + Send + 'static,
    {
        self.subscribe_boxed(Box::new(ClosureSubscription { on_value, on_error }));
    }

    pub(crate) fn subscribe_boxed(self, subscription: Box<dyn Subscription<T>>) {
        self.shared.subscribe(subscription);
    }
}

struct ClosureSubscription<V, E> {
    on_value: V,
    on_error: E,
}

impl<T, V, E> Subscription<T> for ClosureSubscription<V, E>
where
    T: Send + 'static,
    V: FnOnce(T) + Send + 'static,
    E: FnOnce(TaskError) + Send + 'static,
{
    fn resolve(self: Box<Self>, outcome: Result<T, TaskError>, _by: ResolvedBy) {
        match outcome {
            Ok(value) => (self.on_value)(value),
            Err(err) => (self.on_error)(err),
        }
    }
}
