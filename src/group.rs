//! Aggregation of many async results into a single outcome.
//!
//! A [`TaskGroup`] collects [`AsyncResult`]s as they are joined and produces either *all* of
//! their values (in join order, failing on the first error) or the *first* value to arrive
//! (failing only if every joined result fails).

use std::sync::{
    atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    contract,
    error::TaskError,
    promise::{Future, Promise},
    result::AsyncResult,
    subscription::{ResolvedBy, Subscription},
};

const NO_SLOT: usize = usize::MAX;

const MODE_PENDING: u8 = 0;
const MODE_READY_ALL: u8 = 1;
const MODE_READY_FIRST: u8 = 2;
const MODE_PRODUCED: u8 = 3;

/// Shared aggregation state behind a [`TaskGroup`] and its join subscriptions.
///
/// `pending` starts at 1 for the group handle itself, grows by one per join and shrinks by one
/// per resolved join and once at seal time. The outcome fires inside [`GroupState::detach`]
/// when the counter reaches zero, or early once the relevant short-circuit slot (first error
/// for "all", first value for "first") is set; the `mode` swap guarantees a single producer.
struct GroupState<T: Send + 'static> {
    pending: AtomicI64,
    mode: AtomicU8,
    /// Join-order indices into `slots`; `NO_SLOT` while unset.
    first_value: AtomicUsize,
    first_error: AtomicUsize,
    last_error: AtomicUsize,
    /// One slot per join, in join order.
    slots: Mutex<Vec<Option<Result<T, TaskError>>>>,
    all_promise: Mutex<Option<Promise<Vec<T>>>>,
    first_promise: Mutex<Option<Promise<T>>>,
}

impl<T: Send + 'static> GroupState<T> {
    fn new() -> Self {
        Self {
            pending: AtomicI64::new(1),
            mode: AtomicU8::new(MODE_PENDING),
            first_value: AtomicUsize::new(NO_SLOT),
            first_error: AtomicUsize::new(NO_SLOT),
            last_error: AtomicUsize::new(NO_SLOT),
            slots: Mutex::new(Vec::new()),
            all_promise: Mutex::new(None),
            first_promise: Mutex::new(None),
        }
    }

    /// Reserves a result slot for a new join.
    fn attach(&self) -> usize {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let mut slots = self.slots.lock();
        slots.push(None);
        slots.len() - 1
    }

    fn register_value(&self, slot: usize, value: T) {
        self.slots.lock()[slot] = Some(Ok(value));
        if self.first_value.load(Ordering::Relaxed) == NO_SLOT {
            let _ = self
                .first_value
                .compare_exchange(NO_SLOT, slot, Ordering::AcqRel, Ordering::Relaxed);
        }
    }

    fn register_error(&self, slot: usize, error: TaskError) {
        self.slots.lock()[slot] = Some(Err(error));
        if self.first_error.load(Ordering::Relaxed) == NO_SLOT {
            let _ = self
                .first_error
                .compare_exchange(NO_SLOT, slot, Ordering::AcqRel, Ordering::Relaxed);
        }
        self.last_error.store(slot, Ordering::Release);
    }

    /// Drops one reference and fires the outcome if the group is sealed and complete (or can
    /// short-circuit). The `mode` swap ensures exactly one caller produces.
    fn detach(&self) {
        let pending = self.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        match self.mode.load(Ordering::Acquire) {
            MODE_READY_ALL => {
                if pending == 0 || self.first_error.load(Ordering::Acquire) != NO_SLOT {
                    if self.mode.swap(MODE_PRODUCED, Ordering::AcqRel) != MODE_PRODUCED {
                        self.produce_all();
                    }
                }
            }
            MODE_READY_FIRST => {
                if pending == 0 || self.first_value.load(Ordering::Acquire) != NO_SLOT {
                    if self.mode.swap(MODE_PRODUCED, Ordering::AcqRel) != MODE_PRODUCED {
                        self.produce_first();
                    }
                }
            }
            _ => {}
        }
    }

    fn seal_all(&self) -> Future<Vec<T>> {
        let (promise, future) = contract();
        *self.all_promise.lock() = Some(promise);
        self.mode.store(MODE_READY_ALL, Ordering::Release);
        future
    }

    fn seal_first(&self) -> Future<T> {
        let (promise, future) = contract();
        *self.first_promise.lock() = Some(promise);
        self.mode.store(MODE_READY_FIRST, Ordering::Release);
        future
    }

    fn produce_all(&self) {
        let Some(promise) = self.all_promise.lock().take() else {
            log::error!("task group fired with no pending outcome");
            return;
        };
        let first_error = self.first_error.load(Ordering::Acquire);
        if first_error != NO_SLOT {
            let error = self.slots.lock()[first_error].take();
            match error {
                Some(Err(err)) => promise.set_error(err),
                _ => log::error!("first error slot of a task group is empty"),
            }
            return;
        }
        let values = {
            let mut slots = self.slots.lock();
            let mut values = Vec::with_capacity(slots.len());
            for slot in slots.iter_mut() {
                match slot.take() {
                    Some(Ok(value)) => values.push(value),
                    _ => log::error!("missing result in task group aggregation"),
                }
            }
            values
        };
        promise.set_value(values);
    }

    fn produce_first(&self) {
        let Some(promise) = self.first_promise.lock().take() else {
            log::error!("task group fired with no pending outcome");
            return;
        };
        let first_value = self.first_value.load(Ordering::Acquire);
        if first_value != NO_SLOT {
            let value = self.slots.lock()[first_value].take();
            match value {
                Some(Ok(value)) => promise.set_value(value),
                _ => log::error!("first value slot of a task group is empty"),
            }
            return;
        }
        let last_error = self.last_error.load(Ordering::Acquire);
        if last_error == NO_SLOT {
            // Sealed with no joined results at all; the dropped promise reports the broken
            // contract to the consumer.
            return;
        }
        let error = self.slots.lock()[last_error].take();
        match error {
            Some(Err(err)) => promise.set_error(err),
            _ => log::error!("last error slot of a task group is empty"),
        }
    }
}

/// Writes a joined result's outcome into its slot and releases its group reference.
struct JoinSubscription<T: Send + 'static> {
    state: Arc<GroupState<T>>,
    slot: usize,
}

impl<T: Send + 'static> Subscription<T> for JoinSubscription<T> {
    fn resolve(self: Box<Self>, outcome: Result<T, TaskError>, _by: ResolvedBy) {
        match outcome {
            Ok(value) => self.state.register_value(self.slot, value),
            Err(err) => self.state.register_error(self.slot, err),
        }
        self.state.detach();
    }
}

/// Collects multiple [`AsyncResult`]s and produces an aggregate outcome.
///
/// Join any number of results, then seal the group with [`TaskGroup::all`] or
/// [`TaskGroup::first`]; both consume the group. Results joined after other results have
/// already resolved are fine — the aggregate fires once the group is sealed and complete.
///
/// The returned aggregate has no bound pool; use
/// [`AsyncResult::in_pool`] before installing continuations that should run on a pool.
pub struct TaskGroup<T: Send + 'static> {
    state: Arc<GroupState<T>>,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(GroupState::new()),
        }
    }

    /// Attaches `result` to the group.
    ///
    /// The outcome slot keeps the position of this join, so [`TaskGroup::all`] reports values
    /// in join order regardless of completion order.
    pub fn join(&mut self, result: AsyncResult<T>) {
        let slot = self.state.attach();
        result.future.subscribe_boxed(Box::new(JoinSubscription {
            state: self.state.clone(),
            slot,
        }));
    }

    /// Seals the group and returns the handle to *all* joined values, in join order.
    ///
    /// If any joined result fails, the aggregate fails with the first registered error, without
    /// waiting for the remaining results.
    pub fn all(self) -> AsyncResult<Vec<T>> {
        let future = self.state.seal_all();
        self.state.detach();
        AsyncResult::new(future, None)
    }

    /// Seals the group and returns the handle to the *first* joined value to arrive.
    ///
    /// If every joined result fails, the aggregate fails with the last registered error.
    pub fn first(self) -> AsyncResult<T> {
        let future = self.state.seal_first();
        self.state.detach();
        AsyncResult::new(future, None)
    }
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::resume_unwind,
        sync::atomic::AtomicBool,
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{call_async, ThreadPool};

    #[test]
    fn all_preserves_join_order() {
        let pool = ThreadPool::with_workers(4).unwrap();
        let mut group = TaskGroup::new();
        group.join(call_async(&pool, || {
            thread::sleep(Duration::from_millis(50));
            1
        }));
        group.join(call_async(&pool, || 2));
        group.join(call_async(&pool, || 3));
        group.join(call_async(&pool, || 4));
        assert_eq!(group.all().get().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn all_with_continuation() {
        let pool = ThreadPool::with_workers(2).unwrap();
        let mut group = TaskGroup::new();
        let mut expected = 0;
        for i in 0..100i64 {
            expected += i * i;
            group.join(call_async(&pool, move || i * i));
        }
        let sum = group
            .all()
            .in_pool(&pool)
            .then(|values| values.into_iter().sum::<i64>());
        assert_eq!(sum.get().unwrap(), expected);
    }

    #[test]
    fn all_after_everything_resolved() {
        let pool = ThreadPool::with_workers(2).unwrap();
        let mut group = TaskGroup::new();
        for _ in 0..3 {
            group.join(call_async(&pool, || true));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(group.all().get().unwrap().len(), 3);
    }

    #[test]
    fn all_sealed_before_tasks_finish() {
        let pool = ThreadPool::with_workers(2).unwrap();
        let mut group = TaskGroup::new();
        for _ in 0..3 {
            group.join(call_async(&pool, || {
                thread::sleep(Duration::from_millis(50));
                true
            }));
        }
        let values = group.all().get().unwrap();
        assert_eq!(values, vec![true; 3]);
    }

    #[test]
    fn all_fails_fast_on_first_error() {
        let pool = ThreadPool::with_workers(2).unwrap();
        let mut group = TaskGroup::new();
        group.join(call_async(&pool, || -> i32 {
            resume_unwind(Box::new("boom"))
        }));
        group.join(call_async(&pool, || {
            thread::sleep(Duration::from_millis(300));
            1
        }));
        let start = Instant::now();
        let err = group.all().get().unwrap_err();
        assert_eq!(err.message(), Some("boom"));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn all_reports_the_first_registered_error() {
        let mut group = TaskGroup::new();
        group.join(AsyncResult::<i32>::instant_err(TaskError::new("first")));
        group.join(AsyncResult::<i32>::instant_err(TaskError::new("second")));
        group.join(AsyncResult::instant(1));
        assert_eq!(group.all().get().unwrap_err().message(), Some("first"));
    }

    #[test]
    fn first_wins_without_waiting_for_the_rest() {
        let pool = ThreadPool::with_workers(2).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let mut group = TaskGroup::new();
        let (stop2, done2) = (stop.clone(), done.clone());
        group.join(call_async(&pool, move || {
            while !stop2.load(Ordering::Acquire) {
                thread::yield_now();
            }
            done2.store(true, Ordering::Release);
            7
        }));
        group.join(AsyncResult::instant(42));

        assert_eq!(group.first().get().unwrap(), 42);
        assert!(!done.load(Ordering::Acquire));
        stop.store(true, Ordering::Release);
    }

    #[test]
    fn first_prefers_a_value_over_an_earlier_error() {
        let mut group = TaskGroup::new();
        group.join(AsyncResult::<i32>::instant_err(TaskError::new("early")));
        group.join(AsyncResult::instant(5));
        assert_eq!(group.first().get().unwrap(), 5);
    }

    #[test]
    fn first_all_fail_yields_last_error() {
        let mut group = TaskGroup::new();
        group.join(AsyncResult::<i32>::instant_err(TaskError::new("e1")));
        group.join(AsyncResult::<i32>::instant_err(TaskError::new("e2")));
        group.join(AsyncResult::<i32>::instant_err(TaskError::new("e3")));
        assert_eq!(group.first().get().unwrap_err().message(), Some("e3"));
    }

    #[test]
    fn empty_group_all_resolves_to_nothing() {
        let group = TaskGroup::<i32>::new();
        assert_eq!(group.all().get().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn empty_group_first_reports_a_broken_contract() {
        let group = TaskGroup::<i32>::new();
        assert!(group.first().get().unwrap_err().is_broken_promise());
    }

    #[test]
    fn unit_payloads_aggregate() {
        let pool = ThreadPool::with_workers(1).unwrap();
        let mut group = TaskGroup::new();
        group.join(AsyncResult::instant(()));
        group.join(call_async(&pool, || ()));
        assert_eq!(group.all().get().unwrap(), vec![(), ()]);
    }

    #[test]
    fn parallel_sum_over_batches() {
        const BATCHES: usize = 8;

        let data: Arc<Vec<i64>> = Arc::new((0..100_000).map(|i| (i % 7) - 3).collect());
        let expected: i64 = data.iter().sum();

        let pool = ThreadPool::with_workers(4).unwrap();
        let batch_size = data.len() / BATCHES + 1;
        let mut group = TaskGroup::new();
        for batch in 0..BATCHES {
            let data = data.clone();
            group.join(call_async(&pool, move || {
                let begin = batch * batch_size;
                let end = (begin + batch_size).min(data.len());
                data[begin..end].iter().sum::<i64>()
            }));
        }
        let total = group
            .all()
            .in_pool(&pool)
            .then(|sums| sums.into_iter().sum::<i64>());
        assert_eq!(total.get().unwrap(), expected);
    }

    #[test]
    fn producer_consumer_across_two_pools() {
        const MIN: i64 = 0;
        const MAX: i64 = 6;
        const OPS: usize = 25_000;

        let producers = ThreadPool::with_workers(6).unwrap();
        let consumers = ThreadPool::with_workers(6).unwrap();
        let level = Arc::new(AtomicI64::new(0));

        let mut group = TaskGroup::new();
        for _ in 0..OPS {
            let level_p = level.clone();
            group.join(call_async(&producers, move || loop {
                let current = level_p.load(Ordering::Acquire);
                if current < MAX {
                    if level_p
                        .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return current + 1;
                    }
                } else {
                    thread::yield_now();
                }
            }));
            let level_c = level.clone();
            group.join(call_async(&consumers, move || loop {
                let current = level_c.load(Ordering::Acquire);
                if current > MIN {
                    if level_c
                        .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return current;
                    }
                } else {
                    thread::yield_now();
                }
            }));
        }

        let history = group.all().get().unwrap();
        assert_eq!(history.len(), 2 * OPS);

        let mut seen = [0usize; (MAX + 1) as usize];
        for value in history {
            assert!(
                (MIN + 1..=MAX).contains(&value),
                "observed out-of-range level {value}"
            );
            seen[value as usize] += 1;
        }
        for level_value in 1..=MAX {
            assert!(seen[level_value as usize] > 0, "level {level_value} never observed");
        }
        assert_eq!(level.load(Ordering::SeqCst), 0);
    }
}
