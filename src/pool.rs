//! A fixed-size pool of worker threads draining a FIFO task queue.

use std::{
    collections::VecDeque,
    panic::resume_unwind,
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};

use crate::error::PoolError;

/// A unit of work that can be executed by a [`ThreadPool`] worker.
///
/// Implemented for any `FnOnce()` closure. `run` must not panic; the task wrappers used by
/// [`call_async`][crate::call_async] and the continuation machinery capture panics from user
/// code before they reach the worker loop.
pub trait Runnable: Send {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Runnable for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

pub(crate) type BoxedTask = Box<dyn Runnable>;

struct PoolQueue {
    tasks: VecDeque<BoxedTask>,
    stopped: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    condvar: Condvar,
}

/// A cloneable submission handle onto a pool's queue.
///
/// The handle stays valid across [`ThreadPool::stop`]/[`ThreadPool::start`] cycles; tasks
/// submitted while no workers are running sit in the queue until the next start, or are
/// discarded when the pool is dropped.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    pub(crate) fn submit(&self, task: BoxedTask) {
        let mut queue = self.shared.queue.lock();
        queue.tasks.push_back(task);
        drop(queue);
        self.shared.condvar.notify_one();
    }
}

/// A builder object that can be used to configure and spawn a [`ThreadPool`].
#[derive(Default)]
pub struct PoolBuilder {
    name: Option<String>,
}

impl PoolBuilder {
    /// Sets the base name of the pool's worker threads.
    ///
    /// Each worker thread will be named according to this base name and its index.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Finishes the builder, returning a [`ThreadPool`] with no running workers.
    pub fn build(self) -> ThreadPool {
        ThreadPool {
            shared: Arc::new(PoolShared {
                queue: Mutex::new(PoolQueue {
                    tasks: VecDeque::new(),
                    stopped: false,
                }),
                condvar: Condvar::new(),
            }),
            workers: Vec::new(),
            name: self.name,
        }
    }

    /// Finishes the builder and starts `workers` worker threads.
    pub fn start(self, workers: usize) -> Result<ThreadPool, PoolError> {
        let mut pool = self.build();
        pool.start(workers)?;
        Ok(pool)
    }
}

/// An owned set of worker threads executing submitted tasks in FIFO order.
///
/// The pool starts out empty; [`ThreadPool::start`] spawns the workers and [`ThreadPool::stop`]
/// signals them to exit and joins them. A stopped pool can be started again, and tasks that were
/// still queued at stop time are picked up by the new workers. Dropping the pool stops it and
/// discards the remaining queue, which resolves the promises of any queued wrapper tasks as
/// broken.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    name: Option<String>,
}

impl ThreadPool {
    /// Returns a builder that can be used to configure and spawn a [`ThreadPool`].
    #[inline]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// Creates a pool with no running workers.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a pool and immediately starts `workers` worker threads.
    pub fn with_workers(workers: usize) -> Result<Self, PoolError> {
        Self::builder().start(workers)
    }

    /// Spawns `workers` worker threads draining the task queue.
    ///
    /// Fails with [`PoolError::AlreadyRunning`] if the pool has running workers.
    pub fn start(&mut self, workers: usize) -> Result<(), PoolError> {
        if !self.workers.is_empty() {
            return Err(PoolError::AlreadyRunning);
        }
        log::info!("starting thread pool with {workers} workers");
        for i in 0..workers {
            let mut builder = thread::Builder::new();
            let name = self.name.as_ref().map(|name| format!("{name}-{i}"));
            if let Some(name) = name.clone() {
                builder = builder.name(name);
            }
            let shared = self.shared.clone();
            let handle = builder.spawn(move || {
                let _guard;
                if let Some(name) = name {
                    log::trace!("pool worker '{name}' starting");
                    _guard = defer(move || log::trace!("pool worker '{name}' exiting"));
                }
                worker_loop(&shared);
            })?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Signals all workers to exit and joins them.
    ///
    /// Tasks still in the queue are kept and will be executed if the pool is started again.
    /// If a worker thread has panicked, the panic is propagated to the caller after all
    /// remaining workers have been joined.
    pub fn stop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stopped = true;
            self.shared.condvar.notify_all();
        }

        let mut payload = None;
        for handle in self.workers.drain(..) {
            if let Err(pl) = handle.join() {
                payload = Some(pl);
            }
        }
        // Re-arm the queue so the pool can be started again.
        self.shared.queue.lock().stopped = false;

        if let Some(payload) = payload {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }

    /// Returns `true` while worker threads are running.
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Pushes a task onto the queue and wakes one worker.
    pub fn submit(&self, task: impl Runnable + 'static) {
        self.handle().submit(Box::new(task));
    }

    pub(crate) fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
        self.shared.queue.lock().tasks.clear();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            shared
                .condvar
                .wait_while(&mut queue, |queue| queue.tasks.is_empty() && !queue.stopped);
            if queue.stopped {
                return;
            }
            match queue.tasks.pop_front() {
                Some(task) => task,
                None => continue,
            }
        };
        task.run();
    }
}

/// Drop guard running a closure when it goes out of scope.
struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer(Some(cb))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        thread::ThreadId,
        time::Duration,
    };

    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn runs_submitted_closures() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = ThreadPool::with_workers(2).unwrap();
        for i in 0..16 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap());
        }
        let mut seen: Vec<i32> = (0..16).map(|_| rx.recv().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn double_start_fails() {
        let mut pool = ThreadPool::with_workers(1).unwrap();
        assert!(matches!(pool.start(1), Err(PoolError::AlreadyRunning)));
    }

    #[test]
    fn restart_after_stop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = ThreadPool::with_workers(2).unwrap();

        let c = counter.clone();
        pool.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        pool.stop();
        assert!(!pool.is_running());

        pool.start(2).unwrap();
        let c = counter.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn tasks_queued_while_idle_run_after_start() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut pool = ThreadPool::new();
        pool.submit(move || tx.send(27).unwrap());
        // Nothing runs yet; no workers exist.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        pool.start(1).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 27);
    }

    #[test]
    fn submit_after_stop_does_not_corrupt() {
        let mut pool = ThreadPool::with_workers(1).unwrap();
        pool.stop();
        pool.submit(|| {});
        drop(pool);
    }

    #[test]
    fn worker_threads_are_named() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let pool = ThreadPool::builder().name("crunch").start(1).unwrap();
        pool.submit(move || {
            tx.send(thread::current().name().map(String::from)).unwrap();
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("crunch-0"));
    }

    #[test]
    fn short_tasks_are_spread_over_all_workers() {
        const WORKERS: usize = 4;
        const TASKS: usize = 300;

        let counts: Arc<Mutex<HashMap<ThreadId, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = ThreadPool::with_workers(WORKERS).unwrap();
        for _ in 0..TASKS {
            let counts = counts.clone();
            let tx = tx.clone();
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                *counts.lock().entry(thread::current().id()).or_insert(0) += 1;
                tx.send(()).unwrap();
            });
        }
        for _ in 0..TASKS {
            rx.recv_timeout(Duration::from_secs(30)).unwrap();
        }

        let counts = counts.lock();
        assert_eq!(counts.len(), WORKERS);
        for (_, &count) in counts.iter() {
            assert!(count >= TASKS / (3 * WORKERS), "starved worker: {count} tasks");
        }
    }

    #[test]
    fn pool_is_send() {
        assert_send::<ThreadPool>();
    }
}
