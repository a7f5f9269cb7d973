//! Promise-based asynchronous computation on plain worker threads.
//!
//! (if you're looking for homogeneous data parallelism with an iterator-like interface, check
//! out [`rayon`] instead; if you need to run very large numbers of I/O tasks concurrently, an
//! `async` runtime will serve you better — this crate pipelines a modest number of
//! computations across OS threads, with no runtime and no `async` code in task bodies)
//!
//! # Overview
//!
//! This library is built from three pieces:
//!
//! - [`contract`], which creates a connected [`Promise`]/[`Future`] pair: the one-shot handoff
//!   of a single value or error between a producer and a consumer.
//! - [`ThreadPool`] and [`AsyncResult`], which run callables on worker threads and let the
//!   results be composed: [`AsyncResult::then`] chains a continuation, [`AsyncResult::catch`]
//!   recovers from errors, [`AsyncResult::flatten`] unwraps nested results, and
//!   [`AsyncResult::in_pool`] moves the rest of a chain onto another pool.
//! - [`TaskGroup`], which aggregates many results into [*all* of them][TaskGroup::all] or
//!   [the *first* one][TaskGroup::first].
//!
//! Errors are never swallowed: a panic in a task body or continuation is captured as a
//! [`TaskError`] and travels down the chain past every remaining `then` step, until a `catch`
//! handler consumes it or the terminal consumer observes it.
//!
//! # Usage
//!
//! A value computed on a pool, piped through continuations:
//!
//! ```
//! use poolparty::{call_async, ThreadPool};
//!
//! let pool = ThreadPool::with_workers(2).unwrap();
//! let result = call_async(&pool, || 3)
//!     .then(|x| x * x)
//!     .then(|x| x + 1)
//!     .then(|x| x.to_string());
//! assert_eq!(result.get().unwrap(), "10");
//! ```
//!
//! A bare contract between two threads:
//!
//! ```
//! use poolparty::contract;
//!
//! let (promise, future) = contract();
//! std::thread::spawn(move || promise.set_value(42));
//! assert_eq!(future.get().unwrap(), 42);
//! ```
//!
//! Fanning work out and collecting every result in join order:
//!
//! ```
//! use poolparty::{call_async, TaskGroup, ThreadPool};
//!
//! let pool = ThreadPool::with_workers(4).unwrap();
//! let mut group = TaskGroup::new();
//! for i in 0..4u32 {
//!     group.join(call_async(&pool, move || i * 10));
//! }
//! assert_eq!(group.all().get().unwrap(), vec![0, 10, 20, 30]);
//! ```
//!
//! [`rayon`]: https://crates.io/crates/rayon

mod error;
mod group;
mod pool;
mod promise;
mod result;
mod std_future;
mod subscription;
mod task;

pub use error::*;
pub use group::*;
pub use pool::*;
pub use promise::*;
pub use result::*;
pub use std_future::StdFuture;
