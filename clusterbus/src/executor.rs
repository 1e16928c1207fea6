//! Delivery executors.
//!
//! The bus never creates threads itself. Every delivery is boxed into a
//! [`Task`] and handed to the configured [`Executor`]:
//!
//! - [`InlineExecutor`] runs tasks on the calling thread, so `fire` returns
//!   after every callback has completed.
//! - [`WorkerPool`] feeds a fixed set of named threads through a bounded
//!   queue. A full queue blocks `submit`, which is where producers feel
//!   backpressure. A pool with one worker preserves submission order, with
//!   the exception noted on [`WorkerPool::sequential`].
//! - `TokioExecutor` (feature `async`) runs tasks on a tokio runtime's
//!   blocking pool.
//!
//! [`ExecutorConfig`] selects one of these from configuration.

use crate::error::{EventBusError, EventBusResult};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// A unit of delivery work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Task-submission interface used for every delivery.
pub trait Executor: Send + Sync + 'static {
    /// Schedules `task`. May block while the executor is saturated.
    fn submit(&self, task: Task) -> EventBusResult<()>;

    /// Stops accepting tasks and waits for queued ones to finish.
    fn shutdown(&self) {}

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, task: Task) -> EventBusResult<()> {
        task();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 4;

/// Default queue capacity of a worker pool.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

thread_local! {
    // ID of the pool whose worker is running on this thread, 0 elsewhere.
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

/// Fixed-size thread pool fed by a bounded queue.
///
/// Tasks submitted from one of the pool's own workers never block on a full
/// queue; they run inline instead, so a listener that fires further events
/// cannot deadlock the pool.
#[derive(Debug)]
pub struct WorkerPool {
    id: u64,
    sender: Mutex<Option<SyncSender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Starts `workers` threads sharing a queue of `queue_capacity` tasks.
    pub fn new(workers: usize, queue_capacity: usize) -> EventBusResult<Self> {
        if workers == 0 {
            return Err(EventBusError::configuration(
                "worker pool needs at least one worker",
            ));
        }
        if queue_capacity == 0 {
            return Err(EventBusError::configuration(
                "worker pool queue capacity must be positive",
            ));
        }

        static POOL_IDS: AtomicU64 = AtomicU64::new(1);
        let id = POOL_IDS.fetch_add(1, Ordering::Relaxed);

        let (sender, receiver) = mpsc::sync_channel::<Task>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("clusterbus-worker-{}", index))
                .spawn(move || worker_loop(id, receiver))
                .map_err(|error| {
                    EventBusError::internal(format!("failed to spawn worker thread: {}", error))
                })?;
            handles.push(handle);
        }

        tracing::debug!(pool = id, workers, queue_capacity, "worker pool started");

        Ok(Self {
            id,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            size: workers,
            capacity: queue_capacity,
        })
    }

    /// Single worker: deliveries run one at a time in submission order.
    ///
    /// The exception is a task submitted from the worker itself while the
    /// queue is full: it runs inline at once, ahead of the queued tasks.
    /// Listeners that fire further events should size the queue for them if
    /// they depend on strict ordering.
    pub fn sequential(queue_capacity: usize) -> EventBusResult<Self> {
        Self::new(1, queue_capacity)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn on_own_worker(&self) -> bool {
        CURRENT_POOL.with(|current| current.get() == self.id)
    }
}

fn worker_loop(pool: u64, receiver: Arc<Mutex<Receiver<Task>>>) {
    CURRENT_POOL.with(|current| current.set(pool));
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(task) = next else {
            break;
        };
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::warn!(pool, "task panicked on worker thread");
        }
    }
}

impl Executor for WorkerPool {
    fn submit(&self, task: Task) -> EventBusResult<()> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| EventBusError::executor_rejected("worker pool is shut down"))?;

        if self.on_own_worker() {
            return match sender.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(task)) => {
                    task();
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(EventBusError::executor_rejected(
                    "worker pool is shut down",
                )),
            };
        }

        sender
            .send(task)
            .map_err(|_| EventBusError::executor_rejected("worker pool is shut down"))
    }

    fn shutdown(&self) {
        // Closing the queue lets workers drain it and then exit.
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(pool = self.id, "worker thread terminated abnormally");
            }
        }
    }

    fn name(&self) -> &'static str {
        "worker_pool"
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(feature = "async")]
pub use self::tokio_executor::TokioExecutor;

#[cfg(feature = "async")]
mod tokio_executor {
    use super::{Executor, Task};
    use crate::error::{EventBusError, EventBusResult};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Condvar, Mutex, PoisonError};
    use tokio::runtime::Handle;

    #[derive(Debug, Default)]
    struct InFlight {
        count: Mutex<usize>,
        idle: Condvar,
    }

    struct InFlightGuard(Arc<InFlight>);

    impl Drop for InFlightGuard {
        fn drop(&mut self) {
            let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
            *count -= 1;
            if *count == 0 {
                self.0.idle.notify_all();
            }
        }
    }

    /// Runs deliveries on a tokio runtime's blocking thread pool.
    ///
    /// `shutdown` blocks until in-flight deliveries finish, so call it from
    /// outside the runtime's async worker threads.
    #[derive(Debug)]
    pub struct TokioExecutor {
        handle: Handle,
        in_flight: Arc<InFlight>,
        closed: AtomicBool,
    }

    impl TokioExecutor {
        /// Uses the given runtime handle.
        pub fn new(handle: Handle) -> Self {
            Self {
                handle,
                in_flight: Arc::new(InFlight::default()),
                closed: AtomicBool::new(false),
            }
        }

        /// Uses the runtime the caller is running in.
        pub fn current() -> EventBusResult<Self> {
            Handle::try_current()
                .map(Self::new)
                .map_err(|error| EventBusError::configuration(format!("no tokio runtime: {}", error)))
        }

        /// Number of deliveries that have not finished yet.
        pub fn in_flight(&self) -> usize {
            *self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Executor for TokioExecutor {
        fn submit(&self, task: Task) -> EventBusResult<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(EventBusError::executor_rejected("tokio executor is shut down"));
            }
            *self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
            let guard = InFlightGuard(Arc::clone(&self.in_flight));
            self.handle.spawn_blocking(move || {
                let _guard = guard;
                task();
            });
            Ok(())
        }

        fn shutdown(&self) {
            self.closed.store(true, Ordering::Release);
            let mut count = self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner);
            while *count > 0 {
                count = self
                    .in_flight
                    .idle
                    .wait(count)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        fn name(&self) -> &'static str {
            "tokio"
        }
    }
}

/// Selects and sizes the delivery executor.
///
/// ```rust
/// use clusterbus::ExecutorConfig;
///
/// let config: ExecutorConfig =
///     serde_json::from_str(r#"{ "kind": "worker_pool", "workers": 2 }"#).unwrap();
/// assert_eq!(
///     config,
///     ExecutorConfig::WorkerPool { workers: 2, queue_capacity: 1024 }
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// Deliver on the firing thread.
    #[default]
    Inline,
    /// Deliver on a bounded worker pool.
    WorkerPool {
        /// Number of worker threads.
        #[serde(default = "default_workers")]
        workers: usize,
        /// Maximum number of queued deliveries before `fire` blocks.
        #[serde(default = "default_queue_capacity")]
        queue_capacity: usize,
    },
    /// Deliver on the current tokio runtime (feature `async`).
    Tokio,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl ExecutorConfig {
    /// Creates the configured executor.
    pub fn build(&self) -> EventBusResult<Arc<dyn Executor>> {
        match self {
            Self::Inline => Ok(Arc::new(InlineExecutor)),
            Self::WorkerPool {
                workers,
                queue_capacity,
            } => Ok(Arc::new(WorkerPool::new(*workers, *queue_capacity)?)),
            #[cfg(feature = "async")]
            Self::Tokio => Ok(Arc::new(TokioExecutor::current()?)),
            #[cfg(not(feature = "async"))]
            Self::Tokio => Err(EventBusError::configuration(
                "the tokio executor requires the `async` feature",
            )),
        }
    }
}
