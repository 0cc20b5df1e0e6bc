//! Processor management, lifecycle and task submission.

use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::io;
use std::mem;
use std::num::NonZero;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::queue::SegQueue;
use event_listener::{Event, IntoNotification, Listener};
use many_cpus::ProcessorSet;
use tracing::{debug, trace};

use crate::metrics::{SUBMISSION_TILES, SUBMISSION_WAIT_TIME_MS};
use crate::{
    Error, IterationResult, PanicPayload, QueuedTile, Result, Submission, Task, TileGrid,
    WorkerCore,
};

const DEFAULT_THREAD_NAME_PREFIX: &str = "tile-worker";

/// The body of a worker thread, handed to the function that spawns it.
type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

static NEXT_PROCESSOR_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // The processor ID and worker index of the current thread, if it is a worker thread.
    static CURRENT_WORKER: Cell<Option<(u64, usize)>> = const { Cell::new(None) };
}

/// State shared between the processor handle and its worker threads.
struct ProcessorShared {
    id: u64,

    /// Tiles of all in-flight submissions, in the order they were submitted.
    queue: SegQueue<QueuedTile>,

    /// Notified when tiles are queued or shutdown is signaled.
    wake_event: Event,

    shutdown_flag: AtomicBool,
}

impl ProcessorShared {
    fn new() -> Self {
        Self {
            id: NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed),
            queue: SegQueue::new(),
            wake_event: Event::new(),
            shutdown_flag: AtomicBool::new(false),
        }
    }

    /// Wakes up to `count` idle workers that have not already been woken up.
    ///
    /// A worker that was notified but has not yet resumed may pick up tiles queued by an earlier
    /// submission, so it must not be counted toward the workers woken for this one.
    fn wake_workers(&self, count: usize) {
        self.wake_event.notify(count.additional());
    }

    #[cfg_attr(test, mutants::skip)] // Removing this causes timeouts (workers never stop).
    fn signal_shutdown(&self) {
        // Release ordering ensures all prior queue operations are visible to workers
        // before they observe the shutdown flag.
        self.shutdown_flag.store(true, Ordering::Release);
        self.wake_event.notify(usize::MAX);
    }
}

#[cfg_attr(test, mutants::skip)] // Mutations just hang.
fn worker_loop(shared: &ProcessorShared, worker_index: usize) {
    let core = WorkerCore::new(worker_index, &shared.queue, &shared.shutdown_flag);

    loop {
        match core.run_one_iteration() {
            IterationResult::Executed => {}
            IterationResult::Shutdown => break,
            IterationResult::WaitingForWork => {
                let listener = shared.wake_event.listen();

                // Re-check after registering listener to avoid lost wakeups.
                // Acquire ordering synchronizes with Release in signal_shutdown.
                if !shared.queue.is_empty() || shared.shutdown_flag.load(Ordering::Acquire) {
                    continue;
                }

                listener.wait();
            }
        }
    }
}

fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(payload) = handle.join() {
            // Tile callbacks run inside a panic trap, so a worker panicking means the processor
            // infrastructure itself is broken. Never ignore that, unless already unwinding.
            if !thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}

/// A fixed-size pool of worker threads that processes two-dimensional [`Task`]s tile by tile.
///
/// Submitting a task with [`do_task()`][Self::do_task] partitions the task domain into tiles,
/// queues them for the workers and blocks the calling thread until every tile has been
/// processed. Any number of threads may submit tasks to the same processor at the same time. The
/// tiles of all submissions share the same queue and workers, and each submitting thread waits
/// only for the tiles of its own task.
///
/// # Lifetime
///
/// The worker threads are started when the processor is built and live until the processor is
/// dropped. Dropping the processor signals the workers to stop and blocks until they have exited.
/// Since [`do_task()`][Self::do_task] borrows the processor, no submission can be in flight at
/// that point.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use new_zealand::nz;
/// use tile_processor::{Task, TaskProcessor, Tile};
///
/// let processor = TaskProcessor::new(nz!(4)).unwrap();
///
/// let processed = AtomicUsize::new(0);
/// let count_elements = |_worker_index: usize, tile: Tile| {
///     processed.fetch_add(tile.area(), Ordering::Relaxed);
/// };
///
/// processor.do_task(&Task::new(640, 480, &count_elements));
///
/// assert_eq!(processed.load(Ordering::Relaxed), 640 * 480);
/// ```
pub struct TaskProcessor {
    shared: Arc<ProcessorShared>,
    worker_count: NonZero<usize>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl TaskProcessor {
    /// Creates a processor with `worker_count` worker threads.
    ///
    /// Use [`TaskProcessor::builder()`] for custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerSpawn`] if a worker thread cannot be created.
    pub fn new(worker_count: NonZero<usize>) -> Result<Self> {
        Self::builder().worker_count(worker_count).build()
    }

    /// Creates a builder for configuring the processor.
    #[must_use]
    pub fn builder() -> TaskProcessorBuilder {
        TaskProcessorBuilder::new()
    }

    /// The number of worker threads of the processor. Fixed for the lifetime of the processor.
    #[must_use]
    pub fn worker_count(&self) -> NonZero<usize> {
        self.worker_count
    }

    /// Processes every tile of `task` on the worker threads, blocking until all are done.
    ///
    /// When this returns, the callback has completed for every tile of the task and all its
    /// effects are visible to the calling thread. A task with an empty domain returns immediately
    /// without invoking the callback.
    ///
    /// This may be called concurrently from any number of threads, each submitting its own task.
    /// Workers pick up tiles in the order they were queued, regardless of which task they belong
    /// to.
    ///
    /// A callback that never returns stalls its submission and occupies one worker forever. With
    /// a single worker, this also stalls every other submission.
    ///
    /// # Panics
    ///
    /// If the callback panics for any tile, the remaining tiles of the task are skipped and the
    /// first panic is resumed on the calling thread once all tiles are accounted for.
    ///
    /// Panics if `task` is already being processed by a concurrent `do_task()` call, or if
    /// called from one of this processor's own worker threads.
    pub fn do_task(&self, task: &Task<'_>) {
        assert!(
            !self.is_current_thread_worker(),
            "do_task() cannot be called from a worker thread of the same processor because the worker would wait for itself"
        );

        let _in_flight = task.begin_submission();

        let panic_payload =
            SUBMISSION_WAIT_TIME_MS.with(|e| e.observe_duration_millis(|| self.dispatch(task)));

        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }
    }

    fn dispatch(&self, task: &Task<'_>) -> Option<PanicPayload> {
        let grid = TileGrid::plan(
            task.width(),
            task.height(),
            self.worker_count,
            task.is_restartable(),
        );

        SUBMISSION_TILES.with(|e| e.observe(grid.len()));

        if grid.is_empty() {
            trace!(processor_id = self.shared.id, ?task, "empty task completed");
            return None;
        }

        // SAFETY: The guard below waits for every tile of the submission to complete before we
        // leave this scope, even when unwinding, so the borrowed callback outlives its uses.
        let submission = Arc::new(unsafe { Submission::new(task.callback(), grid.len()) });

        {
            let pending = scopeguard::guard(Arc::clone(&submission), |pending| pending.wait());

            for tile in grid.tiles(task.vector_width()) {
                self.shared.queue.push(QueuedTile {
                    tile,
                    submission: Arc::clone(&pending),
                });
            }

            self.shared.wake_workers(grid.len());

            trace!(
                processor_id = self.shared.id,
                tiles = grid.len(),
                columns = grid.columns(),
                rows = grid.rows(),
                "submission queued"
            );
        }

        trace!(processor_id = self.shared.id, "submission completed");

        submission.take_panic()
    }

    fn is_current_thread_worker(&self) -> bool {
        CURRENT_WORKER
            .get()
            .is_some_and(|(processor_id, _)| processor_id == self.shared.id)
    }
}

impl fmt::Debug for TaskProcessor {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("id", &self.shared.id)
            .field("worker_count", &self.worker_count)
            .field("queued_tiles", &self.shared.queue.len())
            .finish_non_exhaustive()
    }
}

impl Drop for TaskProcessor {
    #[cfg_attr(test, mutants::skip)] // Impractical to test that stuff stops happening.
    fn drop(&mut self) {
        debug!(processor_id = self.shared.id, "shutting down task processor");

        self.shared.signal_shutdown();
        join_workers(mem::take(&mut self.worker_handles));
    }
}

/// Builder for configuring a [`TaskProcessor`].
///
/// # Example
///
/// ```
/// use many_cpus::ProcessorSet;
/// use tile_processor::TaskProcessor;
///
/// // One worker per processor, each pinned to the processors of the set.
/// let processor = TaskProcessor::builder()
///     .processors(ProcessorSet::default())
///     .thread_name_prefix("blur")
///     .build()
///     .unwrap();
///
/// assert_eq!(processor.worker_count().get(), ProcessorSet::default().len());
/// ```
#[derive(Debug)]
pub struct TaskProcessorBuilder {
    worker_count: Option<NonZero<usize>>,
    processors: Option<ProcessorSet>,
    thread_name_prefix: String,
}

impl TaskProcessorBuilder {
    fn new() -> Self {
        Self {
            worker_count: None,
            processors: None,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }

    /// Sets the number of worker threads.
    ///
    /// Defaults to the number of processors in the configured processor set, or in the default
    /// processor set if none is configured.
    #[must_use]
    pub fn worker_count(mut self, worker_count: NonZero<usize>) -> Self {
        self.worker_count = Some(worker_count);
        self
    }

    /// Pins every worker thread to the given set of processors.
    ///
    /// By default, worker threads are not pinned and may run on any processor.
    #[must_use]
    pub fn processors(mut self, processors: ProcessorSet) -> Self {
        self.processors = Some(processors);
        self
    }

    /// Sets the prefix of worker thread names. Each worker thread is named
    /// `{prefix}-{worker_index}`.
    ///
    /// Default is `tile-worker`.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Builds the processor, starting all of its worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerSpawn`] if a worker thread cannot be created. Workers already
    /// started at that point are shut down before returning.
    pub fn build(self) -> Result<TaskProcessor> {
        self.build_with_spawner(|builder, body| builder.spawn(body))
    }

    /// Builds the processor, starting each worker thread via `spawn`.
    fn build_with_spawner<S>(self, mut spawn: S) -> Result<TaskProcessor>
    where
        S: FnMut(thread::Builder, WorkerBody) -> io::Result<JoinHandle<()>>,
    {
        let worker_count = match (self.worker_count, &self.processors) {
            (Some(worker_count), _) => worker_count,
            (None, Some(processors)) => processor_count(processors),
            (None, None) => processor_count(&ProcessorSet::default()),
        };

        let shared = Arc::new(ProcessorShared::new());
        let mut worker_handles = Vec::with_capacity(worker_count.get());

        for worker_index in 0..worker_count.get() {
            let builder =
                thread::Builder::new().name(format!("{}-{worker_index}", self.thread_name_prefix));

            let body: WorkerBody = Box::new({
                let shared = Arc::clone(&shared);
                let processors = self.processors.clone();

                move || {
                    if let Some(processors) = processors {
                        processors.pin_current_thread_to();
                    }

                    CURRENT_WORKER.set(Some((shared.id, worker_index)));

                    debug!(processor_id = shared.id, worker_index, "worker thread started");
                    worker_loop(&shared, worker_index);
                    debug!(processor_id = shared.id, worker_index, "worker thread exiting");
                }
            });

            let spawned = spawn(builder, body);

            match spawned {
                Ok(handle) => worker_handles.push(handle),
                Err(source) => {
                    debug!(
                        processor_id = shared.id,
                        worker_index, "failed to spawn worker thread, shutting down"
                    );

                    shared.signal_shutdown();
                    join_workers(worker_handles);

                    return Err(Error::WorkerSpawn {
                        worker_index,
                        source,
                    });
                }
            }
        }

        debug!(
            processor_id = shared.id,
            worker_count = worker_count.get(),
            "task processor started"
        );

        Ok(TaskProcessor {
            shared,
            worker_count,
            worker_handles,
        })
    }
}

fn processor_count(processors: &ProcessorSet) -> NonZero<usize> {
    NonZero::new(processors.len()).expect("a processor set is never empty")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::Tile;

    assert_impl_all!(TaskProcessor: Send, Sync);

    #[cfg_attr(miri, ignore)]
    #[test]
    fn new_creates_requested_workers() {
        let processor = TaskProcessor::new(nz!(3)).unwrap();

        assert_eq!(processor.worker_count().get(), 3);
        assert_eq!(processor.worker_handles.len(), 3);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn default_worker_count_follows_processors() {
        let processor = TaskProcessor::builder().build().unwrap();

        assert_eq!(
            processor.worker_count().get(),
            ProcessorSet::default().len()
        );
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn worker_threads_are_named() {
        let processor = TaskProcessor::builder()
            .worker_count(nz!(2))
            .thread_name_prefix("named")
            .build()
            .unwrap();

        let names = processor
            .worker_handles
            .iter()
            .map(|handle| handle.thread().name().unwrap().to_string())
            .collect::<Vec<_>>();

        assert_eq!(names, ["named-0", "named-1"]);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn worker_indexes_are_in_range() {
        let processor = TaskProcessor::new(nz!(4)).unwrap();
        let max_index = AtomicUsize::new(0);

        let callback = |worker_index: usize, _: Tile| {
            max_index.fetch_max(worker_index, Ordering::Relaxed);

            // Give other workers a chance to pick up tiles, too.
            thread::sleep(Duration::from_millis(1));
        };

        processor.do_task(&Task::new(64, 64, &callback));

        assert!(max_index.load(Ordering::Relaxed) < 4);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn worker_thread_is_recognized() {
        let processor = TaskProcessor::new(nz!(1)).unwrap();
        let other = TaskProcessor::new(nz!(1)).unwrap();

        assert!(!processor.is_current_thread_worker());

        let own_worker = AtomicBool::new(false);
        let other_worker = AtomicBool::new(true);

        let callback = |_: usize, _: Tile| {
            own_worker.store(processor.is_current_thread_worker(), Ordering::Relaxed);
            other_worker.store(other.is_current_thread_worker(), Ordering::Relaxed);
        };

        processor.do_task(&Task::new(1, 1, &callback));

        assert!(own_worker.load(Ordering::Relaxed));
        assert!(!other_worker.load(Ordering::Relaxed));
    }

    #[test]
    fn successive_wakes_reach_distinct_workers() {
        let shared = ProcessorShared::new();

        let first = shared.wake_event.listen();
        let second = shared.wake_event.listen();

        // Two single-tile submissions queued before either worker got to run.
        shared.wake_workers(1);
        shared.wake_workers(1);

        assert!(first.wait_timeout(Duration::from_millis(10)).is_some());
        assert!(second.wait_timeout(Duration::from_millis(10)).is_some());
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn spawn_failure_joins_started_workers() {
        let attempts = AtomicUsize::new(0);
        let exited = Arc::new(AtomicUsize::new(0));

        let result = TaskProcessor::builder()
            .worker_count(nz!(4))
            .build_with_spawner(|builder, body| {
                if attempts.fetch_add(1, Ordering::Relaxed) == 2 {
                    return Err(io::Error::new(io::ErrorKind::OutOfMemory, "no more threads"));
                }

                let exited = Arc::clone(&exited);

                builder.spawn(move || {
                    body();
                    exited.fetch_add(1, Ordering::Relaxed);
                })
            });

        let Err(Error::WorkerSpawn {
            worker_index,
            source,
        }) = result
        else {
            panic!("building the processor was expected to fail");
        };

        assert_eq!(worker_index, 2);
        assert_eq!(source.kind(), io::ErrorKind::OutOfMemory);

        // No further workers were attempted and the two started ones ran to completion.
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        assert_eq!(exited.load(Ordering::Relaxed), 2);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn drop_idle_processor() {
        let processor = TaskProcessor::new(nz!(2)).unwrap();
        drop(processor);
    }
}
