//! Worker thread logic for executing queued tiles.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;
use tracing::debug;

use crate::metrics::{TILE_ELEMENTS, TILE_EXECUTION_TIME_MS};
use crate::{Submission, Tile};

/// A tile waiting in the shared queue, tagged with the submission it belongs to.
#[derive(Debug)]
pub(crate) struct QueuedTile {
    pub(crate) tile: Tile,
    pub(crate) submission: Arc<Submission>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IterationResult {
    Executed,
    Shutdown,
    WaitingForWork,
}

pub(crate) struct WorkerCore<'a> {
    worker_index: usize,
    queue: &'a SegQueue<QueuedTile>,
    shutdown_flag: &'a AtomicBool,
}

impl<'a> WorkerCore<'a> {
    pub(crate) fn new(
        worker_index: usize,
        queue: &'a SegQueue<QueuedTile>,
        shutdown_flag: &'a AtomicBool,
    ) -> Self {
        Self {
            worker_index,
            queue,
            shutdown_flag,
        }
    }

    pub(crate) fn run_one_iteration(&self) -> IterationResult {
        // Queued tiles are drained before shutdown is honored, so a submitter can never be left
        // waiting for a tile that nobody will execute.
        if let Some(queued) = self.queue.pop() {
            self.execute(queued);
            return IterationResult::Executed;
        }

        // Acquire ordering synchronizes with Release in signal_shutdown.
        if self.shutdown_flag.load(Ordering::Acquire) {
            return IterationResult::Shutdown;
        }

        IterationResult::WaitingForWork
    }

    fn execute(&self, queued: QueuedTile) {
        let QueuedTile { tile, submission } = queued;

        if !submission.is_poisoned() {
            // SAFETY: We hold a tile of the submission that we have not yet completed.
            let callback = unsafe { submission.callback() };

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                TILE_EXECUTION_TIME_MS.with(|e| {
                    e.observe_duration_millis(|| callback.process_tile(self.worker_index, tile));
                });
            }));

            match result {
                Ok(()) => TILE_ELEMENTS.with(|e| e.observe(tile.area())),
                Err(payload) => {
                    debug!(
                        worker_index = self.worker_index,
                        ?tile,
                        "tile callback panicked, skipping remaining tiles of the submission"
                    );
                    submission.record_panic(payload);
                }
            }
        }

        submission.complete_tile();
    }
}
