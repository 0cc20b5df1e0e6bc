//! Metrics for the tile processor.
//!
//! The events are thread-local to avoid contention between workers and submitting threads.

use nm::{Event, Magnitude};

/// Histogram buckets for tile callback execution time in milliseconds.
///
/// Tiles are meant to be small, so most of them should complete within a few milliseconds.
const TILE_EXECUTION_TIME_MS_BUCKETS: &[Magnitude] = &[0, 1, 2, 5, 10, 20, 50, 100, 500, 1000];

/// Histogram buckets for the number of element positions in a tile.
const TILE_ELEMENTS_BUCKETS: &[Magnitude] = &[1, 16, 64, 256, 1024, 4096, 16384, 65536, 262_144];

/// Histogram buckets for the number of tiles in a submission.
const SUBMISSION_TILES_BUCKETS: &[Magnitude] = &[0, 1, 2, 4, 8, 16, 32, 64, 128, 256, 1024];

/// Histogram buckets for the time a submitting thread spends in `do_task()`, in milliseconds.
const SUBMISSION_WAIT_TIME_MS_BUCKETS: &[Magnitude] =
    &[0, 1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 5000];

thread_local! {
    /// Time spent in the tile callback, observed on the worker thread.
    pub(crate) static TILE_EXECUTION_TIME_MS: Event = Event::builder()
        .name("tile_processor_tile_execution_time_ms")
        .histogram(TILE_EXECUTION_TIME_MS_BUCKETS)
        .build();

    /// Area of each executed tile, observed on the worker thread.
    pub(crate) static TILE_ELEMENTS: Event = Event::builder()
        .name("tile_processor_tile_elements")
        .histogram(TILE_ELEMENTS_BUCKETS)
        .build();

    /// Number of tiles each task was partitioned into, observed on the submitting thread.
    pub(crate) static SUBMISSION_TILES: Event = Event::builder()
        .name("tile_processor_submission_tiles")
        .histogram(SUBMISSION_TILES_BUCKETS)
        .build();

    /// Time from submission until all tiles completed, observed on the submitting thread.
    pub(crate) static SUBMISSION_WAIT_TIME_MS: Event = Event::builder()
        .name("tile_processor_submission_wait_time_ms")
        .histogram(SUBMISSION_WAIT_TIME_MS_BUCKETS)
        .build();
}
