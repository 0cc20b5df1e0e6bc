use std::fmt;
use std::num::NonZero;
use std::sync::atomic::{AtomicBool, Ordering};

use new_zealand::nz;

use crate::Tile;

/// Processes the tiles of a [`Task`].
///
/// The callback is invoked once for every tile of the task, on whichever worker thread picks up
/// the tile. Invocations for different tiles of the same task may run concurrently, so the
/// callback must be [`Sync`].
///
/// Any closure with the signature `Fn(usize, Tile)` is a valid callback. Implement the trait
/// directly when the callback carries enough state to deserve its own type.
///
/// # Example
///
/// ```
/// use tile_processor::{Tile, TileCallback};
///
/// struct Clear;
///
/// impl TileCallback for Clear {
///     fn process_tile(&self, worker_index: usize, tile: Tile) {
///         println!("worker {worker_index} clearing {} elements", tile.area());
///     }
/// }
/// ```
pub trait TileCallback: Sync {
    /// Processes one tile.
    ///
    /// `worker_index` identifies the worker thread executing the tile and is in the range
    /// `0..worker_count`. Callbacks may use it to index per-worker scratch state without
    /// contention.
    fn process_tile(&self, worker_index: usize, tile: Tile);
}

impl<F> TileCallback for F
where
    F: Fn(usize, Tile) + Sync,
{
    fn process_tile(&self, worker_index: usize, tile: Tile) {
        self(worker_index, tile);
    }
}

/// A two-dimensional workload to be processed by a [`TaskProcessor`][crate::TaskProcessor].
///
/// The task describes a `width × height` domain of element positions and a callback that is
/// invoked for each tile the domain is partitioned into. The task borrows the callback, so the
/// callback may freely borrow buffers owned by the caller.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use tile_processor::{Task, Tile};
///
/// let callback = |_worker_index: usize, tile: Tile| {
///     assert!(tile.end_x() <= 640);
/// };
///
/// let task = Task::new(640, 480, &callback)
///     .with_vector_width(nz!(4))
///     .restartable(true);
///
/// assert_eq!(task.width(), 640);
/// assert!(task.is_restartable());
/// ```
pub struct Task<'a> {
    width: usize,
    height: usize,
    vector_width: NonZero<usize>,
    restartable: bool,
    callback: &'a dyn TileCallback,

    // Set while the task is submitted to a processor.
    in_flight: AtomicBool,
}

impl<'a> Task<'a> {
    /// Creates a task covering a `width × height` domain, processed by `callback`.
    ///
    /// A domain with zero width or zero height is valid and completes immediately without
    /// invoking the callback.
    ///
    /// The task has a vector width of 1 and is not restartable unless configured otherwise.
    #[must_use]
    pub fn new(width: usize, height: usize, callback: &'a dyn TileCallback) -> Self {
        Self {
            width,
            height,
            vector_width: nz!(1),
            restartable: false,
            callback,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Sets the number of scalar lanes per element position.
    ///
    /// The processor does not interpret this value, it is passed through to the callback as
    /// [`Tile::vector_width()`].
    #[must_use]
    pub fn with_vector_width(mut self, vector_width: NonZero<usize>) -> Self {
        self.vector_width = vector_width;
        self
    }

    /// Sets whether the task must be tiled the same way regardless of the number of workers.
    ///
    /// Restartable tasks produce identical results whether processed by a processor with one
    /// worker or with many, at the cost of the tiling not adapting to the worker count.
    #[must_use]
    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Width of the task domain, in element positions.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of the task domain, in element positions.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of scalar lanes per element position.
    #[must_use]
    pub fn vector_width(&self) -> NonZero<usize> {
        self.vector_width
    }

    /// Whether the task must be tiled independently of the worker count.
    #[must_use]
    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub(crate) fn callback(&self) -> &'a dyn TileCallback {
        self.callback
    }

    /// Marks the task as submitted until the returned guard is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the task is already submitted.
    pub(crate) fn begin_submission(&self) -> InFlightGuard<'_> {
        let was_in_flight = self.in_flight.swap(true, Ordering::Acquire);

        assert!(
            !was_in_flight,
            "a task cannot be submitted again while a previous submission of it is in flight"
        );

        InFlightGuard {
            in_flight: &self.in_flight,
        }
    }
}

impl fmt::Debug for Task<'_> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("vector_width", &self.vector_width)
            .field("restartable", &self.restartable)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight flag of a [`Task`] when dropped.
#[derive(Debug)]
pub(crate) struct InFlightGuard<'a> {
    in_flight: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Task<'static>: Send, Sync);

    #[test]
    fn defaults() {
        let callback = |_: usize, _: Tile| {};
        let task = Task::new(3, 4, &callback);

        assert_eq!(task.width(), 3);
        assert_eq!(task.height(), 4);
        assert_eq!(task.vector_width().get(), 1);
        assert!(!task.is_restartable());
    }

    #[test]
    fn modifiers_apply() {
        let callback = |_: usize, _: Tile| {};
        let task = Task::new(3, 4, &callback)
            .with_vector_width(nz!(8))
            .restartable(true);

        assert_eq!(task.vector_width().get(), 8);
        assert!(task.is_restartable());
    }

    #[test]
    fn closure_is_callback() {
        let calls = AtomicUsize::new(0);
        let callback = |worker_index: usize, tile: Tile| {
            assert_eq!(worker_index, 7);
            calls.fetch_add(tile.area(), Ordering::Relaxed);
        };

        let task = Task::new(2, 2, &callback);
        task.callback()
            .process_tile(7, Tile::new(0..2, 0..2, nz!(1)));

        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn submission_guard_releases_task() {
        let callback = |_: usize, _: Tile| {};
        let task = Task::new(1, 1, &callback);

        drop(task.begin_submission());
        drop(task.begin_submission());
    }

    #[test]
    #[should_panic]
    fn double_submission_panics() {
        let callback = |_: usize, _: Tile| {};
        let task = Task::new(1, 1, &callback);

        let _first = task.begin_submission();
        let _second = task.begin_submission();
    }
}
