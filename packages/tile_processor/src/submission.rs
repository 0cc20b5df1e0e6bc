//! Bookkeeping for one in-flight task submission.

use std::any::Any;
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use event_listener::{Event, Listener};
use parking_lot::Mutex;

use crate::TileCallback;

pub(crate) type PanicPayload = Box<dyn Any + Send>;

/// State shared between the thread that submitted a task and the workers executing its tiles.
///
/// Every queued tile holds a reference to the submission it belongs to. The counter of remaining
/// tiles is only ever decremented by the tiles of this submission, which is what keeps concurrent
/// submissions isolated from each other.
pub(crate) struct Submission {
    // Points to the callback borrowed by the submitting thread. Only valid while tiles remain.
    callback: NonNull<dyn TileCallback>,

    remaining: AtomicUsize,
    completed: Event,

    poisoned: AtomicBool,
    panic_payload: Mutex<Option<PanicPayload>>,
}

// SAFETY: The callback is `Sync`, so it may be shared with and invoked from any thread. The rest
// of the fields are thread-safe types.
unsafe impl Send for Submission {}
// SAFETY: See above.
unsafe impl Sync for Submission {}

impl Submission {
    /// Creates the state for a submission consisting of `tile_count` tiles.
    ///
    /// # Safety
    ///
    /// The caller must keep `callback` alive until `wait()` has returned. In practice, the
    /// submitting thread must not return from the submission before that.
    pub(crate) unsafe fn new(callback: &dyn TileCallback, tile_count: usize) -> Self {
        let callback = NonNull::from(callback);

        // SAFETY: Only the lifetime bound of the trait object changes. The caller guarantees that
        // the callback outlives every use of the pointer, which all happen before `wait()` returns.
        let callback = unsafe {
            mem::transmute::<NonNull<dyn TileCallback + '_>, NonNull<dyn TileCallback + 'static>>(
                callback,
            )
        };

        Self {
            callback,
            remaining: AtomicUsize::new(tile_count),
            completed: Event::new(),
            poisoned: AtomicBool::new(false),
            panic_payload: Mutex::new(None),
        }
    }

    /// Returns the callback of the submitted task.
    ///
    /// # Safety
    ///
    /// The caller must hold a tile of this submission that has not yet been completed via
    /// `complete_tile()`, which guarantees that the submitting thread is still waiting.
    pub(crate) unsafe fn callback(&self) -> &dyn TileCallback {
        // SAFETY: Forwarding the guarantee from the caller - the submitting thread is still
        // blocked in `wait()`, so the borrow it created the submission from is still alive.
        unsafe { self.callback.as_ref() }
    }

    /// Records that one tile of the submission has been processed, waking up the submitting
    /// thread if it was the last one.
    ///
    /// After this returns, the caller must no longer access the callback.
    pub(crate) fn complete_tile(&self) {
        // Release ensures the effects of processing this tile are visible to the submitting
        // thread once it observes the counter reaching zero. Acquire ensures the last tile to
        // complete also sees the effects of all the other tiles.
        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);

        debug_assert!(previous > 0, "completed more tiles than the submission has");

        if previous == 1 {
            self.completed.notify(usize::MAX);
        }
    }

    /// Number of tiles that have not yet been completed.
    pub(crate) fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Blocks the current thread until every tile of the submission has been completed.
    #[cfg_attr(test, mutants::skip)] // Mutations just hang.
    pub(crate) fn wait(&self) {
        loop {
            if self.remaining() == 0 {
                return;
            }

            let listener = self.completed.listen();

            // Re-check after registering the listener to avoid lost wakeups.
            if self.remaining() == 0 {
                return;
            }

            listener.wait();
        }
    }

    /// Whether a tile callback of this submission has panicked. The remaining tiles of a poisoned
    /// submission are completed without invoking the callback.
    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Relaxed)
    }

    /// Records a panic raised by the callback. Only the first panic is kept, to be resumed on the
    /// submitting thread.
    pub(crate) fn record_panic(&self, payload: PanicPayload) {
        self.poisoned.store(true, Ordering::Relaxed);

        let mut slot = self.panic_payload.lock();

        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    /// Takes the panic raised by the callback, if any.
    pub(crate) fn take_panic(&self) -> Option<PanicPayload> {
        self.panic_payload.lock().take()
    }
}

impl fmt::Debug for Submission {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("remaining", &self.remaining())
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}
