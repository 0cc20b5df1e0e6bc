#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and benchmarking the tile processor.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout, so a deadlocked test fails instead of hanging forever.
///
/// The timeout is 30 seconds under normal conditions and 120 seconds under Miri, where thread
/// synchronization is dramatically slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly, so mutation testing can detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout. Panics raised by the test are propagated.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let timeout = if cfg!(miri) {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(30)
    };

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded {timeout:?} timeout - probably deadlocked");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Deterministic per-coordinate reference value used to fill test buffers.
///
/// The value depends on every input, so a buffer filled with the wrong coordinates, the wrong
/// lane or the wrong seed is detected.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "modulo 251 always fits in u8"
)]
pub fn lane_value(x: usize, y: usize, seed: usize) -> u8 {
    let mixed = x
        .wrapping_mul(31)
        .wrapping_add(y.wrapping_mul(17))
        .wrapping_add(seed.wrapping_mul(7))
        .wrapping_add(x.wrapping_mul(y) ^ seed);

    (mixed % 251) as u8
}

/// A `width × height × lanes` byte buffer that can be written from many threads at once.
///
/// Writes are additive, mirroring kernels that accumulate into their output. A buffer filled
/// through correctly partitioned tiles therefore holds exactly one contribution per byte.
#[derive(Debug)]
pub struct LaneBuffer {
    width: usize,
    height: usize,
    lanes: usize,
    bytes: Box<[AtomicU8]>,
}

impl LaneBuffer {
    /// Creates a zero-initialized buffer.
    #[must_use]
    pub fn new(width: usize, height: usize, lanes: usize) -> Self {
        let len = width * height * lanes;

        Self {
            width,
            height,
            lanes,
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Adds `value` to the byte at lane `lane` of position `(x, y)`, wrapping on overflow.
    pub fn add(&self, x: usize, y: usize, lane: usize, value: u8) {
        self.bytes[self.index(x, y, lane)].fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the byte at lane `lane` of position `(x, y)`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize, lane: usize) -> u8 {
        self.bytes[self.index(x, y, lane)].load(Ordering::Relaxed)
    }

    /// Copies the buffer contents out, for comparing whole buffers.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes
            .iter()
            .map(|byte| byte.load(Ordering::Relaxed))
            .collect()
    }

    /// Asserts that every byte holds `lane_value(x, y, seed + lane)`.
    ///
    /// # Panics
    ///
    /// Panics on the first mismatching byte.
    pub fn assert_filled(&self, seed: usize) {
        for y in 0..self.height {
            for x in 0..self.width {
                for lane in 0..self.lanes {
                    let expected = lane_value(x, y, seed + lane);
                    let actual = self.get(x, y, lane);

                    assert_eq!(
                        actual, expected,
                        "byte at ({x}, {y}) lane {lane} holds {actual}, expected {expected}"
                    );
                }
            }
        }
    }

    fn index(&self, x: usize, y: usize, lane: usize) -> usize {
        assert!(x < self.width && y < self.height && lane < self.lanes);

        (y * self.width + x) * self.lanes + lane
    }
}

/// Counts how many times each position of a two-dimensional domain has been visited.
#[derive(Debug)]
pub struct CoverageMap {
    width: usize,
    height: usize,
    hits: Box<[AtomicU32]>,
}

impl CoverageMap {
    /// Creates a map with no visits recorded.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            hits: (0..width * height).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Records a visit to every position in `[start_x, end_x) × [start_y, end_y)`.
    pub fn visit(&self, start_x: usize, start_y: usize, end_x: usize, end_y: usize) {
        assert!(end_x <= self.width && end_y <= self.height);

        for y in start_y..end_y {
            for x in start_x..end_x {
                self.hits[y * self.width + x].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Asserts that every position has been visited exactly once.
    ///
    /// # Panics
    ///
    /// Panics on the first position visited zero times or more than once.
    pub fn assert_covered_once(&self) {
        for (index, hits) in self.hits.iter().enumerate() {
            let hits = hits.load(Ordering::Relaxed);
            let (x, y) = (index % self.width, index / self.width);

            assert_eq!(hits, 1, "position ({x}, {y}) was visited {hits} times");
        }
    }

    /// Total number of visits recorded across all positions.
    #[must_use]
    pub fn total_visits(&self) -> u64 {
        self.hits
            .iter()
            .map(|hits| u64::from(hits.load(Ordering::Relaxed)))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_value() {
        assert_eq!(with_watchdog(|| "hello world"), "hello world");
    }

    #[test]
    #[should_panic]
    fn watchdog_propagates_panic() {
        let _: () = with_watchdog(|| panic!("inner failure"));
    }

    #[test]
    fn lane_value_depends_on_every_input() {
        let base = lane_value(3, 4, 5);

        assert_ne!(lane_value(4, 4, 5), base);
        assert_ne!(lane_value(3, 5, 5), base);
        assert_ne!(lane_value(3, 4, 6), base);
    }

    #[test]
    fn lane_buffer_accumulates() {
        let buffer = LaneBuffer::new(2, 2, 3);

        buffer.add(1, 1, 2, 200);
        buffer.add(1, 1, 2, 100);

        assert_eq!(buffer.get(1, 1, 2), 44);
        assert_eq!(buffer.get(0, 0, 0), 0);
        assert_eq!(buffer.to_vec().len(), 12);
    }

    #[test]
    fn lane_buffer_detects_fill() {
        let buffer = LaneBuffer::new(3, 2, 2);

        for y in 0..2 {
            for x in 0..3 {
                for lane in 0..2 {
                    buffer.add(x, y, lane, lane_value(x, y, 10 + lane));
                }
            }
        }

        buffer.assert_filled(10);
    }

    #[test]
    fn coverage_map_counts_visits() {
        let map = CoverageMap::new(4, 3);

        map.visit(0, 0, 2, 3);
        map.visit(2, 0, 4, 3);

        map.assert_covered_once();
        assert_eq!(map.total_visits(), 12);
    }

    #[test]
    #[should_panic]
    fn coverage_map_detects_overlap() {
        let map = CoverageMap::new(2, 2);

        map.visit(0, 0, 2, 2);
        map.visit(1, 1, 2, 2);

        map.assert_covered_once();
    }
}
