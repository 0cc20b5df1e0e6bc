#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Fixed-size worker pool that processes two-dimensional workloads tile by tile.
//!
//! A [`Task`] describes a `width × height` domain of element positions and a callback. Submitting
//! the task to a [`TaskProcessor`] partitions the domain into rectangular [`Tile`]s, which the
//! worker threads of the processor execute in parallel. The submitting thread blocks until every
//! tile of its task has been processed.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Mutex;
//!
//! use new_zealand::nz;
//! use tile_processor::{Task, TaskProcessor, Tile};
//!
//! const WIDTH: usize = 64;
//! const HEIGHT: usize = 32;
//!
//! let processor = TaskProcessor::new(nz!(4)).unwrap();
//!
//! let pixels = Mutex::new(vec![0_u32; WIDTH * HEIGHT]);
//!
//! let fill = |_worker_index: usize, tile: Tile| {
//!     let mut pixels = pixels.lock().unwrap();
//!
//!     for y in tile.y_range() {
//!         for x in tile.x_range() {
//!             pixels[y * WIDTH + x] = (x + y) as u32;
//!         }
//!     }
//! };
//!
//! processor.do_task(&Task::new(WIDTH, HEIGHT, &fill));
//!
//! assert_eq!(pixels.lock().unwrap()[WIDTH + 1], 2);
//! ```
//!
//! # Key features
//!
//! - **Concurrent submissions**: Any number of threads may call [`TaskProcessor::do_task()`] on
//!   the same processor at the same time. Their tiles share the workers and each caller waits
//!   only for its own tiles.
//! - **Deterministic tiling**: A [`restartable`][Task::restartable] task is always split into the
//!   same tiles, no matter how many workers the processor has. See [`TileGrid`].
//! - **Per-worker state**: The callback receives the index of the worker executing the tile, so
//!   it can use per-worker scratch buffers without contention.
//! - **Processor affinity**: Worker threads can be pinned to a [`ProcessorSet`][many_cpus::ProcessorSet]
//!   via [`TaskProcessorBuilder::processors()`].
//!
//! # Panics
//!
//! If the callback panics, the remaining tiles of the task are skipped and the panic is re-thrown
//! on the thread that submitted the task. The processor remains usable for other tasks.

mod error;
mod grid;
mod metrics;
mod processor;
mod submission;
mod task;
mod tile;
mod worker;

pub use error::*;
pub use grid::*;
pub use processor::*;
pub(crate) use submission::*;
pub use task::*;
pub use tile::*;
pub(crate) use worker::*;
