//! Fills byte buffers through processors of different sizes, from several caller threads at once,
//! and verifies that the results are exact and independent of the number of workers.

use std::num::NonZero;
use std::sync::Mutex;
use std::thread;

use new_zealand::nz;
use testing::{LaneBuffer, lane_value, with_watchdog};
use tile_processor::{Task, TaskProcessor, Tile, TileGrid};

const DOMAINS: [(usize, usize); 4] = [(1, 1), (123, 47), (26_000, 1), (1, 26_000)];

fn fill(
    processor: &TaskProcessor,
    width: usize,
    height: usize,
    vector_width: NonZero<usize>,
    delta: usize,
) -> LaneBuffer {
    let buffer = LaneBuffer::new(width, height, vector_width.get());

    let add_reference_values = |_worker_index: usize, tile: Tile| {
        for y in tile.y_range() {
            for x in tile.x_range() {
                for lane in 0..tile.vector_width().get() {
                    buffer.add(x, y, lane, lane_value(x, y, delta + lane));
                }
            }
        }
    };

    let task = Task::new(width, height, &add_reference_values)
        .with_vector_width(vector_width)
        .restartable(true);

    processor.do_task(&task);

    buffer
}

#[cfg_attr(miri, ignore)]
#[test]
fn fill_is_exact_for_every_domain_and_pool_size() {
    with_watchdog(|| {
        for worker_count in [nz!(1), nz!(4)] {
            let processor = TaskProcessor::new(worker_count).unwrap();

            for (width, height) in DOMAINS {
                fill(&processor, width, height, nz!(4), 0).assert_filled(0);
            }
        }
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn concurrent_callers_on_shared_pools_match_reference() {
    with_watchdog(|| {
        let single = TaskProcessor::new(nz!(1)).unwrap();
        let quad = TaskProcessor::new(nz!(4)).unwrap();

        thread::scope(|s| {
            for caller in 0..4_usize {
                let single = &single;
                let quad = &quad;

                s.spawn(move || {
                    let delta = caller * 13 + 1;
                    let vector_width = NonZero::new(caller + 1).unwrap();

                    for (width, height) in DOMAINS {
                        let from_single = fill(single, width, height, vector_width, delta);
                        let from_quad = fill(quad, width, height, vector_width, delta);

                        from_single.assert_filled(delta);
                        from_quad.assert_filled(delta);
                        assert_eq!(from_single.to_vec(), from_quad.to_vec());
                    }
                });
            }
        });
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn restartable_task_sees_same_tiles_regardless_of_pool_size() {
    with_watchdog(|| {
        fn observed_tiles(worker_count: NonZero<usize>, width: usize, height: usize) -> Vec<Tile> {
            let processor = TaskProcessor::new(worker_count).unwrap();
            let tiles = Mutex::new(Vec::new());

            let record = |_: usize, tile: Tile| tiles.lock().unwrap().push(tile);
            processor.do_task(&Task::new(width, height, &record).restartable(true));

            let mut tiles = tiles.into_inner().unwrap();
            tiles.sort_by_key(|tile| (tile.start_y(), tile.start_x()));
            tiles
        }

        for (width, height) in DOMAINS {
            let reference = observed_tiles(nz!(1), width, height);

            assert_eq!(reference.len(), TileGrid::plan(width, height, nz!(1), true).len());
            assert_eq!(observed_tiles(nz!(4), width, height), reference);
            assert_eq!(observed_tiles(nz!(7), width, height), reference);
        }
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn non_restartable_fill_is_also_exact() {
    with_watchdog(|| {
        let processor = TaskProcessor::new(nz!(3)).unwrap();
        let buffer = LaneBuffer::new(200, 30, 2);

        let add_reference_values = |_: usize, tile: Tile| {
            for y in tile.y_range() {
                for x in tile.x_range() {
                    for lane in 0..2 {
                        buffer.add(x, y, lane, lane_value(x, y, 5 + lane));
                    }
                }
            }
        };

        processor.do_task(&Task::new(200, 30, &add_reference_values).with_vector_width(nz!(2)));

        buffer.assert_filled(5);
    });
}
