//! Uses the worker index to give every worker its own scratch buffer, so tiles can be processed
//! without contention on shared state.

use std::sync::Mutex;

use many_cpus::ProcessorSet;
use tile_processor::{Task, TaskProcessor, Tile};

const WIDTH: usize = 4096;
const HEIGHT: usize = 2048;

fn main() {
    let processor = TaskProcessor::builder()
        .processors(ProcessorSet::default())
        .thread_name_prefix("scratch-worker")
        .build()
        .unwrap();

    // One histogram per worker. Each worker only ever locks its own, so there is no contention.
    let histograms = (0..processor.worker_count().get())
        .map(|_| Mutex::new([0_u64; 16]))
        .collect::<Vec<_>>();

    let classify = |worker_index: usize, tile: Tile| {
        let mut histogram = histograms[worker_index].lock().unwrap();

        for y in tile.y_range() {
            for x in tile.x_range() {
                histogram[(x.wrapping_mul(y) ^ x) % 16] += 1;
            }
        }
    };

    processor.do_task(&Task::new(WIDTH, HEIGHT, &classify));

    let mut total = [0_u64; 16];

    for histogram in &histograms {
        for (bucket, count) in histogram.lock().unwrap().iter().enumerate() {
            total[bucket] += count;
        }
    }

    println!(
        "Processed {} elements on {} workers",
        total.iter().sum::<u64>(),
        processor.worker_count()
    );

    for (bucket, count) in total.iter().enumerate() {
        println!("bucket {bucket:2}: {count}");
    }
}
