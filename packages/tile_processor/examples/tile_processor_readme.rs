//! Fills an image buffer in parallel and prints a checksum of the result.

use std::sync::atomic::{AtomicU32, Ordering};

use new_zealand::nz;
use tile_processor::{Task, TaskProcessor, Tile};

const WIDTH: usize = 1920;
const HEIGHT: usize = 1080;

fn main() {
    let processor = TaskProcessor::new(nz!(4)).unwrap();

    let pixels = (0..WIDTH * HEIGHT)
        .map(|_| AtomicU32::new(0))
        .collect::<Vec<_>>();

    let gradient = |_worker_index: usize, tile: Tile| {
        for y in tile.y_range() {
            for x in tile.x_range() {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "coordinates of a 1920x1080 image fit in u32"
                )]
                let value = (x * 255 / WIDTH + y * 255 / HEIGHT) as u32;

                pixels[y * WIDTH + x].store(value, Ordering::Relaxed);
            }
        }
    };

    processor.do_task(&Task::new(WIDTH, HEIGHT, &gradient));

    let checksum: u64 = pixels
        .iter()
        .map(|pixel| u64::from(pixel.load(Ordering::Relaxed)))
        .sum();

    println!("Filled {WIDTH}x{HEIGHT} pixels, checksum {checksum}");
}
