use std::num::NonZero;
use std::ops::Range;

use new_zealand::nz;

use crate::Tile;

/// Target number of element positions per tile for restartable tasks. The tiling of a restartable
/// task depends only on its domain, never on the number of workers.
const RESTARTABLE_TILE_ELEMENTS: NonZero<usize> = nz!(1024);

/// Number of tiles per worker for tasks that are not restartable. More than one tile per worker
/// lets idle workers pick up slack when tiles take uneven time.
const TILES_PER_WORKER: NonZero<usize> = nz!(4);

/// Partitioning of a two-dimensional domain into a grid of disjoint rectangular tiles.
///
/// The grid consists of `rows` horizontal bands, each split into `columns` tiles. Along each axis,
/// every tile has the same extent except the last one, which also absorbs any remainder. Tiles are
/// enumerated in row-major order.
///
/// The tiles of a grid cover `[0, width) × [0, height)` exactly once. An empty domain (zero width
/// or zero height) has no tiles at all.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use tile_processor::TileGrid;
///
/// // Restartable tasks are tiled the same way regardless of the number of workers.
/// let one_worker = TileGrid::plan(123, 47, nz!(1), true);
/// let four_workers = TileGrid::plan(123, 47, nz!(4), true);
/// assert_eq!(one_worker, four_workers);
///
/// let covered: usize = one_worker.tiles(nz!(1)).map(|tile| tile.area()).sum();
/// assert_eq!(covered, 123 * 47);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    columns: usize,
    rows: usize,
}

impl TileGrid {
    /// Plans the tiling of a `width × height` domain for processing by `worker_count` workers.
    ///
    /// For restartable tasks the tiling depends only on the domain size, so the same domain is
    /// always split the same way no matter how many workers process it. For other tasks the number
    /// of tiles scales with the number of workers.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` does not fit in `usize`.
    #[must_use]
    pub fn plan(width: usize, height: usize, worker_count: NonZero<usize>, restartable: bool) -> Self {
        if width == 0 || height == 0 {
            return Self {
                width,
                height,
                columns: 0,
                rows: 0,
            };
        }

        let area = width
            .checked_mul(height)
            .expect("task domain area must fit in usize");

        let target_tiles = if restartable {
            area.div_ceil(RESTARTABLE_TILE_ELEMENTS.get())
        } else {
            worker_count.get().saturating_mul(TILES_PER_WORKER.get())
        };

        // Every tile must contain at least one element position.
        let target_tiles = target_tiles.clamp(1, area);

        // Row bands first, then split each band into columns if there are not enough rows.
        let rows = height.min(target_tiles);
        let columns = width.min(target_tiles.div_ceil(rows));

        Self {
            width,
            height,
            columns,
            rows,
        }
    }

    /// Width of the partitioned domain.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of the partitioned domain.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of tiles along the horizontal axis.
    #[must_use]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of tiles along the vertical axis.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Total number of tiles in the grid.
    #[must_use]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "columns and rows are bounded by width and height, whose product fits in usize"
    )]
    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    /// Whether the grid has no tiles, which is the case for an empty domain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the tile at `index` in row-major order, or `None` if the index is out of bounds.
    #[must_use]
    #[expect(
        clippy::integer_division,
        clippy::arithmetic_side_effects,
        reason = "index is checked against len, which is non-zero here so columns is too"
    )]
    pub fn tile(&self, index: usize, vector_width: NonZero<usize>) -> Option<Tile> {
        if index >= self.len() {
            return None;
        }

        let column = index % self.columns;
        let row = index / self.columns;

        Some(Tile::new(
            split_axis(self.width, self.columns, column),
            split_axis(self.height, self.rows, row),
            vector_width,
        ))
    }

    /// Iterates over all tiles of the grid in row-major order.
    pub fn tiles(self, vector_width: NonZero<usize>) -> impl ExactSizeIterator<Item = Tile> {
        (0..self.len()).map(move |index| {
            self.tile(index, vector_width)
                .expect("index is always within bounds because we iterate up to len")
        })
    }
}

/// Returns the `index`-th of `parts` consecutive ranges that together make up `0..length`.
///
/// Every range has `length / parts` elements except the last, which also absorbs the remainder.
#[expect(
    clippy::integer_division,
    clippy::arithmetic_side_effects,
    reason = "parts is non-zero and not greater than length, index is less than parts"
)]
fn split_axis(length: usize, parts: usize, index: usize) -> Range<usize> {
    debug_assert!(parts > 0 && parts <= length);
    debug_assert!(index < parts);

    let base = length / parts;
    let start = index * base;

    let end = if index == parts - 1 {
        length
    } else {
        start + base
    };

    start..end
}
