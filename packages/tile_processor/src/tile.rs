use std::num::NonZero;
use std::ops::Range;

/// A rectangular region of a [`Task`][crate::Task] domain, delivered to a
/// [`TileCallback`][crate::TileCallback] as one unit of work.
///
/// The region is half-open: it covers `[start_x, end_x) × [start_y, end_y)`. Tiles produced for
/// one task never overlap and together cover the entire task domain exactly once.
///
/// The tile also carries the vector width of the task it belongs to. The processor does not
/// interpret this value in any way, it is merely passed through to the callback.
///
/// # Example
///
/// ```
/// use tile_processor::TileGrid;
/// use new_zealand::nz;
///
/// let grid = TileGrid::plan(100, 10, nz!(2), true);
///
/// for tile in grid.tiles(nz!(4)) {
///     for y in tile.y_range() {
///         for x in tile.x_range() {
///             assert!(tile.contains(x, y));
///         }
///     }
///
///     assert_eq!(tile.vector_width().get(), 4);
/// }
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Tile {
    start_x: usize,
    start_y: usize,
    end_x: usize,
    end_y: usize,
    vector_width: NonZero<usize>,
}

impl Tile {
    pub(crate) fn new(
        x_range: Range<usize>,
        y_range: Range<usize>,
        vector_width: NonZero<usize>,
    ) -> Self {
        debug_assert!(x_range.start < x_range.end);
        debug_assert!(y_range.start < y_range.end);

        Self {
            start_x: x_range.start,
            start_y: y_range.start,
            end_x: x_range.end,
            end_y: y_range.end,
            vector_width,
        }
    }

    /// First column covered by the tile.
    #[must_use]
    pub fn start_x(&self) -> usize {
        self.start_x
    }

    /// First row covered by the tile.
    #[must_use]
    pub fn start_y(&self) -> usize {
        self.start_y
    }

    /// One past the last column covered by the tile.
    #[must_use]
    pub fn end_x(&self) -> usize {
        self.end_x
    }

    /// One past the last row covered by the tile.
    #[must_use]
    pub fn end_y(&self) -> usize {
        self.end_y
    }

    /// The number of scalar lanes per element position, as specified on the task.
    #[must_use]
    pub fn vector_width(&self) -> NonZero<usize> {
        self.vector_width
    }

    /// Number of columns covered by the tile. Never zero.
    #[must_use]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "end is always greater than start, guarded in constructor"
    )]
    pub fn width(&self) -> usize {
        self.end_x - self.start_x
    }

    /// Number of rows covered by the tile. Never zero.
    #[must_use]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "end is always greater than start, guarded in constructor"
    )]
    pub fn height(&self) -> usize {
        self.end_y - self.start_y
    }

    /// Number of element positions covered by the tile.
    #[must_use]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "a tile never exceeds its task domain, whose area fits in usize"
    )]
    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// The columns covered by the tile.
    #[must_use]
    pub fn x_range(&self) -> Range<usize> {
        self.start_x..self.end_x
    }

    /// The rows covered by the tile.
    #[must_use]
    pub fn y_range(&self) -> Range<usize> {
        self.start_y..self.end_y
    }

    /// Whether the element position `(x, y)` lies within the tile.
    #[must_use]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.x_range().contains(&x) && self.y_range().contains(&y)
    }
}
