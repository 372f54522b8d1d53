//! Tile addressing across zoom levels.
//!
//! Level 0 holds one tile per region. Each positive level halves the
//! resolution (a 2×2 block of the finer level becomes one tile), each negative
//! level doubles it (one tile of the coarser level splits into a 2×2 block).
//!
//! ```text
//!   level +1        (0,0)
//!                  ┌──────┐
//!                  │      │
//!                  └──────┘
//!                 ╱        ╲
//!   level 0   (0,0) (1,0)
//!             (0,1) (1,1)
//! ```
//!
//! Coordinates are plain `i32`. Shifting positions near `i32::MIN`/`i32::MAX`
//! wraps silently; worlds that large are not representable anyway.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Signed zoom level. 0 is native resolution, positive is zoomed out.
pub type ZoomLevel = i32;

/// Maximum distance from level 0 that the pyramid will materialize.
pub const MAX_ZOOM_DEPTH: i32 = 16;

// =============================================================================
// TilePosition
// =============================================================================

/// Integer tile coordinate, meaningful only together with a [`ZoomLevel`].
///
/// Ordering is by `x`, then `y`. The scheduler relies on this to break
/// distance ties deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TilePosition {
    pub x: i32,
    pub y: i32,
}

impl TilePosition {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The position one level coarser (arithmetic shift right by one).
    pub fn coarser(self) -> Self {
        Self::new(self.x >> 1, self.y >> 1)
    }

    /// The four positions one level finer, in [`Quadrant::ALL`] order.
    pub fn finer(self) -> [Self; 4] {
        let base = Self::new(self.x << 1, self.y << 1);
        Quadrant::ALL.map(|q| {
            let (dx, dy) = q.offset();
            Self::new(base.x + dx, base.y + dy)
        })
    }

    /// The position `levels` steps coarser.
    pub fn ancestor(self, levels: u32) -> Self {
        let shift = levels.min(31);
        Self::new(self.x >> shift, self.y >> shift)
    }

    /// Which quadrant of its coarser tile this position occupies.
    pub fn quadrant(self) -> Quadrant {
        match (self.x & 1, self.y & 1) {
            (0, 0) => Quadrant::TopLeft,
            (1, 0) => Quadrant::TopRight,
            (0, _) => Quadrant::BottomLeft,
            _ => Quadrant::BottomRight,
        }
    }

    /// Euclidean distance to a point in the same coordinate space.
    pub fn distance_to(self, x: f64, y: f64) -> f64 {
        let dx = self.x as f64 - x;
        let dy = self.y as f64 - y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for TilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for TilePosition {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

// =============================================================================
// Quadrant
// =============================================================================

/// One of the four finer tiles covering a coarser tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Quadrant {
    /// Canonical order used by [`TilePosition::finer`] and the image transforms.
    pub const ALL: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::TopRight,
        Quadrant::BottomLeft,
        Quadrant::BottomRight,
    ];

    /// Offset of this quadrant in units of finer tiles.
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Quadrant::TopLeft => (0, 0),
            Quadrant::TopRight => (1, 0),
            Quadrant::BottomLeft => (0, 1),
            Quadrant::BottomRight => (1, 1),
        }
    }
}

// =============================================================================
// TileAddress
// =============================================================================

/// A tile's full address: zoom level plus position on that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileAddress {
    pub level: ZoomLevel,
    pub position: TilePosition,
}

impl TileAddress {
    pub const fn new(level: ZoomLevel, position: TilePosition) -> Self {
        Self { level, position }
    }

    /// Shorthand for a level-0 address.
    pub const fn region(position: TilePosition) -> Self {
        Self::new(0, position)
    }

    pub fn coarser(self) -> Self {
        Self::new(self.level + 1, self.position.coarser())
    }

    pub fn finer(self) -> [Self; 4] {
        let level = self.level - 1;
        self.position.finer().map(|p| Self::new(level, p))
    }

    /// Area covered by this tile, in region units (level-0 tile = 1×1).
    pub fn bounds(self) -> Frustum {
        let size = 2f64.powi(self.level);
        let x = self.position.x as f64 * size;
        let y = self.position.y as f64 * size;
        Frustum::new(x, y, x + size, y + size)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}{}", self.level, self.position)
    }
}

// =============================================================================
// Frustum
// =============================================================================

/// Axis-aligned visible area in region units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frustum {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Frustum {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// A frustum that contains everything.
    pub fn everything() -> Self {
        Self::new(
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::INFINITY,
        )
    }

    /// Grow the frustum by `margin` region units on every side.
    pub fn expand(self, margin: f64) -> Self {
        Self::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }

    pub fn intersects(&self, other: &Frustum) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }
}
