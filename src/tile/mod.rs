//! Tile primitives.
//!
//! This module holds everything about a single tile that does not depend on
//! shared state:
//!
//! - [`coord`]: addresses and parent/child navigation across zoom levels
//! - [`raster`]: the fixed-size RGBA buffer every tile carries
//! - [`transform`]: downsample/upsample between adjacent levels
//! - [`state`]: the lock-free production state machine
//!
//! # Example
//!
//! ```
//! use blockmap_tiles::tile::{downsample, upsample, Quadrant, TileImage, TilePosition};
//! use image::Rgba;
//!
//! let pos = TilePosition::new(3, -2);
//! for child in pos.finer() {
//!     assert_eq!(child.coarser(), pos);
//! }
//!
//! let solid = TileImage::filled(Rgba([40, 120, 200, 255]));
//! let parent = downsample(Some(&solid), Some(&solid), Some(&solid), Some(&solid));
//! assert!(parent == solid);
//! assert!(upsample(&parent, Quadrant::TopLeft) == solid);
//! ```

pub mod coord;
pub mod raster;
pub mod state;
pub mod transform;

pub use coord::{Frustum, Quadrant, TileAddress, TilePosition, ZoomLevel, MAX_ZOOM_DEPTH};
pub use raster::{TileImage, TILE_SIZE, TRANSPARENT};
pub use state::{AtomicTileState, Completion, TileState};
pub use transform::{downsample, magnify, upsample};
