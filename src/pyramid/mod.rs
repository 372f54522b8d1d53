//! The tile pyramid.
//!
//! [`TileRegistry`] maps every zoom level to its tiles, owns the
//! [`TileStore`](crate::cache::TileStore) holding their images, and tracks how
//! many level-0 tiles have been rendered. [`Tile`] is one registry entry.

pub mod registry;
pub mod tile;

pub use registry::{LevelMap, TileRegistry};
pub use tile::Tile;
