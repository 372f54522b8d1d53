//! Tile image caching.
//!
//! - [`tier`]: bounded, expiring in-memory tiers (`moka`)
//! - [`overflow`]: unbounded PNG-compressed tier for evicted level-0 tiles
//! - [`store`]: [`TileStore`], which routes addresses to tiers and tracks
//!   which tiles currently live only in the overflow tier

pub mod overflow;
pub mod store;
pub mod tier;

pub use overflow::OverflowTier;
pub use store::{CacheStats, StoreConfig, TileStore, DEFAULT_DERIVED_CAPACITY, DEFAULT_PRIMARY_CAPACITY};
pub use tier::{
    MemoryTier, Spill, TierConfig, DEFAULT_EXPIRE_AFTER_CREATE, DEFAULT_EXPIRE_AFTER_READ,
    DEFAULT_EXPIRE_AFTER_UPDATE,
};
