//! # blockmap-tiles
//!
//! Tile pyramid cache and background render scheduler for zoomable maps of
//! large, sparse voxel worlds.
//!
//! Each region of the world is rendered into one 512×512 level-0 tile by an
//! external renderer. Coarser zoom levels are derived by downsampling 2×2
//! blocks of finer tiles, finer levels by magnifying one quadrant of a
//! coarser tile. This crate decides which tiles exist, which are stale, where
//! their images are cached, and which region to render next.
//!
//! ## Features
//!
//! - **Lazy pyramid**: zoom levels are materialized on first access
//! - **Tiered cache**: bounded, expiring memory tiers with a compressed
//!   overflow tier for evicted level-0 tiles
//! - **Exactly one producer per tile**: lock-free state machine that turns an
//!   invalidation during rendering into one more render pass
//! - **Focus-driven scheduling**: workers render the region nearest to the
//!   point of interest first
//!
//! ## Architecture
//!
//! - [`tile`] - Addresses, raster buffers, transforms, state machine
//! - [`cache`] - Memory, overflow and derived cache tiers
//! - [`pyramid`] - The tile registry
//! - [`render`] - Renderer interfaces, scheduler, maintenance ticker
//! - [`config`] - Tunables and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blockmap_tiles::{DebugRenderer, PyramidConfig, RenderScheduler, TilePosition, TileRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PyramidConfig::default();
//!     let registry = Arc::new(TileRegistry::new(config.store_config()));
//!     let scheduler = RenderScheduler::new(registry, Arc::new(DebugRenderer::new()), config);
//!
//!     scheduler.start();
//!     scheduler.reload([TilePosition::new(0, 0), TilePosition::new(1, 0)]).await;
//!     scheduler.wait_until_settled().await;
//!     scheduler.close().await;
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod pyramid;
pub mod render;
pub mod tile;

// Re-export commonly used types
pub use cache::{CacheStats, StoreConfig, TierConfig, TileStore};
pub use config::{CheckConfig, Cli, Command, PyramidConfig, RenderConfig, SummaryFormat};
pub use error::{ConfigError, ImageError, PyramidError, RenderError, SourceError};
pub use pyramid::{LevelMap, Tile, TileRegistry};
pub use render::{
    DebugChunk, DebugRenderer, MaintenanceTicker, RegionDirectory, RegionRender, RegionRenderer,
    RegionSource, RenderEvent, RenderScheduler, RenderStatus, View, ViewHandle,
};
pub use tile::{
    downsample, upsample, Frustum, Quadrant, TileAddress, TileImage, TilePosition, TileState,
    ZoomLevel, MAX_ZOOM_DEPTH, TILE_SIZE,
};
