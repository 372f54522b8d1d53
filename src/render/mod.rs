//! Tile production.
//!
//! - [`source`]: the renderer and region-listing interfaces
//! - [`scheduler`]: the worker pool rendering level-0 tiles
//! - [`ticker`]: periodic pyramid refresh and cache eviction
//! - [`debug`]: a data-free renderer for tests and the CLI

pub mod debug;
pub mod scheduler;
pub mod source;
pub mod ticker;

pub use debug::{DebugChunk, DebugRenderer};
pub use scheduler::{RenderEvent, RenderScheduler, RenderStatus};
pub use source::{
    parse_region_file_name, RegionDirectory, RegionRender, RegionRenderer, RegionSource,
};
pub use ticker::{refresh_once, MaintenanceTicker, View, ViewHandle};
