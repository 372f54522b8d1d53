//! Configuration for the tile pyramid and the `blockmap-tiles` binary.
//!
//! The library is configured through [`PyramidConfig`], a plain struct with
//! defaults for every field. The binary builds one from command-line flags
//! and environment variables with the `BLOCKMAP_` prefix:
//!
//! - `BLOCKMAP_WORKERS` - Render worker count (default: 4)
//! - `BLOCKMAP_PRIMARY_CACHE` - Level <= 0 fast-tier entries (default: 1024)
//! - `BLOCKMAP_DERIVED_CACHE` - Level > 0 tier entries (default: 512)
//! - `BLOCKMAP_REFRESH_MS` - Pyramid refresh interval in ms (default: 1000)
//! - `BLOCKMAP_REFRESH_BATCH` - Max tiles re-derived per refresh (default: 10)
//!
//! # Example
//!
//! ```
//! use blockmap_tiles::config::PyramidConfig;
//!
//! let config = PyramidConfig {
//!     worker_count: 2,
//!     ..PyramidConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::{
    StoreConfig, TierConfig, DEFAULT_DERIVED_CAPACITY, DEFAULT_EXPIRE_AFTER_CREATE,
    DEFAULT_EXPIRE_AFTER_READ, DEFAULT_EXPIRE_AFTER_UPDATE, DEFAULT_PRIMARY_CAPACITY,
};
use crate::error::ConfigError;

// =============================================================================
// Default Values
// =============================================================================

/// Default number of render workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default pyramid refresh interval.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Default maximum number of tiles re-derived per refresh tick.
pub const DEFAULT_REFRESH_BATCH: usize = 10;

/// Default cache eviction interval.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(10);

/// Default pause of a worker after a failed render.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default number of attempts to claim the nearest tile before yielding.
pub const DEFAULT_MAX_CLAIM_ATTEMPTS: usize = 8;

// =============================================================================
// PyramidConfig
// =============================================================================

/// Tunables of the cache, the render workers and the maintenance ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidConfig {
    pub worker_count: usize,
    pub primary_capacity: u64,
    pub derived_capacity: u64,
    pub expire_after_create: Duration,
    pub expire_after_update: Duration,
    pub expire_after_read: Duration,
    pub refresh_interval: Duration,
    pub refresh_batch: usize,
    pub eviction_interval: Duration,
    pub retry_delay: Duration,
    pub max_claim_attempts: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            primary_capacity: DEFAULT_PRIMARY_CAPACITY,
            derived_capacity: DEFAULT_DERIVED_CAPACITY,
            expire_after_create: DEFAULT_EXPIRE_AFTER_CREATE,
            expire_after_update: DEFAULT_EXPIRE_AFTER_UPDATE,
            expire_after_read: DEFAULT_EXPIRE_AFTER_READ,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_batch: DEFAULT_REFRESH_BATCH,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_claim_attempts: DEFAULT_MAX_CLAIM_ATTEMPTS,
        }
    }
}

impl PyramidConfig {
    /// Check that every count and interval is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("worker_count", self.worker_count as u64),
            ("primary_capacity", self.primary_capacity),
            ("derived_capacity", self.derived_capacity),
            ("refresh_batch", self.refresh_batch as u64),
            ("max_claim_attempts", self.max_claim_attempts as u64),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        let intervals = [
            ("expire_after_create", self.expire_after_create),
            ("expire_after_update", self.expire_after_update),
            ("expire_after_read", self.expire_after_read),
            ("refresh_interval", self.refresh_interval),
            ("eviction_interval", self.eviction_interval),
        ];
        for (field, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Zero { field });
            }
        }

        Ok(())
    }

    /// Cache tier settings derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        let tier = |capacity| TierConfig {
            capacity,
            expire_after_create: self.expire_after_create,
            expire_after_update: self.expire_after_update,
            expire_after_read: self.expire_after_read,
        };
        StoreConfig {
            primary: tier(self.primary_capacity),
            derived: tier(self.derived_capacity),
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// blockmap-tiles - render a voxel world into a zoomable tile pyramid.
#[derive(Parser, Debug, Clone)]
#[command(name = "blockmap-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render every region of a world and write the pyramid as PNG files.
    Render(RenderConfig),

    /// Validate the configuration and list the regions of a world.
    Check(CheckConfig),
}

/// Pyramid tunables shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct PyramidArgs {
    /// Number of render workers.
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT, env = "BLOCKMAP_WORKERS")]
    pub workers: usize,

    /// Entry bound of the level <= 0 memory tier.
    #[arg(long, default_value_t = DEFAULT_PRIMARY_CAPACITY, env = "BLOCKMAP_PRIMARY_CACHE")]
    pub primary_cache: u64,

    /// Entry bound of the level > 0 memory tier.
    #[arg(long, default_value_t = DEFAULT_DERIVED_CAPACITY, env = "BLOCKMAP_DERIVED_CACHE")]
    pub derived_cache: u64,

    /// Pyramid refresh interval in milliseconds.
    #[arg(long, default_value_t = 1000, env = "BLOCKMAP_REFRESH_MS")]
    pub refresh_ms: u64,

    /// Maximum number of tiles re-derived per refresh tick.
    #[arg(long, default_value_t = DEFAULT_REFRESH_BATCH, env = "BLOCKMAP_REFRESH_BATCH")]
    pub refresh_batch: usize,
}

impl PyramidArgs {
    pub fn to_config(&self) -> PyramidConfig {
        PyramidConfig {
            worker_count: self.workers,
            primary_capacity: self.primary_cache,
            derived_capacity: self.derived_cache,
            refresh_interval: Duration::from_millis(self.refresh_ms),
            refresh_batch: self.refresh_batch,
            ..PyramidConfig::default()
        }
    }
}

/// Output format for the render summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum SummaryFormat {
    #[default]
    Text,
    Json,
}

/// Arguments of the `render` subcommand.
#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    /// Directory containing `r.<x>.<z>.mca` region files.
    #[arg(long, env = "BLOCKMAP_WORLD")]
    pub world: PathBuf,

    /// Output directory for `<level>/<x>_<z>.png` tiles.
    #[arg(long)]
    pub out: PathBuf,

    /// Number of coarser levels to derive above level 0.
    #[arg(long, default_value_t = 0)]
    pub zoom_out: u32,

    /// Summary output format.
    #[arg(long, value_enum, default_value_t = SummaryFormat::Text)]
    pub format: SummaryFormat,

    #[command(flatten)]
    pub pyramid: PyramidArgs,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<PyramidConfig, ConfigError> {
        if self.zoom_out > crate::tile::MAX_ZOOM_DEPTH as u32 {
            return Err(ConfigError::Invalid(format!(
                "zoom_out must be at most {}",
                crate::tile::MAX_ZOOM_DEPTH
            )));
        }
        let config = self.pyramid.to_config();
        config.validate()?;
        Ok(config)
    }
}

/// Arguments of the `check` subcommand.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Directory containing `r.<x>.<z>.mca` region files.
    #[arg(long, env = "BLOCKMAP_WORLD")]
    pub world: PathBuf,

    #[command(flatten)]
    pub pyramid: PyramidArgs,
}

// =============================================================================
// Tests
// =============================================================================
