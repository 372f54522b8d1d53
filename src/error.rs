use thiserror::Error;

use crate::tile::{TilePosition, ZoomLevel};

/// Addressing errors raised by the tile registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PyramidError {
    /// A level-0 position that was never part of the region listing
    #[error("Unknown level-0 position: {position}")]
    UnknownPosition { position: TilePosition },

    /// Requested zoom level is deeper than the pyramid supports
    #[error("Zoom level {level} out of range (max depth {max})")]
    LevelOutOfRange { level: ZoomLevel, max: i32 },
}

/// Errors reported by an external region renderer.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The renderer could not produce an image for this region
    #[error("Failed to render region {position}: {message}")]
    Region {
        position: TilePosition,
        message: String,
    },

    /// I/O error while reading region data
    #[error("I/O error: {0}")]
    Io(String),

    /// The produced image is not a valid tile
    #[error("Invalid tile image: {0}")]
    Image(#[from] ImageError),

    /// Rendering was abandoned because the scheduler is shutting down
    #[error("Render cancelled")]
    Cancelled,
}

/// Errors related to tile raster buffers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Buffer does not have the fixed tile dimensions
    #[error("Invalid tile dimensions: expected {expected}x{expected}, got {width}x{height}")]
    Dimensions {
        width: u32,
        height: u32,
        expected: u32,
    },

    /// Encoding a tile for the overflow tier failed
    #[error("Failed to encode tile: {0}")]
    Encode(String),

    /// Decoding a tile from the overflow tier failed
    #[error("Failed to decode tile: {0}")]
    Decode(String),
}

/// Errors that can occur while listing regions of a world.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Directory could not be read
    #[error("I/O error: {0}")]
    Io(String),

    /// The world location does not exist or is not a directory
    #[error("Not a region directory: {0}")]
    NotADirectory(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Io(err.to_string())
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than 0")]
    Zero { field: &'static str },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
