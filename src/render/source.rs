//! Interfaces to the world: which regions exist, and how one is rendered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RenderError, SourceError};
use crate::tile::{TileImage, TilePosition};

/// Output of one region render.
#[derive(Debug, Clone)]
pub struct RegionRender<M> {
    /// Level-0 tile image of the region
    pub image: TileImage,
    /// Renderer-defined metadata per chunk, keyed by chunk position
    pub chunk_metadata: HashMap<TilePosition, M>,
}

impl<M> RegionRender<M> {
    pub fn new(image: TileImage) -> Self {
        Self {
            image,
            chunk_metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, chunk_metadata: HashMap<TilePosition, M>) -> Self {
        self.chunk_metadata = chunk_metadata;
        self
    }
}

/// Renders a region into a level-0 tile.
///
/// Implementations may be slow. They are called concurrently for different
/// positions but never twice at once for the same position.
#[async_trait]
pub trait RegionRenderer: Send + Sync + 'static {
    /// Per-chunk metadata attached to each render.
    type Metadata: Clone + Send + Sync + 'static;

    async fn render(
        &self,
        position: TilePosition,
    ) -> Result<RegionRender<Self::Metadata>, RenderError>;
}

/// Lists the regions of a world.
#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn list_regions(&self) -> Result<Vec<TilePosition>, SourceError>;
}

// =============================================================================
// RegionDirectory
// =============================================================================

/// Region listing backed by a directory of `r.<x>.<z>.mca` files.
///
/// Only file names are inspected; other files are ignored.
#[derive(Debug, Clone)]
pub struct RegionDirectory {
    path: PathBuf,
}

impl RegionDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse a region file name of the form `r.<x>.<z>.mca`.
pub fn parse_region_file_name(name: &str) -> Option<TilePosition> {
    let rest = name.strip_prefix("r.")?.strip_suffix(".mca")?;
    let (x, z) = rest.split_once('.')?;
    Some(TilePosition::new(x.parse().ok()?, z.parse().ok()?))
}

#[async_trait]
impl RegionSource for RegionDirectory {
    async fn list_regions(&self) -> Result<Vec<TilePosition>, SourceError> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_dir() {
            return Err(SourceError::NotADirectory(self.path.display().to_string()));
        }

        let mut entries = tokio::fs::read_dir(&self.path).await?;
        let mut positions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            match name.to_str().and_then(parse_region_file_name) {
                Some(position) => positions.push(position),
                None => debug!(file = ?name, "Skipping non-region file"),
            }
        }
        positions.sort();
        Ok(positions)
    }
}

/// A fixed list of regions.
#[async_trait]
impl RegionSource for Vec<TilePosition> {
    async fn list_regions(&self) -> Result<Vec<TilePosition>, SourceError> {
        Ok(self.clone())
    }
}
