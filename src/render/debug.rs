//! A region renderer that needs no world data.
//!
//! Every region is painted a flat colour derived from its position, with a
//! darker line along each chunk border (16×16 pixels per chunk, 32×32 chunks
//! per region). Useful to exercise the pyramid without a real world renderer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::Rgba;
use serde::Serialize;

use crate::error::RenderError;
use crate::tile::{TileImage, TilePosition, TILE_SIZE};

use super::source::{RegionRender, RegionRenderer};

/// Chunks along one side of a region.
pub const CHUNKS_PER_REGION: u32 = 32;

/// Pixels along one side of a chunk.
pub const CHUNK_PIXELS: u32 = TILE_SIZE / CHUNKS_PER_REGION;

/// Metadata the debug renderer attaches to every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DebugChunk {
    /// Region the chunk belongs to
    pub region: TilePosition,
    /// Brightness offset applied to this chunk
    pub shade: u8,
}

/// Renders flat-coloured regions with chunk grid lines.
#[derive(Debug, Default)]
pub struct DebugRenderer {
    delay: Duration,
    renders: AtomicUsize,
}

impl DebugRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every render, to simulate a slow renderer.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            renders: AtomicUsize::new(0),
        }
    }

    /// Number of renders performed so far.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    /// Base colour of a region.
    pub fn region_color(position: TilePosition) -> Rgba<u8> {
        let hash = (position.x as u32)
            .wrapping_mul(73_856_093)
            ^ (position.y as u32).wrapping_mul(19_349_663);
        Rgba([
            64 + (hash & 0x7f) as u8,
            64 + ((hash >> 8) & 0x7f) as u8,
            64 + ((hash >> 16) & 0x7f) as u8,
            255,
        ])
    }

    fn chunk_shade(chunk_x: u32, chunk_z: u32) -> u8 {
        if (chunk_x + chunk_z) % 2 == 0 {
            0
        } else {
            16
        }
    }

    fn paint(position: TilePosition) -> TileImage {
        let base = Self::region_color(position);
        TileImage::from_fn(|x, y| {
            if x % CHUNK_PIXELS == 0 || y % CHUNK_PIXELS == 0 {
                return Rgba([base[0] / 2, base[1] / 2, base[2] / 2, 255]);
            }
            let shade = Self::chunk_shade(x / CHUNK_PIXELS, y / CHUNK_PIXELS);
            Rgba([
                base[0].saturating_add(shade),
                base[1].saturating_add(shade),
                base[2].saturating_add(shade),
                255,
            ])
        })
    }
}

#[async_trait]
impl RegionRenderer for DebugRenderer {
    type Metadata = DebugChunk;

    async fn render(&self, position: TilePosition) -> Result<RegionRender<DebugChunk>, RenderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let image = tokio::task::spawn_blocking(move || Self::paint(position))
            .await
            .map_err(|e| RenderError::Region {
                position,
                message: e.to_string(),
            })?;

        let side = CHUNKS_PER_REGION as i32;
        let mut chunks = HashMap::with_capacity((CHUNKS_PER_REGION * CHUNKS_PER_REGION) as usize);
        for cz in 0..CHUNKS_PER_REGION {
            for cx in 0..CHUNKS_PER_REGION {
                let chunk = TilePosition::new(
                    position.x * side + cx as i32,
                    position.y * side + cz as i32,
                );
                chunks.insert(
                    chunk,
                    DebugChunk {
                        region: position,
                        shade: Self::chunk_shade(cx, cz),
                    },
                );
            }
        }

        self.renders.fetch_add(1, Ordering::Relaxed);
        Ok(RegionRender::new(image).with_metadata(chunks))
    }
}
