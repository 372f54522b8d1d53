//! Pure image transforms between adjacent zoom levels.
//!
//! - [`downsample`] merges four tiles of level `n` into one tile of level `n + 1`.
//! - [`upsample`] magnifies one quadrant of a tile of level `n` into a full
//!   tile of level `n - 1`.
//!
//! # Alpha handling
//!
//! Downsampling averages each 2×2 block with straight (non-premultiplied)
//! alpha weighting:
//!
//! ```text
//! alpha = (a1 + a2 + a3 + a4) / 4
//! color = (c1·a1 + c2·a2 + c3·a3 + c4·a4) / 255 / 4
//! ```
//!
//! The colour term is not renormalised by the total alpha, so partially
//! transparent blocks come out slightly darker than physically correct
//! compositing would give. This is the accepted approximation for map
//! overviews; opaque blocks are averaged exactly.

use image::Rgba;

use super::coord::{Quadrant, TilePosition};
use super::raster::{TileImage, TILE_SIZE, TRANSPARENT};

const HALF: u32 = TILE_SIZE / 2;

/// Merge four same-level tiles into one tile of the next coarser level.
///
/// Missing inputs are treated as fully transparent.
pub fn downsample(
    top_left: Option<&TileImage>,
    top_right: Option<&TileImage>,
    bottom_left: Option<&TileImage>,
    bottom_right: Option<&TileImage>,
) -> TileImage {
    let sources = [top_left, top_right, bottom_left, bottom_right];
    TileImage::from_fn(|x, y| {
        let quadrant = (((y >= HALF) as usize) << 1) | ((x >= HALF) as usize);
        match sources[quadrant] {
            Some(source) => sample_block(source, (x % HALF) * 2, (y % HALF) * 2),
            None => TRANSPARENT,
        }
    })
}

/// Alpha-weighted average of the 2×2 block whose top-left pixel is `(x, y)`.
fn sample_block(source: &TileImage, x: u32, y: u32) -> Rgba<u8> {
    let block = [
        source.pixel(x, y),
        source.pixel(x + 1, y),
        source.pixel(x, y + 1),
        source.pixel(x + 1, y + 1),
    ];

    let alpha_sum: u32 = block.iter().map(|p| p[3] as u32).sum();
    let channel = |c: usize| -> u8 {
        let weighted: u32 = block.iter().map(|p| p[c] as u32 * p[3] as u32).sum();
        ((weighted / 255) >> 2).min(255) as u8
    };

    Rgba([channel(0), channel(1), channel(2), (alpha_sum >> 2) as u8])
}

/// Magnify one quadrant of `source` to a full tile of the next finer level.
///
/// Nearest-neighbour: every source pixel becomes a 2×2 block.
pub fn upsample(source: &TileImage, quadrant: Quadrant) -> TileImage {
    let (qx, qy) = quadrant.offset();
    magnify(source, 1, TilePosition::new(qx, qy))
}

/// Magnify the `sub_tile` of `source` by `2^level_diff`.
///
/// `sub_tile` indexes the `2^level_diff × 2^level_diff` grid of sub-tiles in
/// `source`; coordinates outside that grid wrap into it.
pub fn magnify(source: &TileImage, level_diff: u32, sub_tile: TilePosition) -> TileImage {
    let level_diff = level_diff.min(TILE_SIZE.trailing_zeros());
    let scale = 1u32 << level_diff;
    let span = TILE_SIZE / scale;
    let mask = scale as i32 - 1;
    let origin_x = (sub_tile.x & mask) as u32 * span;
    let origin_y = (sub_tile.y & mask) as u32 * span;

    TileImage::from_fn(|x, y| source.pixel(origin_x + x / scale, origin_y + y / scale))
}
