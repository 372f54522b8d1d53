//! Fixed-size RGBA tile buffers.
//!
//! Every tile in the pyramid is a [`TILE_SIZE`]×[`TILE_SIZE`] RGBA image,
//! regardless of zoom level. Images are immutable once built and shared as
//! `Arc<TileImage>`; the registry owns them and callers only get read access.
//!
//! The overflow cache tier keeps tiles PNG-encoded, so this module also
//! provides the lossless encode/decode pair.

use std::fmt;
use std::io::Cursor;

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageReader, Rgba, RgbaImage};

use crate::error::ImageError;

/// Edge length of every tile, in pixels.
pub const TILE_SIZE: u32 = 512;

/// A fully transparent pixel.
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// =============================================================================
// TileImage
// =============================================================================

/// One tile worth of pixels.
#[derive(Clone, PartialEq)]
pub struct TileImage {
    pixels: RgbaImage,
}

impl TileImage {
    /// A fully transparent tile.
    pub fn transparent() -> Self {
        Self::filled(TRANSPARENT)
    }

    /// A tile where every pixel has the same colour.
    pub fn filled(color: Rgba<u8>) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, color),
        }
    }

    /// Build a tile pixel by pixel.
    pub fn from_fn(f: impl FnMut(u32, u32) -> Rgba<u8>) -> Self {
        Self {
            pixels: RgbaImage::from_fn(TILE_SIZE, TILE_SIZE, f),
        }
    }

    /// Wrap an existing RGBA buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Dimensions`] unless the buffer is exactly
    /// `TILE_SIZE` × `TILE_SIZE`.
    pub fn from_rgba(pixels: RgbaImage) -> Result<Self, ImageError> {
        let (width, height) = pixels.dimensions();
        if width != TILE_SIZE || height != TILE_SIZE {
            return Err(ImageError::Dimensions {
                width,
                height,
                expected: TILE_SIZE,
            });
        }
        Ok(Self { pixels })
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    /// Read-only access to the underlying buffer.
    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_rgba(self) -> RgbaImage {
        self.pixels
    }

    /// `true` if every pixel has zero alpha.
    pub fn is_transparent(&self) -> bool {
        self.pixels.pixels().all(|p| p[3] == 0)
    }

    /// Approximate heap size of the pixel data.
    pub fn byte_size(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// Encode losslessly as PNG.
    pub fn encode_png(&self) -> Result<Bytes, ImageError> {
        let mut output = Vec::new();
        PngEncoder::new(&mut output)
            .write_image(
                self.pixels.as_raw(),
                TILE_SIZE,
                TILE_SIZE,
                ExtendedColorType::Rgba8,
            )
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(Bytes::from(output))
    }

    /// Decode a tile previously produced by [`TileImage::encode_png`].
    pub fn decode_png(data: &[u8]) -> Result<Self, ImageError> {
        let reader = ImageReader::with_format(Cursor::new(data), image::ImageFormat::Png);
        let decoded = reader
            .decode()
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        Self::from_rgba(decoded.to_rgba8())
    }
}

impl fmt::Debug for TileImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileImage")
            .field("size", &TILE_SIZE)
            .field("transparent", &self.is_transparent())
            .finish()
    }
}

impl Default for TileImage {
    fn default() -> Self {
        Self::transparent()
    }
}
