//! Overflow tier for tiles pushed out of the primary memory tier.
//!
//! Entries are kept PNG-encoded, trading decode time for a much smaller
//! footprint than the raw RGBA buffers held by the fast tier. The tier has no
//! capacity bound and no expiry of its own; it is emptied only by
//! [`OverflowTier::clear`] (full reload) or when an entry is promoted back
//! into the fast tier.
//!
//! Nothing here survives the process.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::tile::{TileAddress, TileImage};

/// Compressed, unbounded store for evicted tiles.
#[derive(Default)]
pub struct OverflowTier {
    entries: DashMap<TileAddress, Bytes>,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl OverflowTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode and store a tile. Encoding failures drop the tile.
    pub fn store(&self, address: TileAddress, image: &TileImage) {
        match image.encode_png() {
            Ok(data) => {
                debug!(%address, bytes = data.len(), "Tile moved to overflow tier");
                self.entries.insert(address, data);
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(%address, error = %e, "Dropping tile that could not be encoded"),
        }
    }

    /// Decode a tile without removing it.
    pub fn load(&self, address: &TileAddress) -> Option<TileImage> {
        let data = self.entries.get(address)?.value().clone();
        self.decode(address, &data)
    }

    /// Remove and decode a tile.
    pub fn take(&self, address: &TileAddress) -> Option<TileImage> {
        let (_, data) = self.entries.remove(address)?;
        self.decode(address, &data)
    }

    fn decode(&self, address: &TileAddress, data: &[u8]) -> Option<TileImage> {
        match TileImage::decode_png(data) {
            Ok(image) => {
                self.reads.fetch_add(1, Ordering::Relaxed);
                Some(image)
            }
            Err(e) => {
                warn!(%address, error = %e, "Discarding corrupt overflow entry");
                self.entries.remove(address);
                None
            }
        }
    }

    /// Drop a tile (e.g. because a fresher copy was written to the fast tier).
    pub fn remove(&self, address: &TileAddress) -> bool {
        self.entries.remove(address).is_some()
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total encoded size of all entries.
    pub fn size_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// `(writes, reads)` since creation.
    pub fn transfer_counts(&self) -> (u64, u64) {
        (
            self.writes.load(Ordering::Relaxed),
            self.reads.load(Ordering::Relaxed),
        )
    }
}
