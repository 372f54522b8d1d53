//! Tiered tile store owned by one pyramid.
//!
//! ```text
//!   level <= 0                                level > 0
//!  ┌────────────────────┐                    ┌────────────────────┐
//!  │ primary (moka)     │                    │ derived (moka)     │
//!  │ 1024 entries, TTL  │                    │ 512 entries, TTL   │
//!  └─────────┬──────────┘                    └─────────┬──────────┘
//!            │ evicted (size/TTL)                      │ evicted
//!            ▼                                         ▼
//!  ┌────────────────────┐                          dropped
//!  │ overflow (PNG)     │◄── promoted back on get
//!  └────────────────────┘
//! ```
//!
//! Level-0 tiles come from the (slow) external renderer, so they are never
//! thrown away while the pyramid is loaded. Derived tiles are one transform
//! away from their sources and are simply dropped.
//!
//! The store never fails: a miss is `None`.

use std::sync::Arc;

use dashmap::DashSet;
use serde::Serialize;
use tracing::debug;

use crate::tile::{TileAddress, TileImage};

use super::overflow::OverflowTier;
use super::tier::{MemoryTier, Spill, TierConfig};

/// Default entry bound of the primary tier.
pub const DEFAULT_PRIMARY_CAPACITY: u64 = 1024;

/// Default entry bound of the derived tier.
pub const DEFAULT_DERIVED_CAPACITY: u64 = 512;

/// Configuration of a [`TileStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub primary: TierConfig,
    pub derived: TierConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            primary: TierConfig::with_capacity(DEFAULT_PRIMARY_CAPACITY),
            derived: TierConfig::with_capacity(DEFAULT_DERIVED_CAPACITY),
        }
    }
}

/// Snapshot of the store's size and traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub primary_entries: u64,
    pub derived_entries: u64,
    pub overflow_entries: usize,
    pub overflow_bytes: usize,
    /// Level <= 0 tiles currently living only in the overflow tier
    pub absent_from_fast: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub overflow_writes: u64,
    pub overflow_reads: u64,
}

// =============================================================================
// TileStore
// =============================================================================

/// Primary, overflow, and derived tiers plus the absent-from-fast-tier set.
pub struct TileStore {
    primary: MemoryTier,
    derived: MemoryTier,
    overflow: Arc<OverflowTier>,
    absent: Arc<DashSet<TileAddress>>,
}

impl TileStore {
    pub fn new(config: StoreConfig) -> Self {
        let overflow = Arc::new(OverflowTier::new());
        let absent = Arc::new(DashSet::new());
        let spill = Spill {
            overflow: Arc::clone(&overflow),
            absent: Arc::clone(&absent),
        };

        Self {
            primary: MemoryTier::new("primary", config.primary, Some(spill)),
            derived: MemoryTier::new("derived", config.derived, None),
            overflow,
            absent,
        }
    }

    fn tier(&self, address: &TileAddress) -> &MemoryTier {
        if address.level > 0 {
            &self.derived
        } else {
            &self.primary
        }
    }

    /// Look a tile up.
    ///
    /// A level <= 0 tile that was evicted into the overflow tier is decoded
    /// and promoted back into the primary tier. If a [`put`](Self::put) for the
    /// same address lands meanwhile, its image is kept and returned instead.
    pub async fn get(&self, address: &TileAddress) -> Option<Arc<TileImage>> {
        let tier = self.tier(address);
        if let Some(image) = tier.get(address).await {
            return Some(image);
        }
        if address.level > 0 {
            return None;
        }

        let image = Arc::new(self.overflow.take(address)?);
        self.absent.remove(address);
        debug!(%address, "Promoting tile from overflow tier");
        Some(self.primary.insert_if_absent(*address, image).await)
    }

    /// Insert or replace a tile in its fast tier.
    ///
    /// Any overflow copy is discarded and the address leaves the absent set.
    pub async fn put(&self, address: TileAddress, image: Arc<TileImage>) {
        self.tier(&address).put(address, image).await;
    }

    /// Whether the store holds the tile in any tier. Does not touch expiry.
    pub fn contains(&self, address: &TileAddress) -> bool {
        self.contains_fast(address) || self.contains_overflow(address)
    }

    pub fn contains_fast(&self, address: &TileAddress) -> bool {
        self.tier(address).contains(address)
    }

    pub fn contains_overflow(&self, address: &TileAddress) -> bool {
        address.level <= 0 && self.overflow.contains(address)
    }

    /// `true` if the tile was evicted from the fast tier and has to be
    /// reloaded from the overflow tier, as opposed to never computed.
    pub fn is_absent(&self, address: &TileAddress) -> bool {
        self.absent.contains(address)
    }

    /// Run expiry and size eviction on both memory tiers.
    pub async fn evict_expired(&self) {
        self.primary.evict_expired().await;
        self.derived.evict_expired().await;
    }

    /// Empty every tier, the overflow tier included.
    pub async fn clear(&self) {
        self.primary.clear().await;
        self.derived.clear().await;
        self.overflow.clear();
        self.absent.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let (p_hits, p_misses, p_evictions) = self.primary.counters();
        let (d_hits, d_misses, d_evictions) = self.derived.counters();
        let (overflow_writes, overflow_reads) = self.overflow.transfer_counts();

        CacheStats {
            primary_entries: self.primary.entry_count(),
            derived_entries: self.derived.entry_count(),
            overflow_entries: self.overflow.len(),
            overflow_bytes: self.overflow.size_bytes(),
            absent_from_fast: self.absent.len(),
            hits: p_hits + d_hits,
            misses: p_misses + d_misses,
            evictions: p_evictions + d_evictions,
            overflow_writes,
            overflow_reads,
        }
    }
}

impl Default for TileStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
