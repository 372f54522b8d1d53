//! In-memory cache tier backed by `moka`.
//!
//! A [`MemoryTier`] holds decoded tiles with two eviction triggers:
//!
//! - **Size**: at most `capacity` entries, least-recently-used evicted first
//! - **Time**: every entry carries one deadline, re-armed on each event with
//!   the TTL for that event (creation, update, read)
//!
//! A tier may be given a [`Spill`] target. Entries that leave the tier because
//! of size or time are then handed to the overflow tier instead of being
//! dropped, and their address is recorded as "absent from the fast tier".
//! Explicit removals and replacements never spill.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use tracing::debug;

use crate::tile::{TileAddress, TileImage};

use super::overflow::OverflowTier;

/// Default time-to-live after an entry is created.
pub const DEFAULT_EXPIRE_AFTER_CREATE: Duration = Duration::from_secs(30);

/// Default time-to-live after an entry is updated.
pub const DEFAULT_EXPIRE_AFTER_UPDATE: Duration = Duration::from_secs(30);

/// Default time-to-live after an entry is read.
pub const DEFAULT_EXPIRE_AFTER_READ: Duration = Duration::from_secs(60);

// =============================================================================
// Configuration
// =============================================================================

/// Capacity and expiry settings for one memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    /// Maximum number of entries
    pub capacity: u64,
    pub expire_after_create: Duration,
    pub expire_after_update: Duration,
    pub expire_after_read: Duration,
}

impl TierConfig {
    /// Tier with the given capacity and the default expiry durations.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            expire_after_create: DEFAULT_EXPIRE_AFTER_CREATE,
            expire_after_update: DEFAULT_EXPIRE_AFTER_UPDATE,
            expire_after_read: DEFAULT_EXPIRE_AFTER_READ,
        }
    }

    /// Use the same TTL for all three events.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expire_after_create = ttl;
        self.expire_after_update = ttl;
        self.expire_after_read = ttl;
        self
    }
}

/// Per-event expiry for tile entries.
struct TileExpiry {
    after_create: Duration,
    after_update: Duration,
    after_read: Duration,
}

impl Expiry<TileAddress, Arc<TileImage>> for TileExpiry {
    fn expire_after_create(
        &self,
        _key: &TileAddress,
        _value: &Arc<TileImage>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.after_create)
    }

    fn expire_after_read(
        &self,
        _key: &TileAddress,
        _value: &Arc<TileImage>,
        _read_at: Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        Some(self.after_read)
    }

    fn expire_after_update(
        &self,
        _key: &TileAddress,
        _value: &Arc<TileImage>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.after_update)
    }
}

// =============================================================================
// Spill target
// =============================================================================

/// Where evicted entries of a tier go.
#[derive(Clone)]
pub struct Spill {
    pub overflow: Arc<OverflowTier>,
    /// Addresses that were evicted from the fast tier and live in `overflow`
    pub absent: Arc<DashSet<TileAddress>>,
}

// =============================================================================
// MemoryTier
// =============================================================================

/// One bounded, expiring in-memory tier.
pub struct MemoryTier {
    name: &'static str,
    cache: Cache<TileAddress, Arc<TileImage>>,
    spill: Option<Spill>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl MemoryTier {
    /// Create a tier. Without `spill`, evicted entries are simply dropped.
    pub fn new(name: &'static str, config: TierConfig, spill: Option<Spill>) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));

        let listener_spill = spill.clone();
        let listener_evictions = Arc::clone(&evictions);
        let cache = Cache::builder()
            .max_capacity(config.capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(TileExpiry {
                after_create: config.expire_after_create,
                after_update: config.expire_after_update,
                after_read: config.expire_after_read,
            })
            .eviction_listener(
                move |address: Arc<TileAddress>, image: Arc<TileImage>, cause: RemovalCause| {
                    if !cause.was_evicted() {
                        return;
                    }
                    listener_evictions.fetch_add(1, Ordering::Relaxed);
                    match &listener_spill {
                        Some(spill) => {
                            spill.overflow.store(*address, &image);
                            spill.absent.insert(*address);
                        }
                        None => debug!(tier = name, address = %address, ?cause, "Tile evicted"),
                    }
                },
            )
            .build();

        Self {
            name,
            cache,
            spill,
            capacity: config.capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get a tile from this tier only. Counts as a read for expiry.
    pub async fn get(&self, address: &TileAddress) -> Option<Arc<TileImage>> {
        match self.cache.get(address).await {
            Some(image) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(image)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a tile, then run pending eviction.
    pub async fn put(&self, address: TileAddress, image: Arc<TileImage>) {
        if let Some(spill) = &self.spill {
            spill.absent.remove(&address);
            spill.overflow.remove(&address);
        }
        self.cache.insert(address, image).await;
        self.cache.run_pending_tasks().await;
    }

    /// Insert a tile unless the tier already holds one for `address`.
    ///
    /// Returns the image the tier holds afterwards. An entry written by a
    /// concurrent [`put`](Self::put) always wins over the one offered here.
    pub async fn insert_if_absent(&self, address: TileAddress, image: Arc<TileImage>) -> Arc<TileImage> {
        let entry = self
            .cache
            .entry(address)
            .or_insert_with(async move { image })
            .await;
        if !entry.is_fresh() {
            debug!(tier = self.name, %address, "Tile already present, keeping newer copy");
        }
        let image = entry.into_value();
        self.cache.run_pending_tasks().await;
        image
    }

    /// Check for a tile without touching its expiry.
    pub fn contains(&self, address: &TileAddress) -> bool {
        self.cache.contains_key(address)
    }

    pub async fn remove(&self, address: &TileAddress) {
        self.cache.invalidate(address).await;
    }

    /// Evict everything that has expired (spilling where configured).
    pub async fn evict_expired(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Drop every entry without spilling.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// `(hits, misses, evictions)` since creation.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}
