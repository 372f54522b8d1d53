//! The tile registry: per-level tile maps over one owned [`TileStore`].
//!
//! # Levels
//!
//! Level 0 is seeded from the region listing and never grows on its own.
//! Every other level is derived:
//!
//! - **Coarser levels (`> 0`)** are materialized as a whole the first time
//!   they are requested, by mapping every key of the next finer level through
//!   [`TilePosition::coarser`]. Their size is bounded by the level-0 count.
//! - **Finer levels (`< 0`)** grow by a factor of four per step, so they are
//!   only filled on demand through [`TileRegistry::get_or_create`], or as a
//!   whole by an explicit [`TileRegistry::level`] call.
//!
//! New entries start out `INVALID` without an image; the refresh pass
//! ([`TileRegistry::refresh`]) derives them from their sources.
//!
//! # Generations
//!
//! Every reload bumps a generation number. Tiles remember the generation they
//! were created in, and results for tiles of an older generation are dropped
//! instead of being published or counted.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cache::{CacheStats, StoreConfig, TileStore};
use crate::error::PyramidError;
use crate::tile::{
    downsample, upsample, Completion, Frustum, TileAddress, TileImage, TilePosition, TileState,
    ZoomLevel, MAX_ZOOM_DEPTH,
};

use super::tile::Tile;

/// Position → tile mapping of one level.
pub type LevelMap = HashMap<TilePosition, Arc<Tile>>;

type DeriveFuture<'a> = Pin<Box<dyn Future<Output = Option<Arc<TileImage>>> + Send + 'a>>;

#[derive(Default)]
struct Level {
    tiles: LevelMap,
    /// Every reachable position of this level is present
    complete: bool,
}

struct Levels {
    generation: u64,
    /// Bumped whenever progress restarts; renders started before the bump
    /// are not counted
    epoch: u64,
    by_level: HashMap<ZoomLevel, Level>,
}

impl Levels {
    fn empty(generation: u64, epoch: u64) -> Self {
        let mut by_level = HashMap::new();
        by_level.insert(
            0,
            Level {
                tiles: LevelMap::new(),
                complete: true,
            },
        );
        Self {
            generation,
            epoch,
            by_level,
        }
    }

    fn regions(&self) -> Option<&LevelMap> {
        self.by_level.get(&0).map(|l| &l.tiles)
    }

    fn lookup(&self, level: ZoomLevel, position: TilePosition) -> Option<Arc<Tile>> {
        self.by_level.get(&level)?.tiles.get(&position).cloned()
    }

    fn insert(&mut self, level: ZoomLevel, position: TilePosition) -> Arc<Tile> {
        let generation = self.generation;
        let entry = self.by_level.entry(level).or_default();
        Arc::clone(
            entry
                .tiles
                .entry(position)
                .or_insert_with(|| Arc::new(Tile::new(TileAddress::new(level, position), generation))),
        )
    }

    /// Fill `level` and every level between it and 0.
    fn materialize(&mut self, level: ZoomLevel) -> &LevelMap {
        let step = if level > 0 { 1 } else { -1 };
        let mut current = 0;

        while current != level {
            let next = current + step;
            let done = self.by_level.get(&next).is_some_and(|l| l.complete);
            if !done {
                let keys: Vec<TilePosition> = match self.by_level.get(&current) {
                    Some(source) if step > 0 => source.tiles.keys().map(|p| p.coarser()).collect(),
                    Some(source) => source.tiles.keys().flat_map(|p| p.finer()).collect(),
                    None => Vec::new(),
                };
                for position in keys {
                    self.insert(next, position);
                }
                self.by_level.entry(next).or_default().complete = true;
                debug!(level = next, "Materialized pyramid level");
            }
            current = next;
        }

        &self.by_level.entry(level).or_default().tiles
    }
}

fn check_depth(level: ZoomLevel) -> Result<(), PyramidError> {
    if level.unsigned_abs() > MAX_ZOOM_DEPTH.unsigned_abs() {
        return Err(PyramidError::LevelOutOfRange {
            level,
            max: MAX_ZOOM_DEPTH,
        });
    }
    Ok(())
}

// =============================================================================
// TileRegistry
// =============================================================================

/// Owns the tiles of every zoom level and the cache holding their images.
pub struct TileRegistry {
    levels: RwLock<Levels>,
    store: TileStore,
    total: AtomicUsize,
    rendered: AtomicUsize,
    reload_lock: tokio::sync::Mutex<()>,
}

impl TileRegistry {
    /// Create an empty registry with its own cache tiers.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            levels: RwLock::new(Levels::empty(0, 0)),
            store: TileStore::new(config),
            total: AtomicUsize::new(0),
            rendered: AtomicUsize::new(0),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn generation(&self) -> u64 {
        self.levels.read().generation
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Drop every level and cached image, then seed level 0 with one
    /// `INVALID` tile per position. Returns the new generation.
    pub async fn reload<I>(&self, positions: I) -> u64
    where
        I: IntoIterator<Item = TilePosition>,
    {
        let positions: Vec<TilePosition> = positions.into_iter().collect();
        let _guard = self.reload_lock.lock().await;

        // Empty first so no worker can publish into the store while it is
        // being cleared.
        let generation = {
            let mut levels = self.levels.write();
            let generation = levels.generation + 1;
            *levels = Levels::empty(generation, levels.epoch + 1);
            self.total.store(0, Ordering::Release);
            self.rendered.store(0, Ordering::Release);
            generation
        };

        self.store.clear().await;

        let total = {
            let mut levels = self.levels.write();
            for position in positions {
                levels.insert(0, position);
            }
            let total = levels.regions().map_or(0, |r| r.len());
            self.total.store(total, Ordering::Release);
            total
        };

        info!(generation, regions = total, "Pyramid reloaded");
        generation
    }

    /// Mark every tile for re-production and restart progress at zero.
    ///
    /// Cached images are kept and stay visible until they are overwritten.
    pub fn invalidate_all(&self) {
        // write lock: excludes record_rendered while the epoch and the
        // counter restart together
        let mut levels = self.levels.write();
        levels.epoch += 1;
        let mut count = 0usize;
        for level in levels.by_level.values() {
            for tile in level.tiles.values() {
                tile.state().invalidate();
                count += 1;
            }
        }
        self.rendered.store(0, Ordering::Release);
        info!(tiles = count, "Invalidated all tiles");
    }

    /// Drop all tiles and cached images. The registry can be reloaded later.
    pub async fn close(&self) {
        let _guard = self.reload_lock.lock().await;
        {
            let mut levels = self.levels.write();
            let generation = levels.generation + 1;
            *levels = Levels::empty(generation, levels.epoch + 1);
            self.total.store(0, Ordering::Release);
            self.rendered.store(0, Ordering::Release);
        }
        self.store.clear().await;
        info!("Tile registry closed");
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// `true` if no regions are loaded.
    pub fn is_empty(&self) -> bool {
        self.levels.read().regions().map_or(true, |r| r.is_empty())
    }

    /// Level-0 positions, sorted.
    pub fn regions(&self) -> Vec<TilePosition> {
        let levels = self.levels.read();
        let mut positions: Vec<_> = levels
            .regions()
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default();
        positions.sort();
        positions
    }

    /// Snapshot of one level, materializing it on first access.
    pub fn level(&self, level: ZoomLevel) -> Result<LevelMap, PyramidError> {
        check_depth(level)?;
        {
            let levels = self.levels.read();
            if let Some(existing) = levels.by_level.get(&level) {
                if existing.complete {
                    return Ok(existing.tiles.clone());
                }
            }
        }
        Ok(self.levels.write().materialize(level).clone())
    }

    /// Tile at an address, if it exists already.
    pub fn get(&self, level: ZoomLevel, position: TilePosition) -> Option<Arc<Tile>> {
        self.levels.read().lookup(level, position)
    }

    /// Tile at an address, created if it covers or is covered by a known
    /// region. `None` outside the loaded world or beyond the depth bound.
    pub fn get_or_create(&self, level: ZoomLevel, position: TilePosition) -> Option<Arc<Tile>> {
        check_depth(level).ok()?;
        if let Some(tile) = self.get(level, position) {
            return Some(tile);
        }

        let mut levels = self.levels.write();
        match level {
            0 => None,
            l if l > 0 => levels.materialize(l).get(&position).cloned(),
            l => {
                let depth = l.unsigned_abs();
                let region = position.ancestor(depth);
                if !levels.regions().is_some_and(|r| r.contains_key(&region)) {
                    return None;
                }
                // parents first, so every finer tile has a defining source
                for up in (1..depth).rev() {
                    levels.insert(-(up as i32), position.ancestor(depth - up));
                }
                Some(levels.insert(l, position))
            }
        }
    }

    /// Current cached image of a tile, if any.
    pub async fn image(&self, address: TileAddress) -> Option<Arc<TileImage>> {
        self.store.get(&address).await
    }

    /// Nearest level-0 tile in `INVALID` state, ties broken by position.
    pub fn nearest_invalid(&self, x: f64, y: f64) -> Option<Arc<Tile>> {
        let levels = self.levels.read();
        levels
            .regions()?
            .values()
            .filter(|tile| tile.current_state() == TileState::Invalid)
            .min_by(|a, b| {
                a.position()
                    .distance_to(x, y)
                    .total_cmp(&b.position().distance_to(x, y))
                    .then_with(|| a.position().cmp(&b.position()))
            })
            .cloned()
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Store a freshly rendered image for a level-0 position.
    pub async fn set_image(
        &self,
        position: TilePosition,
        image: TileImage,
    ) -> Result<(), PyramidError> {
        let tile = self
            .get(0, position)
            .ok_or(PyramidError::UnknownPosition { position })?;
        self.publish(&tile, image).await;
        Ok(())
    }

    /// Store an image for a tile and invalidate everything derived from it.
    ///
    /// Returns `false` (and stores nothing) if the tile belongs to an older
    /// generation.
    pub async fn publish(&self, tile: &Tile, image: TileImage) -> bool {
        if tile.generation() != self.generation() {
            debug!(address = %tile.address(), "Discarding image from previous generation");
            return false;
        }
        self.store.put(tile.address(), Arc::new(image)).await;
        if tile.level() == 0 {
            self.invalidate_dependents(tile.position());
        }
        true
    }

    /// Invalidate every materialized derived tile that depends on a region.
    fn invalidate_dependents(&self, region: TilePosition) -> usize {
        let levels = self.levels.read();
        let mut count = 0;
        for (&level, entries) in &levels.by_level {
            if level > 0 {
                if let Some(tile) = entries.tiles.get(&region.ancestor(level.unsigned_abs())) {
                    tile.state().invalidate();
                    count += 1;
                }
            } else if level < 0 {
                let depth = level.unsigned_abs();
                for tile in entries.tiles.values() {
                    if tile.position().ancestor(depth) == region {
                        tile.state().invalidate();
                        count += 1;
                    }
                }
            }
        }
        count
    }

    // =========================================================================
    // Progress
    // =========================================================================

    /// Current progress epoch. Capture it before rendering a level-0 tile
    /// and hand it to [`record_rendered`](Self::record_rendered).
    pub fn progress_epoch(&self) -> u64 {
        self.levels.read().epoch
    }

    /// Count a level-0 tile as rendered.
    ///
    /// Only counts tiles that are still part of the current level 0, and only
    /// if progress has not been restarted since `epoch` was captured.
    pub fn record_rendered(&self, tile: &Tile, epoch: u64) -> bool {
        let levels = self.levels.read();
        let current = levels
            .regions()
            .and_then(|r| r.get(&tile.position()))
            .filter(|current| std::ptr::eq(Arc::as_ptr(current), tile));
        if current.is_none() || tile.generation() != levels.generation {
            debug!(address = %tile.address(), "Rendered tile is no longer registered");
            return false;
        }
        if epoch != levels.epoch {
            debug!(address = %tile.address(), "Progress restarted while rendering, not counting");
            return false;
        }

        let total = self.total.load(Ordering::Acquire);
        self.rendered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < total).then_some(n + 1)
            })
            .is_ok()
    }

    /// `(rendered, total)` level-0 tile counts.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.rendered.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }

    /// Fraction of level-0 tiles rendered; 1 when nothing is loaded.
    pub fn rendered_fraction(&self) -> f64 {
        let (rendered, total) = self.progress();
        if total == 0 {
            1.0
        } else {
            rendered as f64 / total as f64
        }
    }

    // =========================================================================
    // Derivation
    // =========================================================================

    /// Re-derive up to `max` visible tiles of a non-zero level.
    ///
    /// Returns `true` if at least one tile got a new image.
    pub async fn refresh(&self, level: ZoomLevel, frustum: Frustum, max: usize) -> bool {
        if level == 0 || max == 0 {
            return false;
        }
        let Ok(candidates) = self.refresh_candidates(level, frustum) else {
            return false;
        };

        let mut refreshed = 0;
        for tile in candidates {
            if refreshed >= max {
                break;
            }
            if self.needs_derivation(&tile) && self.derive(tile, 0).await.is_some() {
                refreshed += 1;
            }
        }

        if refreshed > 0 {
            debug!(level, refreshed, "Refreshed pyramid level");
        }
        refreshed > 0
    }

    /// Visible tiles of a level, nearest to the frustum center first.
    fn refresh_candidates(
        &self,
        level: ZoomLevel,
        frustum: Frustum,
    ) -> Result<Vec<Arc<Tile>>, PyramidError> {
        check_depth(level)?;
        let mut visible: Vec<Arc<Tile>> = if level > 0 {
            self.level(level)?.into_values().collect()
        } else {
            // finer levels: only tiles someone asked for
            self.levels
                .read()
                .by_level
                .get(&level)
                .map(|l| l.tiles.values().cloned().collect())
                .unwrap_or_default()
        };
        visible.retain(|tile| tile.address().bounds().intersects(&frustum));

        let center_x = (frustum.min_x + frustum.max_x) / 2.0;
        let center_y = (frustum.min_y + frustum.max_y) / 2.0;
        let key = |tile: &Arc<Tile>| {
            let b = tile.address().bounds();
            let dx = (b.min_x + b.max_x) / 2.0 - center_x;
            let dy = (b.min_y + b.max_y) / 2.0 - center_y;
            dx * dx + dy * dy
        };
        if center_x.is_finite() && center_y.is_finite() {
            visible.sort_by(|a, b| {
                key(a)
                    .total_cmp(&key(b))
                    .then_with(|| a.position().cmp(&b.position()))
            });
        } else {
            visible.sort_by_key(|tile| tile.position());
        }
        Ok(visible)
    }

    fn needs_derivation(&self, tile: &Tile) -> bool {
        match tile.current_state() {
            TileState::Invalid => true,
            TileState::Valid => !self.store.contains(&tile.address()),
            TileState::Drawing | TileState::Redraw => false,
        }
    }

    /// Compute and store the image of a derived tile.
    ///
    /// Returns `None` if another producer owns the tile or the tile is stale.
    fn derive(&self, tile: Arc<Tile>, depth: u32) -> DeriveFuture<'_> {
        Box::pin(async move {
            let claimed = match tile.current_state() {
                TileState::Invalid => tile.state().try_claim(),
                TileState::Valid => tile
                    .state()
                    .compare_and_set(TileState::Valid, TileState::Drawing)
                    .is_ok(),
                TileState::Drawing | TileState::Redraw => false,
            };
            if !claimed {
                return None;
            }

            loop {
                let image = Arc::new(self.compose(tile.address(), depth).await);
                if tile.generation() != self.generation() {
                    tile.state().abandon();
                    return None;
                }
                self.store.put(tile.address(), Arc::clone(&image)).await;

                match tile.state().finish() {
                    Completion::Settled | Completion::Abandoned => return Some(image),
                    Completion::RenderAgain => continue,
                }
            }
        })
    }

    async fn compose(&self, address: TileAddress, depth: u32) -> TileImage {
        if address.level > 0 {
            let mut children: [Option<Arc<TileImage>>; 4] = Default::default();
            for (slot, child) in children.iter_mut().zip(address.finer()) {
                *slot = self.source_image(child, depth).await;
            }
            let [tl, tr, bl, br] = &children;
            downsample(tl.as_deref(), tr.as_deref(), bl.as_deref(), br.as_deref())
        } else {
            match self.source_image(address.coarser(), depth).await {
                Some(parent) => upsample(&parent, address.position.quadrant()),
                None => TileImage::transparent(),
            }
        }
    }

    /// Image of a source tile, deriving it first if it is stale.
    async fn source_image(&self, address: TileAddress, depth: u32) -> Option<Arc<TileImage>> {
        if address.level == 0 || depth >= MAX_ZOOM_DEPTH.unsigned_abs() {
            return self.store.get(&address).await;
        }
        let tile = self.get_or_create(address.level, address.position)?;
        if self.needs_derivation(&tile) {
            if let Some(image) = self.derive(tile, depth + 1).await {
                return Some(image);
            }
        }
        self.store.get(&address).await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub async fn evict_expired(&self) {
        self.store.evict_expired().await;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }
}

impl Default for TileRegistry {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
