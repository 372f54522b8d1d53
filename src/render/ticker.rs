//! Periodic pyramid maintenance.
//!
//! Two independent timers:
//!
//! - **refresh** (default every second): re-derive up to `refresh_batch`
//!   stale tiles of the level currently on screen
//! - **eviction** (default every ten seconds): run expiry on the cache tiers
//!
//! Neither timer affects correctness. A skipped refresh leaves stale tiles for
//! the next tick; a skipped eviction only delays memory reclamation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PyramidConfig;
use crate::pyramid::TileRegistry;
use crate::tile::{Frustum, ZoomLevel};

use super::scheduler::RenderEvent;

/// What the presentation layer is looking at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub level: ZoomLevel,
    /// Visible area in region units
    pub frustum: Frustum,
    /// Extra region units around the frustum that are kept fresh too
    pub margin: f64,
}

impl Default for View {
    fn default() -> Self {
        Self {
            level: 0,
            frustum: Frustum::everything(),
            margin: 0.0,
        }
    }
}

impl View {
    /// Area the refresh pass works on.
    pub fn refresh_area(&self) -> Frustum {
        self.frustum.expand(self.margin)
    }
}

/// Shared, updatable [`View`].
#[derive(Debug, Clone, Default)]
pub struct ViewHandle {
    inner: Arc<RwLock<View>>,
}

impl ViewHandle {
    pub fn set(&self, level: ZoomLevel, frustum: Frustum) {
        let mut view = self.inner.write();
        view.level = level;
        view.frustum = frustum;
    }

    pub fn set_margin(&self, margin: f64) {
        self.inner.write().margin = margin;
    }

    pub fn get(&self) -> View {
        *self.inner.read()
    }
}

// =============================================================================
// MaintenanceTicker
// =============================================================================

/// Handle to the running refresh and eviction timers.
pub struct MaintenanceTicker {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceTicker {
    /// Spawn both timers. They stop when `cancel` fires.
    pub fn spawn(
        registry: Arc<TileRegistry>,
        config: &PyramidConfig,
        view: ViewHandle,
        events: broadcast::Sender<RenderEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let refresh = tokio::spawn(refresh_loop(
            Arc::clone(&registry),
            view,
            config.refresh_interval,
            config.refresh_batch,
            events,
            cancel.clone(),
        ));
        let eviction = tokio::spawn(eviction_loop(
            registry,
            config.eviction_interval,
            cancel.clone(),
        ));

        Self {
            cancel,
            handles: vec![refresh, eviction],
        }
    }

    /// Stop both timers and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }
    }
}

/// One refresh pass over the current view.
pub async fn refresh_once(registry: &TileRegistry, view: &View, batch: usize) -> bool {
    registry
        .refresh(view.level, view.refresh_area(), batch)
        .await
}

async fn refresh_loop(
    registry: Arc<TileRegistry>,
    view: ViewHandle,
    period: Duration,
    batch: usize,
    events: broadcast::Sender<RenderEvent>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let current = view.get();
                if refresh_once(&registry, &current, batch).await {
                    let _ = events.send(RenderEvent::LevelRefreshed(current.level));
                }
            }
        }
    }
    debug!("Refresh timer stopped");
}

async fn eviction_loop(registry: Arc<TileRegistry>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                registry.evict_expired().await;
                let stats = registry.cache_stats();
                debug!(
                    primary = stats.primary_entries,
                    derived = stats.derived_entries,
                    overflow = stats.overflow_entries,
                    "Cache eviction pass"
                );
            }
        }
    }
    debug!("Eviction timer stopped");
}
