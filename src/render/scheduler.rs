//! Background render scheduler.
//!
//! A fixed pool of tokio tasks keeps rendering the level-0 tile closest to the
//! current focus point until every region is `VALID`.
//!
//! ```text
//!            ┌──────────── wakeup (reload / invalidate / retry) ───────────┐
//!            ▼                                                             │
//!   ┌─────────────────┐  none    ┌──────┐                                  │
//!   │ nearest INVALID │────────► │ idle │ ─────────────────────────────────┘
//!   └────────┬────────┘          └──────┘
//!            │ CAS INVALID → DRAWING (bounded retries, then yield)
//!            ▼
//!   ┌─────────────────┐  error   ┌──────────────────────────────┐
//!   │ renderer.render │────────► │ wait retry_delay, → INVALID  │
//!   └────────┬────────┘          └──────────────────────────────┘
//!            ▼
//!   publish image + metadata
//!            │
//!            ├── REDRAW → DRAWING: render again
//!            └── DRAWING → VALID: count, report progress
//! ```
//!
//! Workers check the cancellation token before every pick and every render
//! pass. A render that is already running is never interrupted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PyramidConfig;
use crate::error::RenderError;
use crate::pyramid::{Tile, TileRegistry};
use crate::tile::{Completion, Frustum, TilePosition, ZoomLevel, TILE_SIZE};

use super::source::{RegionRender, RegionRenderer};
use super::ticker::{MaintenanceTicker, ViewHandle};

/// Capacity of the event channel. Slow subscribers miss old events.
const EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Status and events
// =============================================================================

/// Coarse state of the scheduler, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RenderStatus {
    NoRegionsLoaded,
    Rendering,
    Done,
    Stopped,
}

impl fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RenderStatus::NoRegionsLoaded => "No regions loaded",
            RenderStatus::Rendering => "Rendering",
            RenderStatus::Done => "Done",
            RenderStatus::Stopped => "Stopped",
        };
        f.write_str(text)
    }
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RenderEvent {
    /// A level-0 image was published
    ImageChanged(TilePosition),
    /// New chunk metadata is available for a region
    MetadataChanged(TilePosition),
    /// A region settled
    Progress { rendered: usize, total: usize },
    /// The renderer failed; the region will be retried
    RenderFailed {
        position: TilePosition,
        message: String,
    },
    /// The maintenance ticker re-derived tiles of a level
    LevelRefreshed(ZoomLevel),
}

enum Pick {
    Claimed(Arc<Tile>),
    Idle,
    Contended,
}

// =============================================================================
// Shared worker state
// =============================================================================

struct Shared<R: RegionRenderer> {
    registry: Arc<TileRegistry>,
    renderer: Arc<R>,
    config: PyramidConfig,
    focus: RwLock<(f64, f64)>,
    wakeup: Notify,
    cancel: CancellationToken,
    status: watch::Sender<RenderStatus>,
    events: broadcast::Sender<RenderEvent>,
    metadata: DashMap<TilePosition, HashMap<TilePosition, R::Metadata>>,
}

impl<R: RegionRenderer> Shared<R> {
    fn emit(&self, event: RenderEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn current_status(&self) -> RenderStatus {
        if self.cancel.is_cancelled() {
            RenderStatus::Stopped
        } else if self.registry.is_empty() {
            RenderStatus::NoRegionsLoaded
        } else {
            let (rendered, total) = self.registry.progress();
            if rendered >= total {
                RenderStatus::Done
            } else {
                RenderStatus::Rendering
            }
        }
    }

    fn update_status(&self) {
        // Computed under the channel lock so concurrent updates cannot
        // overwrite a newer status with an older one.
        self.status.send_if_modified(|current| {
            let status = self.current_status();
            if *current == status {
                return false;
            }
            debug!(from = %current, to = %status, "Render status changed");
            *current = status;
            true
        });
    }

    fn pick(&self) -> Pick {
        let (x, y) = *self.focus.read();
        for _ in 0..self.config.max_claim_attempts {
            let Some(tile) = self.registry.nearest_invalid(x, y) else {
                return Pick::Idle;
            };
            if tile.state().try_claim() {
                return Pick::Claimed(tile);
            }
        }
        Pick::Contended
    }

    async fn run(self: Arc<Self>, worker: usize) {
        info!(worker, "Render worker started");

        while !self.cancel.is_cancelled() {
            // Register for wakeups before looking for work, so a reload
            // between the pick and the wait is not missed.
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.pick() {
                Pick::Claimed(tile) => self.render_tile(worker, tile).await,
                Pick::Contended => tokio::task::yield_now().await,
                Pick::Idle => {
                    self.update_status();
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = &mut notified => {}
                    }
                }
            }
        }

        info!(worker, "Render worker stopped");
    }

    async fn render_tile(&self, worker: usize, tile: Arc<Tile>) {
        let position = tile.position();

        loop {
            if self.cancel.is_cancelled() {
                tile.state().abandon();
                return;
            }

            debug!(worker, %position, "Rendering region");
            let epoch = self.registry.progress_epoch();
            let render = match self.render_isolated(position).await {
                Ok(render) => render,
                Err(err) => {
                    self.handle_failure(&tile, err).await;
                    return;
                }
            };

            if !self.registry.publish(&tile, render.image).await {
                return;
            }
            self.metadata.insert(position, render.chunk_metadata);
            self.emit(RenderEvent::ImageChanged(position));
            self.emit(RenderEvent::MetadataChanged(position));

            match tile.state().finish() {
                Completion::Settled => {
                    if self.registry.record_rendered(&tile, epoch) {
                        let (rendered, total) = self.registry.progress();
                        self.emit(RenderEvent::Progress { rendered, total });
                    }
                    self.update_status();
                    return;
                }
                Completion::RenderAgain => {
                    debug!(worker, %position, "Region invalidated while rendering, rendering again");
                }
                Completion::Abandoned => return,
            }
        }
    }

    /// Run the renderer on its own task so a panic surfaces as an error
    /// instead of unwinding the worker.
    async fn render_isolated(
        &self,
        position: TilePosition,
    ) -> Result<RegionRender<R::Metadata>, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        match tokio::spawn(async move { renderer.render(position).await }).await {
            Ok(result) => result,
            Err(e) => Err(RenderError::Region {
                position,
                message: format!("renderer task failed: {}", e),
            }),
        }
    }

    async fn handle_failure(&self, tile: &Tile, err: RenderError) {
        let position = tile.position();
        if !matches!(err, RenderError::Cancelled) {
            warn!(%position, error = %err, "Region render failed");
            self.emit(RenderEvent::RenderFailed {
                position,
                message: err.to_string(),
            });
            // keep the tile claimed while waiting so no other worker retries it
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
        tile.state().abandon();
        self.wakeup.notify_waiters();
    }
}

// =============================================================================
// RenderScheduler
// =============================================================================

/// Worker pool that renders level-0 tiles nearest to a focus point first.
pub struct RenderScheduler<R: RegionRenderer> {
    shared: Arc<Shared<R>>,
    view: ViewHandle,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ticker: Mutex<Option<MaintenanceTicker>>,
}

impl<R: RegionRenderer> RenderScheduler<R> {
    /// Create a stopped scheduler. Call [`start`](Self::start) to spawn workers.
    pub fn new(registry: Arc<TileRegistry>, renderer: Arc<R>, config: PyramidConfig) -> Self {
        let initial = if registry.is_empty() {
            RenderStatus::NoRegionsLoaded
        } else {
            RenderStatus::Rendering
        };
        let (status, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                registry,
                renderer,
                config,
                focus: RwLock::new((0.0, 0.0)),
                wakeup: Notify::new(),
                cancel: CancellationToken::new(),
                status,
                events,
                metadata: DashMap::new(),
            }),
            view: ViewHandle::default(),
            workers: Mutex::new(Vec::new()),
            ticker: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<TileRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &PyramidConfig {
        &self.shared.config
    }

    /// Spawn the render workers and the maintenance ticker.
    ///
    /// Must be called inside a tokio runtime. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() || self.shared.cancel.is_cancelled() {
            return;
        }

        for worker in 0..self.shared.config.worker_count {
            workers.push(tokio::spawn(Arc::clone(&self.shared).run(worker)));
        }

        *self.ticker.lock() = Some(MaintenanceTicker::spawn(
            Arc::clone(&self.shared.registry),
            &self.shared.config,
            self.view.clone(),
            self.shared.events.clone(),
            self.shared.cancel.child_token(),
        ));

        info!(
            workers = self.shared.config.worker_count,
            "Render scheduler started"
        );
        self.shared.update_status();
    }

    /// Replace the loaded regions and restart rendering.
    pub async fn reload<I>(&self, positions: I)
    where
        I: IntoIterator<Item = TilePosition>,
    {
        self.shared.metadata.clear();
        self.shared.registry.reload(positions).await;

        let (rendered, total) = self.shared.registry.progress();
        self.shared.emit(RenderEvent::Progress { rendered, total });
        self.shared.update_status();
        self.shared.wakeup.notify_waiters();
    }

    /// Re-render every region, keeping the current images until replaced.
    pub fn invalidate_all(&self) {
        self.shared.metadata.clear();
        self.shared.registry.invalidate_all();

        let (rendered, total) = self.shared.registry.progress();
        self.shared.emit(RenderEvent::Progress { rendered, total });
        self.shared.update_status();
        self.shared.wakeup.notify_waiters();
    }

    // =========================================================================
    // Focus and view
    // =========================================================================

    /// Point of interest in region coordinates.
    pub fn set_focus(&self, x: f64, y: f64) {
        *self.shared.focus.write() = (x, y);
    }

    /// Point of interest in world pixels.
    ///
    /// A point in the middle of a region is closest to that region's tile.
    pub fn set_focus_world(&self, x: f64, y: f64) {
        let size = TILE_SIZE as f64;
        self.set_focus(x / size - 0.5, y / size - 0.5);
    }

    pub fn focus(&self) -> (f64, f64) {
        *self.shared.focus.read()
    }

    /// Level and area the maintenance ticker keeps refreshed.
    pub fn set_view(&self, level: ZoomLevel, frustum: Frustum) {
        self.view.set(level, frustum);
    }

    pub fn view(&self) -> &ViewHandle {
        &self.view
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn status(&self) -> RenderStatus {
        *self.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<RenderStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.shared.events.subscribe()
    }

    /// Sender for events of this scheduler, e.g. for a custom ticker.
    pub fn event_sender(&self) -> broadcast::Sender<RenderEvent> {
        self.shared.events.clone()
    }

    /// Latest chunk metadata of a region.
    pub fn chunk_metadata(&self, position: TilePosition) -> Option<HashMap<TilePosition, R::Metadata>> {
        self.shared
            .metadata
            .get(&position)
            .map(|entry| entry.value().clone())
    }

    pub fn progress(&self) -> f64 {
        self.shared.registry.rendered_fraction()
    }

    /// Wait until the scheduler is no longer [`RenderStatus::Rendering`].
    pub async fn wait_until_settled(&self) -> RenderStatus {
        let mut status = self.shared.status.subscribe();
        let settled = match status
            .wait_for(|s| *s != RenderStatus::Rendering)
            .await
        {
            Ok(current) => *current,
            Err(_) => RenderStatus::Stopped,
        };
        settled
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop all workers and the ticker and wait for them to exit.
    ///
    /// Renders already in progress run to completion first.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.wakeup.notify_waiters();

        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.shutdown().await;
        }

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Render worker ended abnormally");
            }
        }

        self.shared.status.send_replace(RenderStatus::Stopped);
        info!("Render scheduler stopped");
    }

    /// [`shutdown`](Self::shutdown), then release every tile and cached image.
    pub async fn close(&self) {
        self.shutdown().await;
        self.shared.metadata.clear();
        self.shared.registry.close().await;
    }
}

impl<R: RegionRenderer> Drop for RenderScheduler<R> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
