//! Test utilities for integration tests.
//!
//! Provides a scriptable [`MockRenderer`] and helpers to build registries and
//! schedulers with small, fast settings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use image::Rgba;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use blockmap_tiles::{
    PyramidConfig, RegionRender, RegionRenderer, RenderError, RenderScheduler, TileImage,
    TilePosition, TileRegistry,
};

// =============================================================================
// Mock Renderer
// =============================================================================

/// A renderer with call tracking, injectable failures, delays and gates.
///
/// The image of the n-th render of a position is [`MockRenderer::image_for`]
/// `(position, n)`; the chunk metadata maps the position itself to `n`.
#[derive(Default)]
pub struct MockRenderer {
    calls: Mutex<Vec<TilePosition>>,
    counts: DashMap<TilePosition, usize>,
    failures: DashMap<TilePosition, usize>,
    panics: DashMap<TilePosition, usize>,
    gates: DashMap<TilePosition, Arc<Semaphore>>,
    in_flight: DashSet<TilePosition>,
    overlap: AtomicBool,
    delay: Duration,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fail the next `times` renders of `position`.
    pub fn fail(&self, position: TilePosition, times: usize) {
        self.failures.insert(position, times);
    }

    /// Panic in the next `times` renders of `position`.
    pub fn panic_on(&self, position: TilePosition, times: usize) {
        self.panics.insert(position, times);
    }

    /// Block renders of `position` until [`open`](Self::open) is called.
    pub fn gate(&self, position: TilePosition) {
        self.gates.insert(position, Arc::new(Semaphore::new(0)));
    }

    /// Let `renders` blocked (or future) renders of `position` through.
    pub fn open(&self, position: TilePosition, renders: usize) {
        if let Some(gate) = self.gates.get(&position) {
            gate.add_permits(renders);
        }
    }

    /// Positions in the order their renders started.
    pub fn calls(&self) -> Vec<TilePosition> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, position: TilePosition) -> usize {
        self.calls().iter().filter(|p| **p == position).count()
    }

    /// `true` if two renders of the same position ever overlapped.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    /// Expected image of the `version`-th successful render of a position.
    pub fn image_for(position: TilePosition, version: usize) -> TileImage {
        TileImage::filled(Rgba([
            (position.x & 0xff) as u8,
            (position.y & 0xff) as u8,
            version as u8,
            255,
        ]))
    }

    /// Wait until `position` has been called at least `count` times.
    pub async fn wait_for_calls(&self, position: TilePosition, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.call_count(position) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("renderer was not called in time");
    }
}

#[async_trait]
impl RegionRenderer for MockRenderer {
    type Metadata = usize;

    async fn render(&self, position: TilePosition) -> Result<RegionRender<usize>, RenderError> {
        if take_one(&self.panics, position) {
            self.calls.lock().push(position);
            panic!("injected panic rendering {:?}", position);
        }
        if !self.in_flight.insert(position) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        self.calls.lock().push(position);

        let gate = self.gates.get(&position).map(|g| Arc::clone(g.value()));
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.remove(&position);

        if take_one(&self.failures, position) {
            return Err(RenderError::Region {
                position,
                message: "injected failure".to_string(),
            });
        }

        let version = {
            let mut count = self.counts.entry(position).or_insert(0);
            *count += 1;
            *count
        };
        let mut metadata = HashMap::new();
        metadata.insert(position, version);
        Ok(RegionRender::new(Self::image_for(position, version)).with_metadata(metadata))
    }
}

/// Consume one scripted occurrence for `position`, if any are left.
fn take_one(scripted: &DashMap<TilePosition, usize>, position: TilePosition) -> bool {
    match scripted.get_mut(&position) {
        Some(mut remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Small, fast configuration for tests.
pub fn test_config(workers: usize) -> PyramidConfig {
    PyramidConfig {
        worker_count: workers,
        refresh_interval: Duration::from_millis(20),
        eviction_interval: Duration::from_millis(50),
        retry_delay: Duration::from_millis(10),
        ..PyramidConfig::default()
    }
}

/// Scheduler over a fresh registry, not started.
pub fn scheduler_with(
    renderer: Arc<MockRenderer>,
    config: PyramidConfig,
) -> RenderScheduler<MockRenderer> {
    let registry = Arc::new(TileRegistry::new(config.store_config()));
    RenderScheduler::new(registry, renderer, config)
}

pub fn pos(x: i32, y: i32) -> TilePosition {
    TilePosition::new(x, y)
}

/// Await a future with a generous timeout.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}
