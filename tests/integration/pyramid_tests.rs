//! Tile pyramid integration tests.
//!
//! Tests verify:
//! - Progress tracking across renders and invalidation
//! - Renders finishing across an invalidation are not counted
//! - Level-0 tiles survive eviction from the primary tier
//! - Coarser levels match a manual downsample of their sources

use std::sync::Arc;

use image::Rgba;

use blockmap_tiles::tile::Completion;
use blockmap_tiles::{
    downsample, DebugRenderer, Frustum, PyramidConfig, RenderScheduler, RenderStatus, StoreConfig,
    TierConfig, TileAddress, TileImage, TileRegistry, TileState,
};

use super::test_utils::{pos, within};

fn solid(v: u8) -> TileImage {
    TileImage::filled(Rgba([v, v, v, 255]))
}

/// Claim, publish, settle and count a level-0 tile, the way a worker does.
async fn render_by_hand(registry: &TileRegistry, x: i32, y: i32, v: u8) {
    let tile = registry.get(0, pos(x, y)).unwrap();
    let epoch = registry.progress_epoch();
    assert!(tile.state().try_claim());
    assert!(registry.publish(&tile, solid(v)).await);
    tile.state().finish();
    assert!(registry.record_rendered(&tile, epoch));
}

// =============================================================================
// Progress
// =============================================================================

#[tokio::test]
async fn test_rendered_fraction_tracks_valid_regions() {
    let registry = TileRegistry::default();
    registry
        .reload([pos(0, 0), pos(1, 0), pos(0, 1), pos(1, 1)])
        .await;
    assert_eq!(registry.rendered_fraction(), 0.0);

    render_by_hand(&registry, 0, 0, 10).await;
    render_by_hand(&registry, 1, 1, 20).await;
    assert_eq!(registry.rendered_fraction(), 0.5);

    render_by_hand(&registry, 1, 0, 30).await;
    render_by_hand(&registry, 0, 1, 40).await;
    assert_eq!(registry.rendered_fraction(), 1.0);

    // progress never exceeds the region count
    let tile = registry.get(0, pos(0, 0)).unwrap();
    assert!(!registry.record_rendered(&tile, registry.progress_epoch()));
    assert_eq!(registry.progress(), (4, 4));
}

#[tokio::test]
async fn test_invalidate_all_resets_progress_but_keeps_images() {
    let registry = TileRegistry::default();
    registry.reload([pos(0, 0)]).await;
    render_by_hand(&registry, 0, 0, 77).await;
    assert_eq!(registry.rendered_fraction(), 1.0);

    registry.invalidate_all();

    assert_eq!(registry.rendered_fraction(), 0.0);
    assert_eq!(
        registry.get(0, pos(0, 0)).unwrap().current_state(),
        TileState::Invalid
    );
    let image = registry
        .image(TileAddress::region(pos(0, 0)))
        .await
        .unwrap();
    assert!(*image == solid(77));
}

#[tokio::test]
async fn test_render_finishing_across_invalidation_is_not_counted() {
    let registry = TileRegistry::default();
    registry.reload([pos(0, 0), pos(1, 0)]).await;

    // a worker settles its tile, then loses the race to invalidate_all
    let tile = registry.get(0, pos(0, 0)).unwrap();
    let epoch = registry.progress_epoch();
    assert!(tile.state().try_claim());
    assert!(registry.publish(&tile, solid(5)).await);
    assert_eq!(tile.state().finish(), Completion::Settled);

    registry.invalidate_all();

    assert!(!registry.record_rendered(&tile, epoch));
    assert_eq!(registry.progress(), (0, 2));
    assert_eq!(tile.current_state(), TileState::Invalid);

    // the next render of the same tile counts once
    render_by_hand(&registry, 0, 0, 6).await;
    assert_eq!(registry.progress(), (1, 2));
    assert_eq!(registry.rendered_fraction(), 0.5);
}

// =============================================================================
// Cache tiers under the registry
// =============================================================================

#[tokio::test]
async fn test_evicted_region_is_served_from_overflow() {
    let registry = TileRegistry::new(StoreConfig {
        primary: TierConfig::with_capacity(1),
        derived: TierConfig::with_capacity(8),
    });
    registry.reload([pos(0, 0), pos(1, 0)]).await;

    registry.set_image(pos(0, 0), solid(1)).await.unwrap();
    registry.set_image(pos(1, 0), solid(2)).await.unwrap();

    let first = TileAddress::region(pos(0, 0));
    let store = registry.store();
    assert!(!store.contains_fast(&first));
    assert!(store.contains_overflow(&first));
    assert!(store.is_absent(&first));

    let image = registry.image(first).await.unwrap();
    assert!(*image == solid(1));

    // promotion pushed the other region out instead
    let second = TileAddress::region(pos(1, 0));
    assert!(store.contains_fast(&first));
    assert!(!store.is_absent(&first));
    assert!(store.contains_overflow(&second));
    assert!(*registry.image(second).await.unwrap() == solid(2));
}

#[tokio::test]
async fn test_reload_clears_overflow() {
    let registry = TileRegistry::new(StoreConfig {
        primary: TierConfig::with_capacity(1),
        derived: TierConfig::with_capacity(8),
    });
    registry.reload([pos(0, 0), pos(1, 0)]).await;
    registry.set_image(pos(0, 0), solid(1)).await.unwrap();
    registry.set_image(pos(1, 0), solid(2)).await.unwrap();
    assert_eq!(registry.cache_stats().overflow_entries, 1);

    registry.reload([pos(0, 0), pos(1, 0)]).await;

    let stats = registry.cache_stats();
    assert_eq!(stats.overflow_entries, 0);
    assert_eq!(stats.absent_from_fast, 0);
    assert!(registry.image(TileAddress::region(pos(0, 0))).await.is_none());
}

// =============================================================================
// Zoom-out pipeline
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rendered_regions_downsample_into_coarser_level() {
    let registry = Arc::new(TileRegistry::default());
    let config = PyramidConfig {
        worker_count: 2,
        ..PyramidConfig::default()
    };
    let scheduler = RenderScheduler::new(
        Arc::clone(&registry),
        Arc::new(DebugRenderer::new()),
        config,
    );
    scheduler.start();

    let regions = [pos(0, 0), pos(1, 0), pos(0, 1), pos(1, 1), pos(2, 0)];
    scheduler.reload(regions).await;
    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);
    scheduler.shutdown().await;

    assert!(registry.refresh(1, Frustum::everything(), usize::MAX).await);

    let tl = registry.image(TileAddress::region(pos(0, 0))).await;
    let tr = registry.image(TileAddress::region(pos(1, 0))).await;
    let bl = registry.image(TileAddress::region(pos(0, 1))).await;
    let br = registry.image(TileAddress::region(pos(1, 1))).await;
    let expected = downsample(tl.as_deref(), tr.as_deref(), bl.as_deref(), br.as_deref());
    let actual = registry
        .image(TileAddress::new(1, pos(0, 0)))
        .await
        .unwrap();
    assert!(*actual == expected);

    // (1, 0) at level 1 only has its top-left child
    let partial = registry
        .image(TileAddress::new(1, pos(1, 0)))
        .await
        .unwrap();
    assert_eq!(partial.pixel(0, 0)[3], 255);
    assert_eq!(partial.pixel(300, 0)[3], 0);
    assert_eq!(partial.pixel(0, 300)[3], 0);

    for tile in registry.level(1).unwrap().values() {
        assert_eq!(tile.current_state(), TileState::Valid);
    }
}

#[tokio::test]
async fn test_unrendered_children_leave_transparent_quadrants() {
    let registry = TileRegistry::default();
    registry.reload([pos(0, 0), pos(1, 1)]).await;
    registry.set_image(pos(1, 1), solid(60)).await.unwrap();

    assert!(registry.refresh(1, Frustum::everything(), 1).await);

    let parent = registry
        .image(TileAddress::new(1, pos(0, 0)))
        .await
        .unwrap();
    assert_eq!(parent.pixel(10, 10)[3], 0);
    assert_eq!(parent.pixel(400, 400), Rgba([60, 60, 60, 255]));
}
