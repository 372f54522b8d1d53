//! Render scheduler integration tests.
//!
//! Tests verify:
//! - Regions nearest to the focus point render first
//! - Invalidation during a render forces exactly one more render
//! - Failed and panicking renders are retried
//! - No region is ever rendered twice at the same time
//! - Results from before a reload are discarded

use std::sync::Arc;
use std::time::Duration;

use blockmap_tiles::{Frustum, RenderEvent, RenderStatus, TileAddress, TileState};

use super::test_utils::{pos, scheduler_with, test_config, within, MockRenderer};

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_nearest_region_rendered_first() {
    let renderer = Arc::new(MockRenderer::new());
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    // middle of region (0, 0) in world pixels
    scheduler.set_focus_world(256.0, 256.0);
    scheduler.start();

    scheduler.reload([pos(1, 0), pos(0, 0)]).await;
    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);

    assert_eq!(renderer.calls(), vec![pos(0, 0), pos(1, 0)]);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_focus_moves_render_order() {
    let renderer = Arc::new(MockRenderer::new());
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    scheduler.set_focus(5.0, 0.0);
    scheduler.start();

    scheduler.reload([pos(0, 0), pos(1, 0), pos(4, 0)]).await;
    within(scheduler.wait_until_settled()).await;

    assert_eq!(renderer.calls(), vec![pos(4, 0), pos(1, 0), pos(0, 0)]);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_equal_distance_breaks_ties_by_position() {
    let renderer = Arc::new(MockRenderer::new());
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    scheduler.set_focus(0.5, 0.0);
    scheduler.start();

    scheduler.reload([pos(1, 0), pos(0, 0)]).await;
    within(scheduler.wait_until_settled()).await;

    assert_eq!(renderer.calls(), vec![pos(0, 0), pos(1, 0)]);
    scheduler.shutdown().await;
}

// =============================================================================
// State machine under the scheduler
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalidation_during_render_renders_once_more() {
    let renderer = Arc::new(MockRenderer::new());
    renderer.gate(pos(0, 0));
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(2));
    scheduler.start();

    scheduler.reload([pos(0, 0)]).await;
    renderer.wait_for_calls(pos(0, 0), 1).await;

    let tile = scheduler.registry().get(0, pos(0, 0)).unwrap();
    assert_eq!(tile.current_state(), TileState::Drawing);

    scheduler.invalidate_all();
    scheduler.invalidate_all();
    assert_eq!(tile.current_state(), TileState::Redraw);

    renderer.open(pos(0, 0), 2);
    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);

    assert_eq!(renderer.call_count(pos(0, 0)), 2);
    assert_eq!(tile.current_state(), TileState::Valid);
    let image = scheduler
        .registry()
        .image(TileAddress::region(pos(0, 0)))
        .await
        .unwrap();
    assert!(*image == MockRenderer::image_for(pos(0, 0), 2));
    assert_eq!(scheduler.registry().progress(), (1, 1));

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_concurrent_renders_of_same_region() {
    let renderer = Arc::new(MockRenderer::with_delay(Duration::from_millis(1)));
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(8));
    scheduler.start();

    let regions: Vec<_> = (0..10).flat_map(|x| (0..5).map(move |y| pos(x, y))).collect();
    scheduler.reload(regions.clone()).await;
    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);

    assert!(!renderer.saw_overlap());
    for region in regions {
        assert_eq!(renderer.call_count(region), 1, "region {}", region);
    }
    assert_eq!(scheduler.progress(), 1.0);

    scheduler.shutdown().await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_render_is_retried() {
    let renderer = Arc::new(MockRenderer::new());
    renderer.fail(pos(3, 3), 2);
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    let mut events = scheduler.subscribe();
    scheduler.start();

    scheduler.reload([pos(3, 3)]).await;
    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);

    assert_eq!(renderer.call_count(pos(3, 3)), 3);

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if let RenderEvent::RenderFailed { position, .. } = event {
            assert_eq!(position, pos(3, 3));
            failures += 1;
        }
    }
    assert_eq!(failures, 2);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_panicking_render_is_retried() {
    let renderer = Arc::new(MockRenderer::new());
    renderer.panic_on(pos(2, 1), 1);
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    let mut events = scheduler.subscribe();
    scheduler.start();

    scheduler.reload([pos(2, 1), pos(4, 4)]).await;
    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);

    // the only worker survived the panic and went on to render everything
    assert_eq!(renderer.call_count(pos(2, 1)), 2);
    assert_eq!(renderer.call_count(pos(4, 4)), 1);
    let tile = scheduler.registry().get(0, pos(2, 1)).unwrap();
    assert_eq!(tile.current_state(), TileState::Valid);
    assert_eq!(scheduler.progress(), 1.0);

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if let RenderEvent::RenderFailed { position, .. } = event {
            assert_eq!(position, pos(2, 1));
            failures += 1;
        }
    }
    assert_eq!(failures, 1);

    scheduler.shutdown().await;
}

// =============================================================================
// Progress, events and reload
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_progress_reaches_one_only_when_all_valid() {
    let renderer = Arc::new(MockRenderer::new());
    renderer.gate(pos(0, 0));
    renderer.gate(pos(5, 5));
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(2));
    let mut events = scheduler.subscribe();
    scheduler.start();

    scheduler.reload([pos(0, 0), pos(5, 5)]).await;
    assert_eq!(scheduler.progress(), 0.0);
    assert_eq!(scheduler.status(), RenderStatus::Rendering);

    renderer.open(pos(0, 0), 1);
    within(async {
        loop {
            if let Ok(RenderEvent::Progress { rendered: 1, total: 2 }) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert_eq!(scheduler.progress(), 0.5);
    assert_eq!(scheduler.status(), RenderStatus::Rendering);

    renderer.open(pos(5, 5), 1);
    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);
    assert_eq!(scheduler.progress(), 1.0);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_events_and_metadata_published() {
    let renderer = Arc::new(MockRenderer::new());
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    let mut events = scheduler.subscribe();
    scheduler.start();

    scheduler.reload([pos(2, -1)]).await;
    within(scheduler.wait_until_settled()).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&RenderEvent::ImageChanged(pos(2, -1))));
    assert!(seen.contains(&RenderEvent::MetadataChanged(pos(2, -1))));
    assert!(seen.contains(&RenderEvent::Progress {
        rendered: 1,
        total: 1
    }));

    let metadata = scheduler.chunk_metadata(pos(2, -1)).unwrap();
    assert_eq!(metadata.get(&pos(2, -1)), Some(&1));

    scheduler.invalidate_all();
    assert!(scheduler.chunk_metadata(pos(2, -1)).is_none());
    within(scheduler.wait_until_settled()).await;
    assert_eq!(
        scheduler.chunk_metadata(pos(2, -1)).unwrap().get(&pos(2, -1)),
        Some(&2)
    );

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reload_discards_stale_render() {
    let renderer = Arc::new(MockRenderer::new());
    renderer.gate(pos(0, 0));
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(2));
    scheduler.start();

    scheduler.reload([pos(0, 0)]).await;
    renderer.wait_for_calls(pos(0, 0), 1).await;

    // the first render is still blocked when the world is reloaded
    scheduler.reload([pos(0, 0)]).await;
    renderer.wait_for_calls(pos(0, 0), 2).await;
    renderer.open(pos(0, 0), 2);

    assert_eq!(within(scheduler.wait_until_settled()).await, RenderStatus::Done);
    // give the stale render time to finish
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(scheduler.registry().progress(), (1, 1));
    assert_eq!(scheduler.registry().generation(), 2);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_rendering() {
    let renderer = Arc::new(MockRenderer::new());
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(2));
    scheduler.start();
    scheduler.shutdown().await;
    assert_eq!(scheduler.status(), RenderStatus::Stopped);

    scheduler.reload([pos(0, 0)]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(renderer.calls().is_empty());
    assert_eq!(scheduler.status(), RenderStatus::Stopped);
}

#[tokio::test]
async fn test_close_releases_registry() {
    let renderer = Arc::new(MockRenderer::new());
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    scheduler.start();
    scheduler.reload([pos(0, 0)]).await;
    within(scheduler.wait_until_settled()).await;

    scheduler.close().await;

    assert!(scheduler.registry().is_empty());
    assert_eq!(scheduler.registry().cache_stats().primary_entries, 0);
    assert!(scheduler.chunk_metadata(pos(0, 0)).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticker_refreshes_visible_level() {
    let renderer = Arc::new(MockRenderer::new());
    let scheduler = scheduler_with(Arc::clone(&renderer), test_config(1));
    scheduler.set_view(1, Frustum::everything());
    let mut events = scheduler.subscribe();
    scheduler.start();

    scheduler.reload([pos(0, 0), pos(1, 1)]).await;
    within(scheduler.wait_until_settled()).await;

    let expected_tl = MockRenderer::image_for(pos(0, 0), 1).pixel(0, 0);
    let expected_br = MockRenderer::image_for(pos(1, 1), 1).pixel(0, 0);
    // an early tick may have derived the parent before both children existed
    within(async {
        loop {
            if let Ok(RenderEvent::LevelRefreshed(1)) = events.recv().await {
                let parent = scheduler
                    .registry()
                    .image(TileAddress::new(1, pos(0, 0)))
                    .await;
                if let Some(parent) = parent {
                    if parent.pixel(0, 0) == expected_tl && parent.pixel(300, 300) == expected_br {
                        break;
                    }
                }
            }
        }
    })
    .await;

    scheduler.shutdown().await;
}
