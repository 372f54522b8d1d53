//! blockmap-tiles - render a voxel world into a tile pyramid.
//!
//! `render` lists the regions of a world directory, renders them with the
//! debug renderer, derives the requested coarser levels and writes every tile
//! as `<out>/<level>/<x>_<z>.png`. `check` validates the configuration and
//! lists the regions found.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blockmap_tiles::{
    config::{CheckConfig, Cli, Command, RenderConfig, SummaryFormat},
    CacheStats, DebugRenderer, Frustum, RegionDirectory, RegionSource, RenderScheduler,
    RenderStatus, TileAddress, TileRegistry,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Render(config) => run_render(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "blockmap_tiles=debug"
    } else {
        "blockmap_tiles=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Render Command
// =============================================================================

#[derive(Debug, Serialize)]
struct RenderSummary {
    regions: usize,
    levels: Vec<LevelSummary>,
    status: RenderStatus,
    elapsed_ms: u128,
    cache: CacheStats,
}

#[derive(Debug, Serialize)]
struct LevelSummary {
    level: i32,
    tiles_written: usize,
}

async fn run_render(config: RenderConfig) -> ExitCode {
    let pyramid = match config.validate() {
        Ok(pyramid) => pyramid,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let regions = match RegionDirectory::new(&config.world).list_regions().await {
        Ok(regions) => regions,
        Err(e) => {
            error!("Failed to list regions in {}: {}", config.world.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Found {} region(s) in {}",
        regions.len(),
        config.world.display()
    );

    let started = Instant::now();
    let registry = Arc::new(TileRegistry::new(pyramid.store_config()));
    let scheduler = RenderScheduler::new(
        Arc::clone(&registry),
        Arc::new(DebugRenderer::new()),
        pyramid,
    );

    scheduler.start();
    scheduler.reload(regions.iter().copied()).await;
    let status = scheduler.wait_until_settled().await;
    scheduler.shutdown().await;
    info!("Rendering finished: {}", status);

    let mut levels = Vec::new();
    for level in 0..=config.zoom_out as i32 {
        if level > 0 {
            registry.refresh(level, Frustum::everything(), usize::MAX).await;
        }
        match write_level(&registry, level, &config.out).await {
            Ok(tiles_written) => levels.push(LevelSummary {
                level,
                tiles_written,
            }),
            Err(e) => {
                error!("Failed to write level {}: {}", level, e);
                return ExitCode::FAILURE;
            }
        }
    }

    let summary = RenderSummary {
        regions: regions.len(),
        levels,
        status,
        elapsed_ms: started.elapsed().as_millis(),
        cache: registry.cache_stats(),
    };
    registry.close().await;

    print_summary(&summary, config.format)
}

/// Write every cached tile of a level. Returns the number of files written.
async fn write_level(registry: &TileRegistry, level: i32, out: &Path) -> Result<usize, String> {
    let tiles = registry.level(level).map_err(|e| e.to_string())?;
    let dir = out.join(level.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| format!("{}: {}", dir.display(), e))?;

    let mut positions: Vec<_> = tiles.keys().copied().collect();
    positions.sort();

    let mut written = 0;
    for position in positions {
        let Some(image) = registry.image(TileAddress::new(level, position)).await else {
            continue;
        };
        let png = image.encode_png().map_err(|e| e.to_string())?;
        let path = dir.join(format!("{}_{}.png", position.x, position.y));
        tokio::fs::write(&path, &png)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        written += 1;
    }

    info!("Level {}: wrote {} tile(s) to {}", level, written, dir.display());
    Ok(written)
}

fn print_summary(summary: &RenderSummary, format: SummaryFormat) -> ExitCode {
    match format {
        SummaryFormat::Json => match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize summary: {}", e);
                return ExitCode::FAILURE;
            }
        },
        SummaryFormat::Text => {
            println!("Regions:  {}", summary.regions);
            println!("Status:   {}", summary.status);
            println!("Elapsed:  {} ms", summary.elapsed_ms);
            for level in &summary.levels {
                println!("Level {:>3}: {} tile(s)", level.level, level.tiles_written);
            }
            println!(
                "Cache:    {} primary, {} derived, {} overflow ({} bytes)",
                summary.cache.primary_entries,
                summary.cache.derived_entries,
                summary.cache.overflow_entries,
                summary.cache.overflow_bytes
            );
        }
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    let pyramid = config.pyramid.to_config();
    if let Err(e) = pyramid.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    info!("Configuration OK ({} workers)", pyramid.worker_count);

    let regions = match RegionDirectory::new(&config.world).list_regions().await {
        Ok(regions) => regions,
        Err(e) => {
            error!("Failed to list regions in {}: {}", config.world.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if regions.is_empty() {
        info!("No regions found in {}", config.world.display());
        return ExitCode::SUCCESS;
    }

    let min_x = regions.iter().map(|p| p.x).min().unwrap_or(0);
    let max_x = regions.iter().map(|p| p.x).max().unwrap_or(0);
    let min_z = regions.iter().map(|p| p.y).min().unwrap_or(0);
    let max_z = regions.iter().map(|p| p.y).max().unwrap_or(0);

    info!("Found {} region(s)", regions.len());
    info!("  x: {} .. {}", min_x, max_x);
    info!("  z: {} .. {}", min_z, max_z);
    for region in &regions {
        println!("r.{}.{}.mca", region.x, region.y);
    }

    ExitCode::SUCCESS
}
