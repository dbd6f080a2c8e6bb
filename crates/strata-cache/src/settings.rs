//! Runtime settings resolved from [`strata_config::Config`].

use std::time::Duration;

use strata_config::Config;
use strata_geo::{MAX_TILE_LEVEL, map_tile_resolution};
use strata_mesh::BuildOptions;

/// Tunables the collector and fetch workers read on every pass.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub sse_threshold: f64,
    pub max_level: u32,
    pub terrain_level: u32,
    pub derive_enabled: bool,
    pub source_poll_interval: Duration,
    /// Resolved worker count, never zero.
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub resolution_adjustment: f64,
}

impl CacheSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sse_threshold: config.cache.sse_threshold,
            max_level: config.cache.max_level.min(MAX_TILE_LEVEL),
            terrain_level: config.cache.terrain_level,
            derive_enabled: config.cache.derive_enabled,
            source_poll_interval: Duration::from_millis(config.cache.source_poll_interval_ms.max(1)),
            worker_count: resolve_worker_count(config.fetch.worker_count),
            queue_capacity: config.fetch.queue_capacity.max(1),
            resolution_adjustment: config.fetch.resolution_adjustment,
        }
    }

    /// Post spacing in meters requested when fetching a tile at `level`.
    pub fn fetch_resolution(&self, level: u32) -> f64 {
        map_tile_resolution(level, 0.0) * self.resolution_adjustment
    }

    /// Whether tiles at `level` are sampled from elevation sources rather
    /// than built flat.
    pub fn samples_elevation(&self, level: u32) -> bool {
        level >= self.terrain_level
    }

    /// Whether a fetched tile at `level` narrows its node's elevation range.
    /// Tiles at the terrain level itself keep the initial range.
    pub fn copies_z_bounds(&self, level: u32) -> bool {
        level > self.terrain_level
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Tile builder options for a config.
pub fn build_options(config: &Config) -> BuildOptions {
    BuildOptions {
        num_posts: config.mesh.num_posts,
        skirt_height: config.mesh.skirt_height,
        block_count: config.pool.block_count,
        heap_fallback: config.pool.heap_fallback,
        constrain_query_res: config.fetch.constrain_query_res,
        fill_with_hi_res: config.fetch.fill_with_hi_res,
    }
}

/// `0` leaves two cores for the render and collector threads.
pub fn resolve_worker_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    let cpus = num_cpus::get().max(2);
    (cpus - 2).max(1)
}
