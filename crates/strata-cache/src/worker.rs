//! Fetch worker loop and tile write-back.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use strata_elevation::ElevationContext;
use strata_geo::{Envelope, Srid};
use strata_mesh::{BuildError, TerrainTile, TileBuilder};
use tracing::{debug, info, warn};

use crate::queue::FetchTask;
use crate::scheduler::TreeState;
use crate::service::Shared;
use crate::settings::CacheSettings;

/// A finished fetch waiting to be written back under the tree lock.
pub struct FetchOutcome {
    pub task: FetchTask,
    /// Level of the node when the fetch started.
    pub level: u32,
    pub source_version: i64,
    pub result: Result<TerrainTile, BuildError>,
}

/// Build the tile of a node: sampled from elevation sources at or below the
/// terrain level, flat above it.
pub fn build_tile(
    builder: &TileBuilder,
    elevation: &ElevationContext,
    settings: &CacheSettings,
    bounds: &Envelope,
    level: u32,
    srid: Srid,
) -> Result<TerrainTile, BuildError> {
    if settings.samples_elevation(level) {
        builder.fetch(elevation, bounds, srid, settings.fetch_resolution(level))
    } else {
        builder.flat(bounds, srid)
    }
}

/// Store a finished fetch in its node, if the node is still alive.
///
/// Returns whether the tree changed.
pub fn write_back(state: &mut TreeState, outcome: FetchOutcome, settings: &CacheSettings) -> bool {
    let id = outcome.task.node;
    match outcome.result {
        Ok(tile) => {
            let copy_z = settings.copies_z_bounds(outcome.level);
            state
                .tree
                .store_fetched(id, tile, outcome.source_version, copy_z)
        }
        Err(err) => {
            warn!(level = outcome.level, error = %err, "tile fetch failed");
            if let Some(node) = state.tree.get_mut(id) {
                node.queued = false;
            }
            false
        }
    }
}

/// Body of a fetch worker thread.
///
/// The previous result is written back under the same lock acquisition that
/// picks the next request. Frustum tests and tile building run unlocked.
pub(crate) fn run_worker(shared: Arc<Shared>) {
    info!("fetch worker started");
    let mut finished: Option<FetchOutcome> = None;
    let mut state = shared.lock_tree();

    loop {
        if let Some(outcome) = finished.take()
            && write_back(&mut state, outcome, &shared.settings)
        {
            shared.quadtree_version.fetch_add(1, Ordering::AcqRel);
            shared.wake_collector();
        }

        if shared.terminate.load(Ordering::Acquire) {
            break;
        }

        let Some((scene, source_version)) = shared.current_view() else {
            state = shared.wait_for_work(state);
            continue;
        };
        if state.queue.is_empty() {
            state = shared.wait_for_work(state);
            continue;
        }
        if shared.resort.swap(false, Ordering::AcqRel) {
            state.queue.mark_unsorted();
        }
        let Some(task) = state.queue.pop(&scene.camera_geo()) else {
            continue;
        };
        let Some(node) = state.tree.get(task.node) else {
            // Freed by a reset after it was queued.
            continue;
        };
        let (bounds, level, srid) = (node.bounds, node.level, node.srid);
        let visibility_bounds = node
            .parent
            .and_then(|parent| state.tree.get(parent))
            .map_or(bounds, |parent| parent.bounds);
        drop(state);

        if !scene.intersects(&visibility_bounds) {
            state = shared.lock_tree();
            if let Some(node) = state.tree.get_mut(task.node) {
                node.queued = false;
            }
            debug!(level, "dropped fetch outside the view");
            continue;
        }

        let result = build_tile(
            &shared.builder,
            &shared.elevation,
            &shared.settings,
            &bounds,
            level,
            srid,
        );
        debug!(
            level,
            lng = bounds.center_x(),
            lat = bounds.center_y(),
            ok = result.is_ok(),
            "tile fetched"
        );
        finished = Some(FetchOutcome {
            task,
            level,
            source_version,
            result,
        });
        state = shared.lock_tree();
    }

    drop(state);
    info!("fetch worker stopped");
}
