//! Level-of-detail selection over the quadtree.
//!
//! A pass walks the tree from the roots, refining wherever a node's
//! projected screen-space error exceeds the threshold, and emits exactly one
//! tile for every leaf of the selected cut. Missing children are queued for
//! fetching; while they are outstanding, a quadrant is either emitted whole
//! at the parent's level or filled with tiles derived from the nearest
//! ancestor holding real data.
//!
//! Tiles the pass has to build itself (flat roots, synchronous fetches of
//! the coarsest levels, derived tiles) are only planned under the tree lock.
//! [`PassPlan::build`] runs without it and [`BuiltPass::finish`] stores the
//! results once the lock is taken again.

use std::sync::Arc;

use strata_elevation::ElevationContext;
use strata_geo::{Envelope, SceneModel, Srid, geometric_error, screen_space_error};
use strata_mesh::{BuildError, TerrainTile, TileBuilder};
use tracing::{trace, warn};

use crate::error::CacheError;
use crate::node::{DeriveSource, INITIAL_MAX_Z, INITIAL_MIN_Z, NodeId, Quadrant};
use crate::scheduler::{FetchWorkers, TreeState};
use crate::settings::CacheSettings;
use crate::worker::build_tile;

/// Tile work deferred until the tree lock is released.
enum TileJob {
    /// Flat tile for a root outside the view.
    Flat { id: NodeId, bounds: Envelope },
    /// Synchronous fetch of a coarse node.
    Fetch {
        id: NodeId,
        bounds: Envelope,
        level: u32,
    },
    Derive {
        id: NodeId,
        bounds: Envelope,
        source: DeriveSource,
    },
}

impl TileJob {
    fn build(
        &self,
        builder: &TileBuilder,
        elevation: &ElevationContext,
        settings: &CacheSettings,
        srid: Srid,
    ) -> Result<TerrainTile, BuildError> {
        match self {
            TileJob::Flat { bounds, .. } => builder.flat(bounds, srid),
            TileJob::Fetch { bounds, level, .. } => {
                build_tile(builder, elevation, settings, bounds, *level, srid)
            }
            TileJob::Derive { bounds, source, .. } => builder.derive(&source.tile, bounds, srid),
        }
    }
}

/// The outcome of a pass over the locked tree: the nodes of the selected cut
/// and the tiles still to be built for them.
pub struct PassPlan {
    srid: Srid,
    source_version: i64,
    emitted: Vec<NodeId>,
    jobs: Vec<TileJob>,
}

impl PassPlan {
    /// Number of tiles the pass has to build itself.
    pub fn pending_builds(&self) -> usize {
        self.jobs.len()
    }

    /// Build the planned tiles. Call without holding the tree lock.
    pub fn build(
        self,
        builder: &TileBuilder,
        elevation: &ElevationContext,
        settings: &CacheSettings,
    ) -> BuiltPass {
        let srid = self.srid;
        let built = self
            .jobs
            .into_iter()
            .map(|job| {
                let result = job.build(builder, elevation, settings, srid);
                (job, result)
            })
            .collect();
        BuiltPass {
            source_version: self.source_version,
            emitted: self.emitted,
            built,
        }
    }
}

/// Planned tiles, built and waiting to be stored.
pub struct BuiltPass {
    source_version: i64,
    emitted: Vec<NodeId>,
    built: Vec<(TileJob, Result<TerrainTile, BuildError>)>,
}

impl BuiltPass {
    /// Store the built tiles and return the tiles of the selected cut.
    ///
    /// A node that received a newer fetched tile in the meantime keeps it.
    pub fn finish(self, state: &mut TreeState, settings: &CacheSettings) -> Vec<Arc<TerrainTile>> {
        for (job, result) in self.built {
            let tile = match result {
                Ok(tile) => tile,
                Err(err) => {
                    let (TileJob::Flat { id, .. }
                    | TileJob::Fetch { id, .. }
                    | TileJob::Derive { id, .. }) = job;
                    let level = state.tree.get(id).map(|node| node.level);
                    warn!(?level, error = %err, "collector tile build failed");
                    continue;
                }
            };
            match job {
                TileJob::Flat { id, .. } => {
                    state.tree.store_fetched(id, tile, self.source_version, false);
                }
                TileJob::Fetch { id, level, .. } => {
                    let copy_z = settings.copies_z_bounds(level);
                    state
                        .tree
                        .store_fetched(id, tile, self.source_version, copy_z);
                }
                TileJob::Derive { id, source, .. } => {
                    state.tree.store_derived(id, tile, &source);
                }
            }
        }

        self.emitted
            .iter()
            .filter_map(|id| state.tree.get(*id)?.tile.clone())
            .collect()
    }
}

/// One LOD pass over a locked tree.
pub struct Collector<'a> {
    state: &'a mut TreeState,
    scene: &'a SceneModel,
    srid: Srid,
    source_version: i64,
    settings: &'a CacheSettings,
    workers: &'a dyn FetchWorkers,
    emitted: Vec<NodeId>,
    jobs: Vec<TileJob>,
}

impl<'a> Collector<'a> {
    pub fn new(
        state: &'a mut TreeState,
        scene: &'a SceneModel,
        srid: Srid,
        source_version: i64,
        settings: &'a CacheSettings,
        workers: &'a dyn FetchWorkers,
    ) -> Self {
        Self {
            state,
            scene,
            srid,
            source_version,
            settings,
            workers,
            emitted: Vec::new(),
            jobs: Vec::new(),
        }
    }

    /// Collect every root. Roots outside the view are emitted whole, with a
    /// flat tile if they have none yet.
    pub fn collect_roots(&mut self, allow_derive: bool) {
        for root in self.state.tree.roots() {
            let Some(node) = self.state.tree.get(root) else {
                continue;
            };
            if self.scene.intersects(&node.bounds) {
                self.collect(root, None, allow_derive, true);
                continue;
            }
            if node.tile.is_none() {
                let bounds = node.bounds;
                self.jobs.push(TileJob::Flat { id: root, bounds });
            }
            self.state.reset(root, false);
            self.emitted.push(root);
        }
    }

    /// Collect the subtree at `id`. Returns `false` when nothing could be
    /// emitted for it.
    pub fn collect(
        &mut self,
        id: NodeId,
        mut derive_source: Option<DeriveSource>,
        allow_derive: bool,
        allow_fetch: bool,
    ) -> bool {
        let Some(node) = self.state.tree.get(id) else {
            return false;
        };
        let (level, bounds) = (node.level, node.bounds);

        if self.should_recurse(level, &bounds) {
            let footprints = bounds.quadrants();
            let wants: [bool; 4] = std::array::from_fn(|i| {
                let child_bounds = self
                    .state
                    .tree
                    .child(id, Quadrant::ALL[i])
                    .and_then(|child| self.state.tree.get(child))
                    .map_or_else(
                        || footprints[i].with_z(INITIAL_MIN_Z, INITIAL_MAX_Z),
                        |child| child.bounds,
                    );
                self.should_recurse(level + 1, &child_bounds)
            });

            let mut children = Vec::with_capacity(4);
            for quadrant in Quadrant::ALL {
                let Some(child) = self.state.tree.ensure_child(id, quadrant) else {
                    return false;
                };
                let queued = self.state.tree.get(child).is_some_and(|c| c.queued);
                if allow_fetch
                    && !queued
                    && self
                        .state
                        .tree
                        .needs_fetch(Some(child), self.srid, self.source_version)
                {
                    self.enqueue(child);
                }
                children.push(child);
            }

            if level == 0 && allow_derive && derive_source.is_none() {
                derive_source = self.real_tile(id);
            }

            let all_have_tiles = children
                .iter()
                .all(|child| self.state.tree.get(*child).is_some_and(|c| c.tile.is_some()));
            let recurse = wants.iter().any(|w| *w) && (all_have_tiles || derive_source.is_some());

            if recurse {
                let recurse_fetch = allow_fetch
                    && children.iter().all(|child| {
                        self.state
                            .tree
                            .get(*child)
                            .is_some_and(|c| c.source_version == self.source_version)
                    });
                if allow_derive && let Some(source) = self.real_tile(id) {
                    derive_source = Some(source);
                }

                for (child, wants_recursion) in children.into_iter().zip(wants) {
                    if wants_recursion {
                        self.collect(child, derive_source.clone(), allow_derive, recurse_fetch);
                        continue;
                    }
                    self.state.reset(child, false);
                    // Any tile behind the derive source is replaced, fetched or not.
                    if allow_derive
                        && let Some(source) = &derive_source
                        && self.lags_source(child, source, false)
                    {
                        self.derive(child, source);
                    }
                    self.emitted.push(child);
                }
                return true;
            }

            for (child, wants_recursion) in children.into_iter().zip(wants) {
                if !wants_recursion {
                    self.state.reset(child, false);
                }
            }
        }

        let mut pending = false;
        if self
            .state
            .tree
            .needs_fetch(Some(id), self.srid, self.source_version)
        {
            if level <= 1 {
                pending = self.fetch_now(id);
            } else if allow_fetch {
                self.enqueue(id);
            }
        }

        if !pending
            && allow_derive
            && let Some(source) = &derive_source
            && self.lags_source(id, source, true)
        {
            pending = self.derive(id, source);
        }

        if !pending && self.state.tree.get(id).is_none_or(|node| node.tile.is_none()) {
            warn!(
                error = %CacheError::IllegalState { level },
                "nothing to emit for node"
            );
            return false;
        }
        self.emitted.push(id);
        true
    }

    /// Finish the pass, handing over the cut and the tiles still to build.
    pub fn into_plan(self) -> PassPlan {
        PassPlan {
            srid: self.srid,
            source_version: self.source_version,
            emitted: self.emitted,
            jobs: self.jobs,
        }
    }

    fn should_recurse(&self, level: u32, bounds: &Envelope) -> bool {
        if level >= self.settings.max_level {
            return false;
        }
        let error = geometric_error(level, bounds, self.srid.is_globe());
        screen_space_error(self.scene, bounds, error) > self.settings.sse_threshold
            && self.scene.intersects(bounds)
    }

    /// The node's tile as a derive source, if it holds real data.
    fn real_tile(&self, id: NodeId) -> Option<DeriveSource> {
        let node = self.state.tree.get(id)?;
        if node.derived {
            return None;
        }
        Some(DeriveSource {
            tile: Arc::clone(node.tile.as_ref()?),
            version: node.source_version,
        })
    }

    /// Whether the node has no tile, or one older than a tile derived from
    /// `source` would be. With `derived_only` a fetched tile is never
    /// considered stale.
    fn lags_source(&self, id: NodeId, source: &DeriveSource, derived_only: bool) -> bool {
        self.state.tree.get(id).is_some_and(|node| {
            node.tile.is_none()
                || ((node.derived || !derived_only)
                    && node.source_version < source.derived_version())
        })
    }

    fn enqueue(&mut self, id: NodeId) {
        match self.state.enqueue(id, self.workers) {
            Ok(_) => {}
            Err(CacheError::QueueSaturated { capacity }) => {
                trace!(capacity, "fetch queue saturated");
            }
            Err(err) => warn!(error = %err, "fetch request failed"),
        }
    }

    /// Plan a fetch of the node's tile by the collector itself.
    fn fetch_now(&mut self, id: NodeId) -> bool {
        self.state.abort(id);
        let Some(node) = self.state.tree.get(id) else {
            return false;
        };
        let (bounds, level) = (node.bounds, node.level);
        self.jobs.push(TileJob::Fetch { id, bounds, level });
        true
    }

    fn derive(&mut self, id: NodeId, source: &DeriveSource) -> bool {
        let Some(node) = self.state.tree.get(id) else {
            return false;
        };
        if node.tile.is_some() && node.source_version >= source.version {
            return false;
        }
        let bounds = node.bounds;
        self.jobs.push(TileJob::Derive {
            id,
            bounds,
            source: source.clone(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FetchTask;
    use crate::scheduler::tests::RecordingWorkers;
    use crate::worker::{FetchOutcome, write_back};
    use strata_elevation::GridSource;
    use strata_geo::GeoPoint;
    use strata_mesh::BuildOptions;

    struct Harness {
        state: TreeState,
        settings: CacheSettings,
        builder: TileBuilder,
        elevation: ElevationContext,
        workers: RecordingWorkers,
        source_version: i64,
    }

    impl Harness {
        fn new(elevation: ElevationContext) -> Self {
            Self {
                state: TreeState::new(Srid::Wgs84, 225),
                settings: CacheSettings {
                    max_level: 6,
                    terrain_level: 3,
                    ..CacheSettings::default()
                },
                builder: TileBuilder::new(BuildOptions {
                    num_posts: 8,
                    block_count: 64,
                    ..BuildOptions::default()
                })
                .unwrap(),
                elevation,
                workers: RecordingWorkers::default(),
                source_version: 0,
            }
        }

        fn pass(&mut self, scene: &SceneModel, allow_derive: bool) -> Vec<Arc<TerrainTile>> {
            let mut collector = Collector::new(
                &mut self.state,
                scene,
                Srid::Wgs84,
                self.source_version,
                &self.settings,
                &self.workers,
            );
            collector.collect_roots(allow_derive);
            let plan = collector.into_plan();
            let built = plan.build(&self.builder, &self.elevation, &self.settings);
            built.finish(&mut self.state, &self.settings)
        }

        /// Build and write back every queued request, as the workers would.
        fn drain(&mut self, camera: &GeoPoint) -> usize {
            let mut count = 0;
            while let Some(task) = self.state.queue.pop(camera) {
                if let Some(outcome) = self.fetch(task) {
                    write_back(&mut self.state, outcome, &self.settings);
                    count += 1;
                }
            }
            count
        }

        fn fetch(&self, task: FetchTask) -> Option<FetchOutcome> {
            let node = self.state.tree.get(task.node)?;
            let result = build_tile(
                &self.builder,
                &self.elevation,
                &self.settings,
                &node.bounds,
                node.level,
                node.srid,
            );
            Some(FetchOutcome {
                level: node.level,
                task,
                source_version: 0,
                result,
            })
        }
    }

    fn overhead(lat: f64, lng: f64, altitude: f64) -> SceneModel {
        SceneModel::look_at(
            Srid::Wgs84,
            GeoPoint::with_altitude(lat, lng, altitude),
            GeoPoint::new(lat, lng),
            45.0,
            1920.0,
            1080.0,
        )
    }

    fn covered_area(tiles: &[Arc<TerrainTile>]) -> f64 {
        tiles
            .iter()
            .map(|tile| tile.bounds().width() * tile.bounds().height())
            .sum()
    }

    fn patch_context() -> ElevationContext {
        let context = ElevationContext::new();
        let world = GridSource::from_fn(
            "world",
            Envelope::from_degrees(-180.0, -90.0, 180.0, 90.0),
            5,
            3,
            |_, _| 100.0,
        )
        .unwrap();
        let patch = GridSource::from_fn(
            "patch",
            Envelope::from_degrees(20.0, 10.0, 21.0, 11.0),
            11,
            11,
            |_, _| 1500.0,
        )
        .unwrap();
        context.attach(Arc::new(world));
        context.attach(Arc::new(patch));
        context
    }

    /// The first pass emits the eight roots, flat, and queues children under
    /// the camera.
    #[test]
    fn test_first_pass_emits_roots() {
        let mut harness = Harness::new(ElevationContext::new());
        let scene = overhead(10.5, 20.5, 400_000.0);
        let tiles = harness.pass(&scene, true);

        assert_eq!(tiles.len(), 8);
        assert!(tiles.iter().all(|tile| !tile.has_data()));
        assert_eq!(covered_area(&tiles), 360.0 * 180.0);
        assert!(!harness.state.queue.is_empty());
    }

    /// Every pass covers the globe exactly once while detail streams in.
    #[test]
    fn test_passes_never_leave_holes() {
        let mut harness = Harness::new(patch_context());
        let scene = overhead(10.5, 20.5, 400_000.0);
        let camera = scene.camera_geo();

        let mut finest = 0.0_f64;
        for _ in 0..10 {
            let tiles = harness.pass(&scene, true);
            assert!((covered_area(&tiles) - 360.0 * 180.0).abs() < 1e-6);
            finest = tiles
                .iter()
                .map(|tile| tile.bounds().width())
                .fold(f64::INFINITY, f64::min);
            if harness.drain(&camera) == 0 {
                break;
            }
        }
        // Refined down to the deepest allowed level under the camera.
        assert!((finest - 90.0 / 64.0).abs() < 1e-9);
    }

    /// Once refined, the tile under the camera carries the patch's heights.
    #[test]
    fn test_refined_tiles_sample_finest_source() {
        let mut harness = Harness::new(patch_context());
        let scene = overhead(10.5, 20.5, 400_000.0);
        let camera = scene.camera_geo();

        let mut tiles = Vec::new();
        for _ in 0..10 {
            tiles = harness.pass(&scene, true);
            if harness.drain(&camera) == 0 {
                break;
            }
        }
        let world = crate::snapshot::WorldTerrain::new(Srid::Wgs84, 0, Some(0), 0, tiles);
        assert_eq!(world.height_at(10.5, 20.5), Some(1500.0));
        assert_eq!(world.height_at(10.5, 22.0), Some(100.0));
        assert!(
            world
                .tiles()
                .iter()
                .all(|tile| tile.heightmap().heights().iter().all(|h| h.is_finite()))
        );
    }

    /// Without derivation a quadrant is only split once all four children
    /// hold tiles.
    #[test]
    fn test_no_split_until_children_ready() {
        let mut harness = Harness::new(ElevationContext::new());
        let scene = overhead(10.5, 20.5, 400_000.0);
        let camera = scene.camera_geo();

        let tiles = harness.pass(&scene, false);
        assert_eq!(tiles.len(), 8);
        harness.drain(&camera);

        let tiles = harness.pass(&scene, false);
        assert!(tiles.len() > 8);
        assert!((covered_area(&tiles) - 360.0 * 180.0).abs() < 1e-6);
    }

    /// With derivation, missing children are filled from the root at once.
    #[test]
    fn test_derives_missing_children() {
        let mut harness = Harness::new(ElevationContext::new());
        let scene = overhead(10.5, 20.5, 400_000.0);

        harness.pass(&scene, true);
        let tiles = harness.pass(&scene, true);
        assert!(tiles.len() > 8);
        assert!((covered_area(&tiles) - 360.0 * 180.0).abs() < 1e-6);

        // The quadrant far from the camera is emitted with a derived tile.
        let root = harness.state.tree.roots()[6];
        let child = harness.state.tree.child(root, Quadrant::UpperRight).unwrap();
        let node = harness.state.tree.get(child).unwrap();
        assert!(node.tile().is_some());
        assert!(node.is_derived());
        assert_eq!(node.source_version(), -1);
        assert!(node.is_queued());
    }

    /// A fetched tile that falls behind a newer ancestor is replaced by a
    /// derived one.
    #[test]
    fn test_outdated_fetched_child_is_rederived() {
        let mut harness = Harness::new(ElevationContext::new());
        let scene = overhead(10.5, 20.5, 400_000.0);
        harness.pass(&scene, true);
        harness.drain(&scene.camera_geo());

        let root = harness.state.tree.roots()[6];
        let child = harness.state.tree.child(root, Quadrant::UpperRight).unwrap();
        let fetched = Arc::clone(harness.state.tree.get(child).unwrap().tile().unwrap());
        assert!(!harness.state.tree.get(child).unwrap().is_derived());

        // The sources changed twice and only the root caught up.
        let bounds = *harness.state.tree.get(root).unwrap().bounds();
        let newer = harness.builder.flat(&bounds, Srid::Wgs84).unwrap();
        assert!(harness.state.tree.store_fetched(root, newer, 2, false));
        harness.source_version = 2;

        let tiles = harness.pass(&scene, true);
        let node = harness.state.tree.get(child).unwrap();
        assert!(node.is_derived());
        assert_eq!(node.source_version(), 1);
        let tile = node.tile().unwrap();
        assert!(!Arc::ptr_eq(tile, &fetched));
        assert!(tiles.iter().any(|emitted| Arc::ptr_eq(emitted, tile)));
    }

    /// Planned tiles are only stored once the pass is finished.
    #[test]
    fn test_pass_defers_tile_builds() {
        let mut harness = Harness::new(ElevationContext::new());
        let scene = overhead(10.5, 20.5, 400_000.0);
        let mut collector = Collector::new(
            &mut harness.state,
            &scene,
            Srid::Wgs84,
            0,
            &harness.settings,
            &harness.workers,
        );
        collector.collect_roots(true);
        let plan = collector.into_plan();
        assert_eq!(plan.pending_builds(), 8);
        assert!(
            harness
                .state
                .tree
                .roots()
                .iter()
                .all(|root| harness.state.tree.get(*root).unwrap().tile().is_none())
        );

        let built = plan.build(&harness.builder, &harness.elevation, &harness.settings);
        let tiles = built.finish(&mut harness.state, &harness.settings);
        assert_eq!(tiles.len(), 8);
        assert_eq!(covered_area(&tiles), 360.0 * 180.0);
    }

    /// A fetch that lands after the camera moved away is still written back,
    /// but the next pass leaves it out.
    #[test]
    fn test_pan_away_result_stored_not_emitted() {
        let mut harness = Harness::new(patch_context());
        let near = overhead(10.5, 20.5, 400_000.0);
        harness.pass(&near, true);

        let task = harness
            .state
            .queue
            .pop(&near.camera_geo())
            .expect("children queued under the camera");
        let node_id = task.node;
        let outcome = harness.fetch(task).unwrap();
        assert!(write_back(&mut harness.state, outcome, &harness.settings));
        let stored = Arc::clone(harness.state.tree.get(node_id).unwrap().tile().unwrap());

        let far = overhead(-45.0, -120.0, 400_000.0);
        let tiles = harness.pass(&far, true);
        assert!(tiles.iter().all(|tile| !Arc::ptr_eq(tile, &stored)));
        assert!((covered_area(&tiles) - 360.0 * 180.0).abs() < 1e-6);
    }
}
