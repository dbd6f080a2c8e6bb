//! The terrain service: renderer API, collector thread and fetch worker pool.
//!
//! The render thread only ever reads published [`WorldTerrain`] snapshots. A
//! single collector thread walks the quadtree and publishes new snapshots;
//! a pool of fetch workers builds tiles outside the tree lock. Lock order is
//! tree lock, then service monitor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use strata_config::Config;
use strata_elevation::{ElevationContext, SourceEvent};
use strata_geo::{SceneModel, Srid};
use strata_mesh::TileBuilder;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::error::CacheError;
use crate::node::root_footprints;
use crate::scheduler::{FetchWorkers, TreeState};
use crate::settings::{CacheSettings, build_options};
use crate::snapshot::WorldTerrain;
use crate::worker::run_worker;

#[derive(Clone)]
struct ViewRequest {
    scene: Arc<SceneModel>,
    srid: Srid,
    scene_version: u64,
    allow_derive: bool,
}

/// State behind the service monitor.
struct ServiceState {
    request: Option<ViewRequest>,
    front: Arc<WorldTerrain>,
    world_version: u64,
    source_version: u64,
}

#[derive(Default)]
struct Threads {
    collector: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

/// Everything the service threads share.
pub(crate) struct Shared {
    pub(crate) settings: CacheSettings,
    pub(crate) builder: TileBuilder,
    pub(crate) elevation: ElevationContext,
    events: Receiver<SourceEvent>,
    tree: Mutex<TreeState>,
    queue_cv: Condvar,
    service: Mutex<ServiceState>,
    monitor_cv: Condvar,
    pub(crate) quadtree_version: AtomicU64,
    pub(crate) terminate: AtomicBool,
    /// Set when the view moved; the next worker to pop re-sorts the queue.
    pub(crate) resort: AtomicBool,
    threads: Mutex<Threads>,
}

impl Shared {
    pub(crate) fn lock_tree(&self) -> MutexGuard<'_, TreeState> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_service(&self) -> MutexGuard<'_, ServiceState> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_threads(&self) -> MutexGuard<'_, Threads> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the collector after the tree changed.
    pub(crate) fn wake_collector(&self) {
        let _state = self.lock_service();
        self.monitor_cv.notify_all();
    }

    /// The requested scene and the source version to fetch against, if a
    /// view has been requested yet.
    pub(crate) fn current_view(&self) -> Option<(Arc<SceneModel>, i64)> {
        let state = self.lock_service();
        let request = state.request.as_ref()?;
        Some((Arc::clone(&request.scene), state.source_version as i64))
    }

    pub(crate) fn wait_for_work<'a>(
        &self,
        guard: MutexGuard<'a, TreeState>,
    ) -> MutexGuard<'a, TreeState> {
        self.queue_cv
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold pending source notifications into one version bump.
    fn drain_source_events(&self, state: &mut ServiceState) {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            debug!(?event, "elevation sources changed");
            changed = true;
        }
        if changed {
            state.source_version += 1;
        }
    }

    fn is_stale(&self, state: &ServiceState, request: &ViewRequest) -> bool {
        let front = &state.front;
        front.srid != request.srid
            || front.scene_version != Some(request.scene_version)
            || front.source_version != state.source_version
            || front.quadtree_version != self.quadtree_version.load(Ordering::Acquire)
    }

    fn ensure_collector(self: &Arc<Self>) -> Result<(), CacheError> {
        let mut threads = self.lock_threads();
        if threads.collector.is_some() || self.terminate.load(Ordering::Acquire) {
            return Ok(());
        }
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("strata-collector".into())
            .spawn(move || run_collector(shared))
            .map_err(|source| CacheError::ThreadStart {
                role: "collector",
                source,
            })?;
        threads.collector = Some(handle);
        Ok(())
    }

    fn ensure_workers(self: &Arc<Self>) -> Result<(), CacheError> {
        let mut threads = self.lock_threads();
        if !threads.workers.is_empty() || self.terminate.load(Ordering::Acquire) {
            return Ok(());
        }
        for index in 0..self.settings.worker_count {
            let shared = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("strata-fetch-{index}"))
                .spawn(move || run_worker(shared))
                .map_err(|source| CacheError::ThreadStart {
                    role: "fetch worker",
                    source,
                })?;
            threads.workers.push(handle);
        }
        Ok(())
    }

    /// A placeholder covering the globe with the eight flat root tiles.
    fn flat_world(&self, srid: Srid, source_version: u64) -> Result<WorldTerrain, CacheError> {
        let tiles = root_footprints()
            .iter()
            .map(|bounds| self.builder.flat(bounds, srid).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WorldTerrain::new(srid, source_version, None, 0, tiles))
    }

    /// Run one LOD pass for `request` into a new back buffer.
    ///
    /// The tree lock is released while the pass builds its own tiles, so
    /// workers keep writing back meanwhile.
    fn collect(self: &Arc<Self>, request: &ViewRequest, source_version: u64) -> WorldTerrain {
        let mut tree = self.lock_tree();
        if tree.srid != request.srid {
            info!(from = ?tree.srid, to = ?request.srid, "switching terrain srid");
            tree.reset_all(request.srid);
        }
        let quadtree_version = self.quadtree_version.load(Ordering::Acquire);
        let workers = PoolHandle(self);
        let mut collector = Collector::new(
            &mut tree,
            &request.scene,
            request.srid,
            source_version as i64,
            &self.settings,
            &workers,
        );
        collector.collect_roots(request.allow_derive && self.settings.derive_enabled);
        let plan = collector.into_plan();
        drop(tree);

        let built = plan.build(&self.builder, &self.elevation, &self.settings);
        let tiles = built.finish(&mut self.lock_tree(), &self.settings);

        WorldTerrain::new(
            request.srid,
            source_version,
            Some(request.scene_version),
            quadtree_version,
            tiles,
        )
    }

    /// Swap `world` in as the front snapshot unless the SRID moved on while it
    /// was being built.
    fn publish(&self, mut world: WorldTerrain) {
        let mut state = self.lock_service();
        let current_srid = state.request.as_ref().map(|request| request.srid);
        if current_srid != Some(world.srid) {
            debug!("discarding snapshot built for a previous srid");
            return;
        }
        state.world_version += 1;
        world.terrain_version = state.world_version
            + state.source_version
            + self.quadtree_version.load(Ordering::Acquire);
        debug!(
            tiles = world.len(),
            terrain_version = world.terrain_version,
            "published terrain snapshot"
        );
        state.front = Arc::new(world);
    }
}

/// The worker pool as seen from the collector.
struct PoolHandle<'a>(&'a Arc<Shared>);

impl FetchWorkers for PoolHandle<'_> {
    fn ensure_started(&self) -> Result<(), CacheError> {
        self.0.ensure_workers()
    }

    fn notify(&self) {
        self.0.queue_cv.notify_one();
    }
}

fn run_collector(shared: Arc<Shared>) {
    info!("terrain collector started");
    'outer: loop {
        let (request, source_version) = {
            let mut state = shared.lock_service();
            loop {
                shared.drain_source_events(&mut state);
                if shared.terminate.load(Ordering::Acquire) {
                    break 'outer;
                }
                if let Some(request) = &state.request
                    && shared.is_stale(&state, request)
                {
                    break (request.clone(), state.source_version);
                }
                state = shared
                    .monitor_cv
                    .wait_timeout(state, shared.settings.source_poll_interval)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|err| err.into_inner().0);
            }
        };

        let world = shared.collect(&request, source_version);
        shared.publish(world);
    }
    info!("terrain collector stopped");
}

/// Streams terrain tiles for a moving view.
///
/// `lock` never blocks on tile work: it records the view and returns the most
/// recently published snapshot, waking the collector when that snapshot is
/// out of date.
pub struct TerrainService {
    shared: Arc<Shared>,
}

impl TerrainService {
    pub fn new(config: &Config, elevation: ElevationContext) -> Result<Self, CacheError> {
        config.validate()?;
        let settings = CacheSettings::from_config(config);
        let builder = TileBuilder::new(build_options(config))?;
        let events = elevation.subscribe();
        let tree = TreeState::new(Srid::Wgs84, settings.queue_capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                builder,
                elevation,
                events,
                tree: Mutex::new(tree),
                queue_cv: Condvar::new(),
                service: Mutex::new(ServiceState {
                    request: None,
                    front: Arc::new(WorldTerrain::empty(Srid::Wgs84)),
                    world_version: 0,
                    source_version: 0,
                }),
                monitor_cv: Condvar::new(),
                quadtree_version: AtomicU64::new(0),
                terminate: AtomicBool::new(false),
                resort: AtomicBool::new(false),
                threads: Mutex::new(Threads::default()),
            }),
        })
    }

    /// Request terrain for `scene` and return the current snapshot.
    ///
    /// Bump `scene_version` whenever the camera or viewport changes. The
    /// first call for an SRID returns the flat root tiles.
    pub fn lock(
        &self,
        scene: impl Into<Arc<SceneModel>>,
        srid: Srid,
        scene_version: u64,
        allow_derive: bool,
    ) -> Result<Arc<WorldTerrain>, CacheError> {
        let shared = &self.shared;
        let mut state = shared.lock_service();
        shared.drain_source_events(&mut state);

        let previous = state.request.as_ref().map(|request| request.scene_version);
        if previous != Some(scene_version) {
            shared.resort.store(true, Ordering::Release);
        }
        let request = ViewRequest {
            scene: scene.into(),
            srid,
            scene_version,
            allow_derive,
        };

        if state.front.is_empty() || state.front.srid != srid {
            let mut world = shared.flat_world(srid, state.source_version)?;
            state.world_version += 1;
            world.terrain_version = state.world_version
                + state.source_version
                + shared.quadtree_version.load(Ordering::Acquire);
            state.front = Arc::new(world);
        }

        let stale = shared.is_stale(&state, &request);
        state.request = Some(request);
        if stale && !shared.terminate.load(Ordering::Acquire) {
            shared.ensure_collector()?;
            shared.ensure_workers()?;
            shared.monitor_cv.notify_all();
        }
        Ok(Arc::clone(&state.front))
    }

    /// The current snapshot, without updating the requested view.
    pub fn lock_current(&self) -> Arc<WorldTerrain> {
        Arc::clone(&self.shared.lock_service().front)
    }

    /// Hand a snapshot back. Its tiles are freed once no other reference
    /// remains.
    pub fn unlock(&self, snapshot: Arc<WorldTerrain>) {
        drop(snapshot);
    }

    /// Changes whenever anything visible to the renderer may have changed.
    pub fn terrain_version(&self) -> u64 {
        let state = self.shared.lock_service();
        state.world_version
            + state.source_version
            + self.shared.quadtree_version.load(Ordering::Acquire)
    }

    /// Elevation at a point, from the finest attached source, or from the
    /// resident tiles where no source covers it.
    pub fn get_elevation(&self, latitude: f64, longitude: f64) -> Option<f64> {
        self.shared
            .elevation
            .elevation_at(latitude, longitude)
            .or_else(|| self.lock_current().height_at(latitude, longitude))
    }

    /// Fetch requests waiting for a worker.
    pub fn pending_fetches(&self) -> usize {
        self.shared.lock_tree().queue.len()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.shared.settings
    }

    pub fn elevation(&self) -> &ElevationContext {
        &self.shared.elevation
    }

    /// Stop and join every service thread. Later calls to `lock` keep
    /// returning the last snapshot.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        shared.terminate.store(true, Ordering::Release);
        {
            let _tree = shared.lock_tree();
            shared.queue_cv.notify_all();
        }
        {
            let _state = shared.lock_service();
            shared.monitor_cv.notify_all();
        }

        let threads = std::mem::take(&mut *shared.lock_threads());
        for handle in threads.collector.into_iter().chain(threads.workers) {
            let name = handle.thread().name().unwrap_or("unnamed").to_owned();
            if handle.join().is_err() {
                warn!(thread = %name, "terrain thread panicked");
            }
        }
    }
}

impl Drop for TerrainService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
