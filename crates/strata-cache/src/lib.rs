//! Streaming cache of terrain tiles for a moving view.
//!
//! The globe is split into eight root quadrants, each refined as a quadtree
//! down to the level where a tile's screen-space error drops below the
//! configured threshold. [`TerrainService`] owns the tree, a background
//! collector that selects the tiles to draw, and a pool of workers that fetch
//! elevation and build meshes. Renderers call [`TerrainService::lock`] once
//! per frame and draw the returned [`WorldTerrain`] snapshot.

mod collector;
mod error;
mod node;
mod queue;
mod scheduler;
mod service;
mod settings;
mod snapshot;
mod worker;

pub use collector::{BuiltPass, Collector, PassPlan};
pub use error::CacheError;
pub use node::{DeriveSource, NodeId, QuadNode, QuadTree, Quadrant, ROOT_COUNT, root_footprints};
pub use queue::{DEFAULT_QUEUE_CAPACITY, FetchQueue, FetchTask};
pub use scheduler::{FetchWorkers, TreeState};
pub use service::TerrainService;
pub use settings::{CacheSettings, build_options, resolve_worker_count};
pub use snapshot::WorldTerrain;
pub use worker::{FetchOutcome, build_tile, write_back};
