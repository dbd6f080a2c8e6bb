//! Terrain tile construction: index topology, skirts, normals, elevation
//! fetch and derivation from ancestor tiles.
//!
//! Mesh buffers live in fixed-size blocks taken from a
//! [`strata_pool::BlockPoolAllocator`]; every tile of a given post count has
//! the same index buffer and block layout.

mod builder;
mod error;
mod heightmap;
mod mesh;
mod tile;
mod topology;

pub use builder::{BuildOptions, TileBuilder};
pub use error::BuildError;
pub use heightmap::{Heightmap, PostSample};
pub use mesh::{PackedNormal, TerrainMesh};
pub use tile::TerrainTile;
pub use topology::{MAX_POSTS, MIN_POSTS, TileTopology, terrain_mesh_size};
