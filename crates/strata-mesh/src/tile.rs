use glam::DVec3;
use strata_geo::{Envelope, Srid};

use crate::heightmap::Heightmap;
use crate::mesh::TerrainMesh;

/// An immutable, renderable terrain tile.
///
/// Tiles are shared by `Arc` between the quadtree, published snapshots and
/// the renderer; the mesh block returns to its pool once the last reference
/// is dropped.
#[derive(Debug)]
pub struct TerrainTile {
    pub(crate) mesh: TerrainMesh,
    pub(crate) heightmap: Heightmap,
    pub(crate) bounds: Envelope,
    pub(crate) srid: Srid,
    pub(crate) local_origin: DVec3,
}

impl TerrainTile {
    pub fn mesh(&self) -> &TerrainMesh {
        &self.mesh
    }

    pub fn heightmap(&self) -> &Heightmap {
        &self.heightmap
    }

    /// Geographic bounds. The minimum height includes the skirt depth.
    pub fn bounds(&self) -> &Envelope {
        &self.bounds
    }

    /// Whether any post was sampled from real elevation data.
    pub fn has_data(&self) -> bool {
        self.heightmap.has_data()
    }

    pub fn srid(&self) -> Srid {
        self.srid
    }

    /// World-space position, in `srid` coordinates, that mesh positions are
    /// relative to.
    pub fn local_origin(&self) -> DVec3 {
        self.local_origin
    }

    pub fn posts_x(&self) -> usize {
        self.heightmap.num_posts()
    }

    pub fn posts_y(&self) -> usize {
        self.heightmap.num_posts()
    }

    /// Row 0 of the post grid is the southern edge.
    pub fn invert_y_axis(&self) -> bool {
        true
    }

    pub fn skirt_index_offset(&self) -> usize {
        self.mesh.topology().skirt_index_offset()
    }

    /// Elevation at a point of the tile, `None` outside it or over a hole.
    pub fn height_at(&self, latitude: f64, longitude: f64) -> Option<f64> {
        self.heightmap.height_at(latitude, longitude)
    }
}
