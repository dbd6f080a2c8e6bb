//! Published world terrain snapshots.

use std::sync::Arc;

use strata_geo::Srid;
use strata_mesh::TerrainTile;

/// An immutable set of tiles covering the globe, as handed to the renderer.
///
/// Snapshots are published whole; a renderer holding one keeps every tile
/// (and its mesh block) alive until it drops the `Arc`.
#[derive(Debug)]
pub struct WorldTerrain {
    pub(crate) srid: Srid,
    pub(crate) source_version: u64,
    pub(crate) scene_version: Option<u64>,
    pub(crate) quadtree_version: u64,
    pub(crate) terrain_version: u64,
    pub(crate) tiles: Vec<Arc<TerrainTile>>,
}

impl WorldTerrain {
    pub(crate) fn new(
        srid: Srid,
        source_version: u64,
        scene_version: Option<u64>,
        quadtree_version: u64,
        tiles: Vec<Arc<TerrainTile>>,
    ) -> Self {
        Self {
            srid,
            source_version,
            scene_version,
            quadtree_version,
            terrain_version: 0,
            tiles,
        }
    }

    /// An empty snapshot with no tiles.
    pub fn empty(srid: Srid) -> Self {
        Self::new(srid, 0, None, 0, Vec::new())
    }

    pub fn srid(&self) -> Srid {
        self.srid
    }

    /// Elevation source version the tiles were collected against.
    pub fn source_version(&self) -> u64 {
        self.source_version
    }

    /// Scene version of the view the tiles were selected for; `None` for the
    /// flat placeholder published before the first collection.
    pub fn scene_version(&self) -> Option<u64> {
        self.scene_version
    }

    pub fn quadtree_version(&self) -> u64 {
        self.quadtree_version
    }

    /// Terrain version at the time of publication.
    pub fn terrain_version(&self) -> u64 {
        self.terrain_version
    }

    pub fn tiles(&self) -> &[Arc<TerrainTile>] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Height of the smallest tile covering the point that has data there.
    pub fn height_at(&self, latitude: f64, longitude: f64) -> Option<f64> {
        self.tiles
            .iter()
            .filter(|tile| tile.bounds().contains_point(longitude, latitude))
            .filter_map(|tile| Some((tile.bounds().width(), tile.height_at(latitude, longitude)?)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, height)| height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_elevation::{ElevationContext, GridSource};
    use strata_geo::Envelope;
    use strata_mesh::{BuildOptions, TileBuilder};

    #[test]
    fn test_empty() {
        let world = WorldTerrain::empty(Srid::Ecef);
        assert!(world.is_empty());
        assert_eq!(world.scene_version(), None);
        assert_eq!(world.height_at(0.0, 0.0), None);
    }

    /// The finest tile with data wins over a coarse one covering the point.
    #[test]
    fn test_height_at_prefers_smallest_tile() {
        let builder = TileBuilder::new(BuildOptions {
            num_posts: 5,
            block_count: 4,
            ..BuildOptions::default()
        })
        .unwrap();
        let constant = |height: f64| {
            let context = ElevationContext::new();
            let bounds = Envelope::from_degrees(-10.0, -10.0, 10.0, 10.0);
            let grid = GridSource::from_fn("constant", bounds, 2, 2, move |_, _| height).unwrap();
            context.attach(Arc::new(grid));
            context
        };

        let coarse_bounds = Envelope::from_degrees(-10.0, -10.0, 10.0, 10.0);
        let fine_bounds = Envelope::from_degrees(0.0, 0.0, 5.0, 5.0);
        let coarse = builder
            .fetch(&constant(10.0), &coarse_bounds, Srid::Wgs84, 1.0)
            .unwrap();
        let fine = builder
            .fetch(&constant(20.0), &fine_bounds, Srid::Wgs84, 1.0)
            .unwrap();
        let world = WorldTerrain::new(
            Srid::Wgs84,
            0,
            Some(1),
            0,
            vec![Arc::new(coarse), Arc::new(fine)],
        );

        assert_eq!(world.height_at(2.0, 2.0), Some(20.0));
        assert_eq!(world.height_at(-5.0, -5.0), Some(10.0));
        assert_eq!(world.height_at(50.0, 50.0), None);
    }
}
