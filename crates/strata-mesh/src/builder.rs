//! Builds terrain tiles from elevation queries or from an ancestor tile.

use std::sync::Arc;

use glam::DVec3;
use strata_elevation::{ElevationContext, QueryParameters, ResolutionOrder};
use strata_geo::{
    Envelope, GeoPoint, Srid, meters_per_degree_latitude, meters_per_degree_longitude,
    wrap_latitude, wrap_longitude,
};
use strata_pool::{BlockPoolAllocator, MAX_ALIGNMENT};
use tracing::trace;

use crate::error::BuildError;
use crate::heightmap::Heightmap;
use crate::mesh::{TerrainMesh, pack_normal};
use crate::tile::TerrainTile;
use crate::topology::TileTopology;

/// Tunables for [`TileBuilder`].
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Posts per tile side.
    pub num_posts: usize,
    /// Depth of the skirt hung below the lowest post, in meters.
    pub skirt_height: f64,
    /// Number of pooled mesh blocks.
    pub block_count: usize,
    /// Allocate from the heap when the pool is exhausted.
    pub heap_fallback: bool,
    /// Limit the first query pass to sources no finer than the tile needs.
    pub constrain_query_res: bool,
    /// After a constrained pass, fill remaining holes from any source.
    pub fill_with_hi_res: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            num_posts: 32,
            skirt_height: 500.0,
            block_count: 256,
            heap_fallback: true,
            constrain_query_res: false,
            fill_with_hi_res: true,
        }
    }
}

/// Turns elevation samples into [`TerrainTile`]s.
///
/// Safe to share between fetch workers; the index topology is computed once
/// and mesh blocks come from a lock-free pool.
pub struct TileBuilder {
    topology: Arc<TileTopology>,
    allocator: BlockPoolAllocator,
    options: BuildOptions,
}

impl TileBuilder {
    pub fn new(options: BuildOptions) -> Result<Self, BuildError> {
        let topology = Arc::new(TileTopology::new(options.num_posts)?);
        let allocator =
            BlockPoolAllocator::new(topology.byte_len(), options.block_count, MAX_ALIGNMENT)?;
        Ok(Self {
            topology,
            allocator,
            options,
        })
    }

    pub fn topology(&self) -> &TileTopology {
        &self.topology
    }

    pub fn allocator(&self) -> &BlockPoolAllocator {
        &self.allocator
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Sample the context over `bounds` and build a tile.
    ///
    /// `resolution` is the post spacing in meters the tile is meant to
    /// resolve; it only limits the query when `constrain_query_res` is set.
    /// Points no source covers are zero-filled and masked out.
    pub fn fetch(
        &self,
        context: &ElevationContext,
        bounds: &Envelope,
        srid: Srid,
        resolution: f64,
    ) -> Result<TerrainTile, BuildError> {
        let n = self.topology.num_posts();
        let stride = n + 2;
        let cell_w = bounds.width() / (n - 1) as f64;
        let cell_h = bounds.height() / (n - 1) as f64;

        // One post of border on every side for normal generation.
        let mut points = Vec::with_capacity(stride * stride);
        for row in -1..=(n as isize) {
            let lat = wrap_latitude(bounds.min_y + cell_h * row as f64);
            for col in -1..=(n as isize) {
                let lng = wrap_longitude(bounds.min_x + cell_w * col as f64);
                points.push(GeoPoint::new(lat, lng));
            }
        }

        let mut els = vec![f64::NAN; points.len()];
        let mut params = QueryParameters::new(ResolutionOrder::HighToLow);
        if self.options.constrain_query_res {
            params = params.with_max_resolution(resolution);
        }
        let holes = context.query_elevation(&points, &params, &mut els);

        if holes > 0 && self.options.constrain_query_res && self.options.fill_with_hi_res {
            let missing: Vec<usize> = (0..els.len()).filter(|&i| els[i].is_nan()).collect();
            let hole_points: Vec<GeoPoint> = missing.iter().map(|&i| points[i]).collect();
            let mut filled = vec![f64::NAN; hole_points.len()];
            let remaining = context.query_elevation(
                &hole_points,
                &QueryParameters::new(ResolutionOrder::LowToHigh),
                &mut filled,
            );
            for (i, h) in missing.into_iter().zip(filled) {
                els[i] = h;
            }
            trace!(holes, remaining, "filled constrained query holes");
        }

        let heightmap = bordered_heightmap(bounds, n, &els, cell_w, cell_h);
        self.assemble(bounds, srid, heightmap, 0.0)
    }

    /// A tile flat at elevation zero with no data.
    pub fn flat(&self, bounds: &Envelope, srid: Srid) -> Result<TerrainTile, BuildError> {
        let n = self.topology.num_posts();
        let count = n * n;
        let heightmap = Heightmap::new(
            footprint(bounds),
            n,
            vec![0.0; count],
            vec![DVec3::Z; count],
            vec![false; count],
            false,
        );
        self.assemble(bounds, srid, heightmap, 0.0)
    }

    /// Approximate a tile over `bounds` by resampling an ancestor's heightmap.
    pub fn derive(
        &self,
        source: &TerrainTile,
        bounds: &Envelope,
        srid: Srid,
    ) -> Result<TerrainTile, BuildError> {
        let n = self.topology.num_posts();
        let parent = source.heightmap();
        let footprint = footprint(bounds);

        let mut heights = Vec::with_capacity(n * n);
        let mut normals = Vec::with_capacity(n * n);
        let mut valid = Vec::with_capacity(n * n);
        let span = (n - 1) as f64;
        for row in 0..n {
            let lat = bounds.min_y + bounds.height() * row as f64 / span;
            for col in 0..n {
                let lng = bounds.min_x + bounds.width() * col as f64 / span;
                let sample = parent.sample(lat, lng);
                heights.push(sample.height);
                normals.push(sample.normal);
                valid.push(parent.has_data() && sample.valid);
            }
        }

        let heightmap = Heightmap::new(footprint, n, heights, normals, valid, parent.has_data());
        let origin_z = (parent.min_height() + parent.max_height()) / 2.0;
        self.assemble(bounds, srid, heightmap, origin_z)
    }

    /// Write the mesh block for a post grid and wrap it in a tile.
    fn assemble(
        &self,
        bounds: &Envelope,
        srid: Srid,
        heightmap: Heightmap,
        origin_z: f64,
    ) -> Result<TerrainTile, BuildError> {
        let topology = &self.topology;
        let n = topology.num_posts();
        let block = self.allocator.allocate(self.options.heap_fallback)?;
        let mut mesh = TerrainMesh::new(block, Arc::clone(topology))?;

        let origin_geo = GeoPoint::with_altitude(bounds.center_y(), bounds.center_x(), origin_z);
        let origin = srid.forward(&origin_geo);
        let skirt_el = heightmap.min_height() - self.options.skirt_height;

        {
            let mut sections = mesh.sections_mut()?;
            sections.indices.copy_from_slice(topology.indices());

            for row in 0..n {
                for col in 0..n {
                    let i = row * n + col;
                    let (lat, lng) = heightmap.post_location(col, row);
                    let geo = GeoPoint::with_altitude(lat, lng, heightmap.heights()[i]);
                    sections.positions[i] = (srid.forward(&geo) - origin).as_vec3().to_array();
                    let normal = srid.enu_rotation(&geo) * heightmap.normals()[i];
                    sections.normals[i] = pack_normal(normal.x, normal.y, normal.z);
                    sections.no_data_mask[i] = if heightmap.is_valid(col, row) { 1.0 } else { 0.0 };
                }
            }

            let post_count = topology.post_count();
            for (k, &edge) in topology.edge_ring().iter().enumerate() {
                let post = edge as usize;
                let (lat, lng) = heightmap.post_location(post % n, post / n);
                let geo = GeoPoint::with_altitude(lat, lng, skirt_el);
                let v = post_count + k;
                sections.positions[v] = (srid.forward(&geo) - origin).as_vec3().to_array();
                sections.normals[v] = sections.normals[post];
                sections.no_data_mask[v] = sections.no_data_mask[post];
            }
        }

        let tile_bounds = Envelope::new(
            bounds.min_x,
            bounds.min_y,
            skirt_el,
            bounds.max_x,
            bounds.max_y,
            heightmap.max_height(),
        );
        Ok(TerrainTile {
            mesh,
            heightmap,
            bounds: tile_bounds,
            srid,
            local_origin: origin,
        })
    }
}

fn footprint(bounds: &Envelope) -> Envelope {
    bounds.with_z(0.0, 0.0)
}

/// Post grid from `(n + 2)²` bordered samples, NaN marking holes.
fn bordered_heightmap(
    bounds: &Envelope,
    n: usize,
    els: &[f64],
    cell_w: f64,
    cell_h: f64,
) -> Heightmap {
    let stride = n + 2;
    let filled: Vec<f64> = els
        .iter()
        .map(|&e| if e.is_nan() { 0.0 } else { e })
        .collect();

    let mut heights = Vec::with_capacity(n * n);
    let mut valid = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            let i = (row + 1) * stride + col + 1;
            heights.push(filled[i]);
            valid.push(!els[i].is_nan());
        }
    }
    let has_data = valid.iter().any(|&v| v);

    let normals = if has_data {
        let center_lat = bounds.center_y();
        let scale_x = meters_per_degree_longitude(center_lat) * cell_w;
        let scale_y = meters_per_degree_latitude(center_lat) * cell_h;
        let mut normals = Vec::with_capacity(n * n);
        for row in 0..n {
            for col in 0..n {
                let at = |r: usize, c: usize| filled[r * stride + c];
                let (r, c) = (row + 1, col + 1);
                let dzdx = (at(r, c + 1) - at(r, c - 1)) / (2.0 * scale_x);
                let dzdy = (at(r + 1, c) - at(r - 1, c)) / (2.0 * scale_y);
                normals.push(DVec3::new(-dzdx, -dzdy, 1.0).normalize_or(DVec3::Z));
            }
        }
        normals
    } else {
        vec![DVec3::Z; n * n]
    };

    Heightmap::new(footprint(bounds), n, heights, normals, valid, has_data)
}
