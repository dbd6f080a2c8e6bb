//! Post grid retained by every tile for derivation and point lookups.

use glam::DVec3;
use strata_geo::Envelope;

/// Interpolated value at an arbitrary location of a [`Heightmap`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostSample {
    /// Height above the ellipsoid in meters (holes read as zero).
    pub height: f64,
    /// Unit normal in the local east/north/up frame.
    pub normal: DVec3,
    /// Whether every post contributing to the sample had real data.
    pub valid: bool,
}

/// A square grid of posts covering `bounds`, row 0 on the southern edge.
#[derive(Clone, Debug)]
pub struct Heightmap {
    bounds: Envelope,
    num_posts: usize,
    heights: Vec<f64>,
    normals: Vec<DVec3>,
    valid: Vec<bool>,
    min_height: f64,
    max_height: f64,
    has_data: bool,
}

impl Heightmap {
    /// `heights`, `normals` and `valid` are row-major with `num_posts²`
    /// entries. Min/max heights track valid posts only (`0/0` when none).
    pub(crate) fn new(
        bounds: Envelope,
        num_posts: usize,
        heights: Vec<f64>,
        normals: Vec<DVec3>,
        valid: Vec<bool>,
        has_data: bool,
    ) -> Self {
        debug_assert_eq!(heights.len(), num_posts * num_posts);
        debug_assert_eq!(normals.len(), heights.len());
        debug_assert_eq!(valid.len(), heights.len());

        let (min, max) = heights
            .iter()
            .zip(&valid)
            .filter(|(_, ok)| **ok)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (&h, _)| {
                (lo.min(h), hi.max(h))
            });
        let (min_height, max_height) = if min <= max { (min, max) } else { (0.0, 0.0) };

        Self {
            bounds,
            num_posts,
            heights,
            normals,
            valid,
            min_height,
            max_height,
            has_data,
        }
    }

    pub fn bounds(&self) -> &Envelope {
        &self.bounds
    }

    pub fn num_posts(&self) -> usize {
        self.num_posts
    }

    /// Row-major post heights (holes zero-filled).
    pub fn heights(&self) -> &[f64] {
        &self.heights
    }

    pub fn normals(&self) -> &[DVec3] {
        &self.normals
    }

    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        self.valid[row * self.num_posts + col]
    }

    pub fn min_height(&self) -> f64 {
        self.min_height
    }

    pub fn max_height(&self) -> f64 {
        self.max_height
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Location of post `(col, row)` as `(latitude, longitude)`.
    pub fn post_location(&self, col: usize, row: usize) -> (f64, f64) {
        let span = (self.num_posts - 1) as f64;
        (
            self.bounds.min_y + self.bounds.height() * row as f64 / span,
            self.bounds.min_x + self.bounds.width() * col as f64 / span,
        )
    }

    /// Bilinear sample, clamping the location into the grid.
    pub fn sample(&self, latitude: f64, longitude: f64) -> PostSample {
        let span = (self.num_posts - 1) as f64;
        let fx = ((longitude - self.bounds.min_x) / self.bounds.width() * span).clamp(0.0, span);
        let fy = ((latitude - self.bounds.min_y) / self.bounds.height() * span).clamp(0.0, span);
        let col = (fx.floor() as usize).min(self.num_posts - 2);
        let row = (fy.floor() as usize).min(self.num_posts - 2);
        let tx = fx - col as f64;
        let ty = fy - row as f64;

        let i00 = row * self.num_posts + col;
        let i10 = i00 + 1;
        let i01 = i00 + self.num_posts;
        let i11 = i01 + 1;

        let lerp2 = |a: f64, b: f64, c: f64, d: f64| {
            let south = a + (b - a) * tx;
            let north = c + (d - c) * tx;
            south + (north - south) * ty
        };
        let height = lerp2(
            self.heights[i00],
            self.heights[i10],
            self.heights[i01],
            self.heights[i11],
        );
        let south = self.normals[i00].lerp(self.normals[i10], tx);
        let north = self.normals[i01].lerp(self.normals[i11], tx);
        let normal = south.lerp(north, ty).normalize_or(DVec3::Z);
        let valid = [i00, i10, i01, i11].iter().all(|&i| self.valid[i]);

        PostSample {
            height,
            normal,
            valid,
        }
    }

    /// Height at a location inside the grid, `None` outside it or over a hole.
    pub fn height_at(&self, latitude: f64, longitude: f64) -> Option<f64> {
        if !self.has_data || !self.bounds.contains_point(longitude, latitude) {
            return None;
        }
        let sample = self.sample(latitude, longitude);
        sample.valid.then_some(sample.height)
    }
}
