//! In-memory regular lat/lon elevation grid.

use strata_geo::{Envelope, meters_per_degree_latitude};

use crate::error::ElevationError;
use crate::source::ElevationSource;

/// A regular grid of posts spanning `bounds`, sampled bilinearly.
///
/// Heights are row-major with row 0 on the southern edge. NaN marks a post
/// without data; any cell touching one is a hole.
#[derive(Clone, Debug)]
pub struct GridSource {
    name: String,
    bounds: Envelope,
    cols: usize,
    rows: usize,
    heights: Vec<f64>,
    resolution: f64,
}

impl GridSource {
    pub fn new(
        name: impl Into<String>,
        bounds: Envelope,
        cols: usize,
        rows: usize,
        heights: Vec<f64>,
    ) -> Result<Self, ElevationError> {
        if cols < 2 || rows < 2 {
            return Err(ElevationError::GridTooSmall { cols, rows });
        }
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return Err(ElevationError::EmptyBounds);
        }
        let expected = cols * rows;
        if heights.len() != expected {
            return Err(ElevationError::GridShape {
                cols,
                rows,
                expected,
                actual: heights.len(),
            });
        }

        let cell_lat = bounds.height() / (rows - 1) as f64;
        let resolution = cell_lat * meters_per_degree_latitude(bounds.center_y());
        let (min_z, max_z) = heights
            .iter()
            .filter(|h| h.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        let bounds = if min_z <= max_z {
            bounds.with_z(min_z, max_z)
        } else {
            bounds.with_z(0.0, 0.0)
        };

        Ok(Self {
            name: name.into(),
            bounds,
            cols,
            rows,
            heights,
            resolution,
        })
    }

    /// Build a grid by evaluating `height(latitude, longitude)` at every post.
    pub fn from_fn(
        name: impl Into<String>,
        bounds: Envelope,
        cols: usize,
        rows: usize,
        height: impl Fn(f64, f64) -> f64,
    ) -> Result<Self, ElevationError> {
        let cols_span = cols.saturating_sub(1).max(1) as f64;
        let rows_span = rows.saturating_sub(1).max(1) as f64;
        let mut heights = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            let lat = bounds.min_y + bounds.height() * row as f64 / rows_span;
            for col in 0..cols {
                let lng = bounds.min_x + bounds.width() * col as f64 / cols_span;
                heights.push(height(lat, lng));
            }
        }
        Self::new(name, bounds, cols, rows, heights)
    }

    /// Override the nominal post spacing derived from the grid geometry.
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    fn post(&self, col: usize, row: usize) -> f64 {
        self.heights[row * self.cols + col]
    }
}

impl ElevationSource for GridSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn bounds(&self) -> Envelope {
        self.bounds
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }

    fn sample(&self, latitude: f64, longitude: f64) -> Option<f64> {
        if !self.bounds.contains_point(longitude, latitude) {
            return None;
        }
        let fx = (longitude - self.bounds.min_x) / self.bounds.width() * (self.cols - 1) as f64;
        let fy = (latitude - self.bounds.min_y) / self.bounds.height() * (self.rows - 1) as f64;
        let col = (fx.floor() as usize).min(self.cols - 2);
        let row = (fy.floor() as usize).min(self.rows - 2);
        let tx = fx - col as f64;
        let ty = fy - row as f64;

        let h00 = self.post(col, row);
        let h10 = self.post(col + 1, row);
        let h01 = self.post(col, row + 1);
        let h11 = self.post(col + 1, row + 1);
        let south = h00 + (h10 - h00) * tx;
        let north = h01 + (h11 - h01) * tx;
        let h = south + (north - south) * ty;
        h.is_finite().then_some(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Envelope {
        Envelope::from_degrees(0.0, 0.0, 1.0, 1.0)
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert_eq!(
            GridSource::new("g", unit(), 1, 4, vec![0.0; 4]).unwrap_err(),
            ElevationError::GridTooSmall { cols: 1, rows: 4 }
        );
        assert!(matches!(
            GridSource::new("g", unit(), 2, 2, vec![0.0; 3]),
            Err(ElevationError::GridShape { expected: 4, actual: 3, .. })
        ));
        assert_eq!(
            GridSource::new("g", Envelope::from_degrees(0.0, 0.0, 0.0, 1.0), 2, 2, vec![0.0; 4])
                .unwrap_err(),
            ElevationError::EmptyBounds
        );
    }

    /// Bilinear interpolation between the four surrounding posts.
    #[test]
    fn test_bilinear_sample() {
        // Row 0 (south): 0, 10. Row 1 (north): 20, 30.
        let grid = GridSource::new("g", unit(), 2, 2, vec![0.0, 10.0, 20.0, 30.0]).unwrap();
        assert_eq!(grid.sample(0.0, 0.0), Some(0.0));
        assert_eq!(grid.sample(0.0, 1.0), Some(10.0));
        assert_eq!(grid.sample(1.0, 1.0), Some(30.0));
        assert_eq!(grid.sample(0.5, 0.5), Some(15.0));
        assert_eq!(grid.sample(1.5, 0.5), None);
    }

    #[test]
    fn test_nan_posts_are_holes() {
        let heights = vec![1.0, 1.0, 1.0, 1.0, f64::NAN, 1.0, 1.0, 1.0, 1.0];
        let grid = GridSource::new("g", unit(), 3, 3, heights).unwrap();
        assert_eq!(grid.sample(0.25, 0.25), None);
        assert_eq!(grid.bounds().min_z, 1.0);
        assert_eq!(grid.bounds().max_z, 1.0);
    }

    #[test]
    fn test_from_fn_and_resolution() {
        let grid = GridSource::from_fn("g", unit(), 11, 11, |lat, lng| lat * 100.0 + lng).unwrap();
        assert!((grid.sample(0.3, 0.7).unwrap() - 30.7).abs() < 1e-9);
        // Tenth of a degree of latitude is roughly 11 km.
        assert!((grid.resolution() - 11_057.0).abs() < 10.0);
        assert_eq!(grid.with_resolution(5.0).resolution(), 5.0);
    }
}
