//! Geographic bounding envelopes.

/// A 3D geographic envelope. `x` is longitude and `y` latitude in degrees,
/// `z` is height above the ellipsoid in meters.
///
/// Invariant: `min <= max` on every axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl Envelope {
    /// Create an envelope from two corners, sorting components on every axis.
    pub fn new(x0: f64, y0: f64, z0: f64, x1: f64, y1: f64, z1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            min_z: z0.min(z1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
            max_z: z0.max(z1),
        }
    }

    /// A 2D envelope with the given height range.
    pub fn from_degrees(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self::new(min_lng, min_lat, 0.0, max_lng, max_lat, 0.0)
    }

    /// The same footprint with a different height range.
    pub fn with_z(&self, min_z: f64, max_z: f64) -> Self {
        Self {
            min_z: min_z.min(max_z),
            max_z: min_z.max(max_z),
            ..*self
        }
    }

    /// The same envelope moved by `dx` degrees of longitude.
    pub fn shifted_x(&self, dx: f64) -> Self {
        Self {
            min_x: self.min_x + dx,
            max_x: self.max_x + dx,
            ..*self
        }
    }

    pub fn center_x(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.min_y + self.max_y) / 2.0
    }

    pub fn center_z(&self) -> f64 {
        (self.min_z + self.max_z) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Returns true if the longitude/latitude lies inside or on the boundary.
    pub fn contains_point(&self, longitude: f64, latitude: f64) -> bool {
        longitude >= self.min_x
            && longitude <= self.max_x
            && latitude >= self.min_y
            && latitude <= self.max_y
    }

    /// Returns true if the footprints overlap (touching edges count).
    pub fn intersects_2d(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Returns true if `other`'s footprint lies entirely within this one.
    pub fn contains_2d(&self, other: &Envelope) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Split the footprint into quadrants, ordered lower-left, lower-right,
    /// upper-right, upper-left. Height range is inherited.
    pub fn quadrants(&self) -> [Envelope; 4] {
        let cx = self.center_x();
        let cy = self.center_y();
        [
            Envelope::new(self.min_x, self.min_y, self.min_z, cx, cy, self.max_z),
            Envelope::new(cx, self.min_y, self.min_z, self.max_x, cy, self.max_z),
            Envelope::new(cx, cy, self.min_z, self.max_x, self.max_y, self.max_z),
            Envelope::new(self.min_x, cy, self.min_z, cx, self.max_y, self.max_z),
        ]
    }

    /// Radius of the footprint's bounding circle, in degrees.
    pub fn radius(&self) -> f64 {
        (self.width() * self.width() + self.height() * self.height()).sqrt() / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_corners() {
        let e = Envelope::new(10.0, 5.0, 100.0, -10.0, -5.0, -100.0);
        assert_eq!(e.min_x, -10.0);
        assert_eq!(e.max_y, 5.0);
        assert_eq!(e.min_z, -100.0);
    }

    /// Quadrants tile the parent footprint exactly.
    #[test]
    fn test_quadrants_cover_parent() {
        let parent = Envelope::new(-180.0, 0.0, -415.0, -90.0, 90.0, 8850.0);
        let [ll, lr, ur, ul] = parent.quadrants();
        assert_eq!(ll, Envelope::new(-180.0, 0.0, -415.0, -135.0, 45.0, 8850.0));
        assert_eq!(lr.min_x, -135.0);
        assert_eq!(ur.max_x, -90.0);
        assert_eq!(ur.max_y, 90.0);
        assert_eq!(ul.min_y, 45.0);
        for q in [ll, lr, ur, ul] {
            assert!(parent.contains_2d(&q));
        }
    }

    #[test]
    fn test_intersection_and_containment() {
        let a = Envelope::from_degrees(0.0, 0.0, 10.0, 10.0);
        let b = Envelope::from_degrees(10.0, 5.0, 20.0, 15.0);
        let c = Envelope::from_degrees(11.0, 0.0, 20.0, 10.0);
        assert!(a.intersects_2d(&b));
        assert!(!a.intersects_2d(&c));
        assert!(a.contains_point(5.0, 5.0));
        assert!(!a.contains_point(-0.1, 5.0));
    }

    #[test]
    fn test_shift_and_radius() {
        let e = Envelope::from_degrees(170.0, 0.0, 180.0, 10.0);
        let shifted = e.shifted_x(-360.0);
        assert_eq!(shifted.min_x, -190.0);
        assert_eq!(shifted.max_x, -180.0);
        assert!((e.radius() - (200.0_f64).sqrt() / 2.0).abs() < 1e-12);
    }
}
