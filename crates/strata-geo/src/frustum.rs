//! View frustum culling against world-space bounding boxes.

use glam::{DMat4, DVec3, DVec4};

/// Plane indices into the frustum planes array.
const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// An axis-aligned bounding box in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Create a box from two corners, sorting components.
    pub fn new(a: DVec3, b: DVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Smallest box containing every point. Returns `None` for an empty input.
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Aabb::new(first, first), |acc, p| Aabb {
            min: acc.min.min(p),
            max: acc.max.max(p),
        }))
    }

    /// The box grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: self.min - DVec3::splat(margin),
            max: self.max + DVec3::splat(margin),
        }
    }
}

/// A view frustum of six inward-facing planes extracted from a
/// view-projection matrix with `[0, 1]` clip depth.
#[derive(Clone, Debug)]
pub struct Frustum {
    /// `DVec4(a, b, c, d)` with `(a, b, c)` the unit inward normal.
    planes: [DVec4; 6],
}

impl Frustum {
    /// Gribb/Hartmann plane extraction.
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [DVec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// Conservative box test: `false` only when the box lies entirely behind
    /// one of the planes.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            // Corner furthest along the plane normal.
            let p = DVec3::new(
                if normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            normal.dot(p) + plane.w >= 0.0
        })
    }

    /// Returns true if the point is inside all six planes.
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_camera_vp() -> DMat4 {
        let view = DMat4::look_to_rh(DVec3::ZERO, DVec3::NEG_Z, DVec3::Y);
        let proj = DMat4::perspective_rh(std::f64::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 1000.0);
        proj * view
    }

    #[test]
    fn test_box_in_front_is_visible() {
        let frustum = Frustum::from_view_projection(&default_camera_vp());
        let aabb = Aabb::new(DVec3::new(-1.0, -1.0, -5.0), DVec3::new(1.0, 1.0, -3.0));
        assert!(frustum.intersects(&aabb));
    }

    #[test]
    fn test_all_six_planes_cull() {
        let frustum = Frustum::from_view_projection(&default_camera_vp());
        let cases = [
            Aabb::new(DVec3::splat(10.0), DVec3::splat(20.0)),
            Aabb::new(DVec3::new(-1000.0, 0.0, -5.0), DVec3::new(-999.0, 1.0, -4.0)),
            Aabb::new(DVec3::new(999.0, 0.0, -5.0), DVec3::new(1000.0, 1.0, -4.0)),
            Aabb::new(DVec3::new(0.0, 999.0, -5.0), DVec3::new(1.0, 1000.0, -4.0)),
            Aabb::new(DVec3::new(0.0, -1000.0, -5.0), DVec3::new(1.0, -999.0, -4.0)),
            Aabb::new(DVec3::new(0.0, 0.0, -2000.0), DVec3::new(1.0, 1.0, -1500.0)),
        ];
        for aabb in cases {
            assert!(!frustum.intersects(&aabb), "{aabb:?} should be culled");
        }
    }

    #[test]
    fn test_straddling_box_is_visible() {
        let frustum = Frustum::from_view_projection(&default_camera_vp());
        let aabb = Aabb::new(DVec3::new(-100.0, -1.0, -10.0), DVec3::new(1.0, 1.0, -5.0));
        assert!(frustum.intersects(&aabb));
    }

    #[test]
    fn test_contains_point() {
        let frustum = Frustum::from_view_projection(&default_camera_vp());
        assert!(frustum.contains_point(DVec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(DVec3::new(0.0, 0.0, 10.0)));
    }

    #[test]
    fn test_planes_normalized() {
        let frustum = Frustum::from_view_projection(&default_camera_vp());
        for plane in &frustum.planes {
            assert!((plane.truncate().length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb::from_points([DVec3::new(1.0, -2.0, 3.0), DVec3::new(-1.0, 2.0, 0.0)])
            .unwrap();
        assert_eq!(aabb.min, DVec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, DVec3::new(1.0, 2.0, 3.0));
        assert!(Aabb::from_points(std::iter::empty()).is_none());
        assert_eq!(aabb.expanded(1.0).min, DVec3::new(-2.0, -3.0, -1.0));
    }
}
