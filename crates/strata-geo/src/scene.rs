//! Camera scene model: what the LOD collector needs to know about a view.

use glam::{DMat4, DVec3};

use crate::envelope::Envelope;
use crate::frustum::{Aabb, Frustum};
use crate::point::{EARTH_EQUATORIAL_RADIUS_M, GeoPoint};
use crate::srid::Srid;

/// Samples per envelope axis when bounding a patch of the ellipsoid.
const GLOBE_SAMPLES: usize = 5;

const NEAR_PLANE_M: f64 = 1.0;
const FAR_PLANE_M: f64 = 1.0e9;

/// Camera state in the scene's world coordinates.
#[derive(Clone, Debug)]
pub struct Camera {
    /// Eye position in world coordinates.
    pub location: DVec3,
    /// Look-at point in world coordinates.
    pub target: DVec3,
    /// Vertical field of view in degrees.
    pub fov_y_deg: f64,
    /// Maps world coordinates to clip space (`[0, 1]` depth).
    pub view_projection: DMat4,
}

/// A snapshot of the view: projection, camera and viewport.
#[derive(Clone, Debug)]
pub struct SceneModel {
    srid: Srid,
    camera: Camera,
    width: f64,
    height: f64,
    frustum: Frustum,
}

impl SceneModel {
    /// Build a scene from an explicit camera.
    pub fn new(srid: Srid, camera: Camera, width: f64, height: f64) -> Self {
        let frustum = Frustum::from_view_projection(&camera.view_projection);
        Self {
            srid,
            camera,
            width,
            height,
            frustum,
        }
    }

    /// Perspective camera at `eye` looking at `target`.
    ///
    /// The view is built in nominal meters so planar WGS84 scenes have the same
    /// proportions as globe scenes.
    pub fn look_at(
        srid: Srid,
        eye: GeoPoint,
        target: GeoPoint,
        fov_y_deg: f64,
        width: f64,
        height: f64,
    ) -> Self {
        let location = srid.forward(&eye);
        let target_xyz = srid.forward(&target);
        let scale = srid.nominal_meters();
        let eye_m = location * scale;
        let target_m = target_xyz * scale;

        let forward = (target_m - eye_m).normalize_or_zero();
        let preferred_up = match srid {
            Srid::Wgs84 => DVec3::Z,
            Srid::Ecef => eye_m.normalize_or(DVec3::Z),
        };
        let up = [preferred_up, DVec3::Z, DVec3::Y]
            .into_iter()
            .find(|candidate| forward.cross(*candidate).length() > 1e-6)
            .unwrap_or(DVec3::X);

        let view = DMat4::look_at_rh(eye_m, target_m, up);
        let proj = DMat4::perspective_rh(
            fov_y_deg.to_radians(),
            width / height.max(1.0),
            NEAR_PLANE_M,
            FAR_PLANE_M,
        );
        let camera = Camera {
            location,
            target: target_xyz,
            fov_y_deg,
            view_projection: proj * view * DMat4::from_scale(scale),
        };
        Self::new(srid, camera, width, height)
    }

    pub fn srid(&self) -> Srid {
        self.srid
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Viewport width in pixels.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Viewport height in pixels.
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Geodetic camera position.
    pub fn camera_geo(&self) -> GeoPoint {
        self.srid.inverse(self.camera.location)
    }

    /// Geodetic look-at point.
    pub fn focus_geo(&self) -> GeoPoint {
        self.srid.inverse(self.camera.target)
    }

    /// World-space box enclosing a geographic envelope.
    pub fn world_aabb(&self, bounds: &Envelope) -> Aabb {
        match self.srid {
            Srid::Wgs84 => Aabb::new(
                DVec3::new(bounds.min_x, bounds.min_y, bounds.min_z),
                DVec3::new(bounds.max_x, bounds.max_y, bounds.max_z),
            ),
            Srid::Ecef => {
                let steps = (GLOBE_SAMPLES - 1) as f64;
                let points = (0..GLOBE_SAMPLES).flat_map(|iy| {
                    (0..GLOBE_SAMPLES).flat_map(move |ix| {
                        let lat = bounds.min_y + bounds.height() * iy as f64 / steps;
                        let lng = bounds.min_x + bounds.width() * ix as f64 / steps;
                        [bounds.min_z, bounds.max_z].map(|z| {
                            Srid::Ecef.forward(&GeoPoint::with_altitude(lat, lng, z))
                        })
                    })
                });
                // Sampled corners miss the bulge of the surface between samples.
                let spacing = (bounds.width().max(bounds.height()) / steps).to_radians();
                let sagitta =
                    (EARTH_EQUATORIAL_RADIUS_M + bounds.max_z) * (1.0 - (spacing / 2.0).cos());
                Aabb::from_points(points)
                    .map(|aabb| aabb.expanded(sagitta))
                    .unwrap_or(Aabb::new(DVec3::ZERO, DVec3::ZERO))
            }
        }
    }

    /// Whether the envelope intersects the view frustum.
    ///
    /// On planar WGS84 scenes an envelope on the far side of the antimeridian
    /// from the focus longitude is re-tested one world-width over.
    pub fn intersects(&self, bounds: &Envelope) -> bool {
        if self.frustum.intersects(&self.world_aabb(bounds)) {
            return true;
        }
        let centroid = bounds.center_x();
        let focus_lng = self.focus_geo().longitude;
        if self.srid == Srid::Wgs84 && focus_lng * centroid < 0.0 {
            let shifted = bounds.shifted_x(-360.0 * centroid.signum());
            return self.frustum.intersects(&self.world_aabb(&shifted));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overhead(srid: Srid, lat: f64, lng: f64, altitude: f64) -> SceneModel {
        SceneModel::look_at(
            srid,
            GeoPoint::with_altitude(lat, lng, altitude),
            GeoPoint::new(lat, lng),
            45.0,
            1920.0,
            1080.0,
        )
    }

    #[test]
    fn test_camera_geo_roundtrips() {
        let scene = overhead(Srid::Ecef, 40.0, -105.0, 10_000.0);
        let cam = scene.camera_geo();
        assert!((cam.latitude - 40.0).abs() < 1e-6);
        assert!((cam.longitude + 105.0).abs() < 1e-6);
        assert!((cam.altitude - 10_000.0).abs() < 1e-2);
        assert!((scene.focus_geo().altitude).abs() < 1e-2);
    }

    /// The patch under the camera is visible, a patch a quarter turn away is not.
    #[test]
    fn test_globe_visibility() {
        let scene = overhead(Srid::Ecef, 0.0, 0.0, 50_000.0);
        let below = Envelope::new(-0.5, -0.5, -415.0, 0.5, 0.5, 8850.0);
        let side = Envelope::new(89.5, -0.5, -415.0, 90.5, 0.5, 8850.0);
        assert!(scene.intersects(&below));
        assert!(!scene.intersects(&side));
    }

    #[test]
    fn test_planar_visibility() {
        let scene = overhead(Srid::Wgs84, 10.0, 20.0, 100_000.0);
        let below = Envelope::new(19.5, 9.5, 0.0, 20.5, 10.5, 100.0);
        let far_away = Envelope::new(-60.0, -40.0, 0.0, -50.0, -30.0, 100.0);
        assert!(scene.intersects(&below));
        assert!(!scene.intersects(&far_away));
    }

    /// Looking at the antimeridian from the east, tiles stored west of it are
    /// found by the shifted re-test.
    #[test]
    fn test_planar_antimeridian_retest() {
        let scene = overhead(Srid::Wgs84, 0.0, 179.9, 200_000.0);
        let west_of_line = Envelope::new(-180.0, -1.0, 0.0, -179.0, 1.0, 100.0);
        assert!(!scene.frustum().intersects(&scene.world_aabb(&west_of_line)));
        assert!(scene.intersects(&west_of_line));
    }

    #[test]
    fn test_globe_box_covers_bulge() {
        let scene = overhead(Srid::Ecef, 0.0, 0.0, 1_000.0);
        let quadrant = Envelope::new(-90.0, 0.0, 0.0, 0.0, 90.0, 0.0);
        let aabb = scene.world_aabb(&quadrant);
        // Point at the middle of the quadrant's surface must be inside.
        let mid = Srid::Ecef.forward(&GeoPoint::new(45.0, -45.0));
        assert!(mid.cmpge(aabb.min).all() && mid.cmple(aabb.max).all());
    }
}
