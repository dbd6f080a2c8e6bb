//! Screen-space error: how many pixels of geometric error a tile projects to.

use crate::envelope::Envelope;
use crate::point::{EARTH_EQUATORIAL_RADIUS_M, GeoPoint};
use crate::scene::SceneModel;

/// Deepest subdivision level the cache will ever refine to.
pub const MAX_TILE_LEVEL: u32 = 20;

/// Pixel width of the reference map tile the error metric is defined against.
const REFERENCE_TILE_PIXELS: f64 = 256.0;

/// Latitude past which globe scenes start pulling the error metric poleward.
const POLAR_LATITUDE: f64 = 67.0;

/// Vertical lift applied to the bottom of an envelope when picking the
/// closest point, matching the skirt depth hanging below every tile.
const SKIRT_LIFT_M: f64 = 500.0;

/// Ground resolution in meters per pixel of a square reference map tile at
/// `level` and `latitude` (degrees).
pub fn map_tile_resolution(level: u32, latitude: f64) -> f64 {
    let circumference = 2.0 * std::f64::consts::PI * EARTH_EQUATORIAL_RADIUS_M;
    latitude.to_radians().cos() * circumference / (REFERENCE_TILE_PIXELS * 2f64.powi(level as i32))
}

/// Geometric error in meters of a node at `level` covering `bounds`.
///
/// A root spans a quarter of the reference map's width, so the resolution is
/// taken one level deeper. Globe tiles close to a pole evaluate the
/// resolution at the centroid latitude reflected twice as far from the pole.
pub fn geometric_error(level: u32, bounds: &Envelope, globe: bool) -> f64 {
    let mut reslat = 0.0;
    if globe && bounds.min_y.abs().min(bounds.max_y.abs()) > POLAR_LATITUDE {
        let center = bounds.center_y();
        let pole = 90.0 * center.signum();
        reslat = pole - 2.0 * (pole - center);
    }
    map_tile_resolution(level + 1, reslat)
}

/// Projected error in pixels of a tile with the given geometric error.
pub fn screen_space_error(scene: &SceneModel, bounds: &Envelope, geometric_error: f64) -> f64 {
    let camera = scene.camera_geo();

    let mut env = *bounds;
    let centroid = env.center_x();
    if (centroid - camera.longitude).abs() > 180.0 && centroid * camera.longitude < 0.0 {
        env = env.shifted_x(360.0 * camera.longitude.signum());
    }

    let closest = GeoPoint::with_altitude(
        camera.latitude.clamp(env.min_y, env.max_y),
        camera.longitude.clamp(env.min_x, env.max_x),
        ((env.min_z + SKIRT_LIFT_M) + env.max_z) / 2.0,
    );
    let srid = scene.srid();
    let offset = srid.forward(&closest) - scene.camera().location;
    let distance = (offset * srid.nominal_meters()).length().max(f64::EPSILON);

    let half_fov = (scene.camera().fov_y_deg / 2.0).to_radians();
    let lambda = (scene.height() / 2.0) / half_fov.tan();
    lambda * geometric_error / distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srid::Srid;

    fn overhead(srid: Srid, lat: f64, lng: f64, altitude: f64) -> SceneModel {
        SceneModel::look_at(
            srid,
            GeoPoint::with_altitude(lat, lng, altitude),
            GeoPoint::new(lat, lng),
            60.0,
            1280.0,
            720.0,
        )
    }

    #[test]
    fn test_map_tile_resolution_at_equator() {
        assert!((map_tile_resolution(0, 0.0) - 156_543.033_928).abs() < 1e-3);
        assert!((map_tile_resolution(1, 0.0) * 2.0 - map_tile_resolution(0, 0.0)).abs() < 1e-9);
        assert!((map_tile_resolution(3, 60.0) - map_tile_resolution(3, 0.0) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_geometric_error_uses_next_level() {
        let root = Envelope::new(0.0, 0.0, -415.0, 90.0, 90.0, 8850.0);
        assert_eq!(geometric_error(0, &root, true), map_tile_resolution(1, 0.0));
        assert_eq!(geometric_error(4, &root, false), map_tile_resolution(5, 0.0));
    }

    /// Polar globe tiles get a smaller error, planar ones do not.
    #[test]
    fn test_polar_adjustment_only_on_globe() {
        let polar = Envelope::new(0.0, 78.0, 0.0, 10.0, 82.0, 0.0);
        let globe = geometric_error(5, &polar, true);
        let planar = geometric_error(5, &polar, false);
        // Centroid 80° is 10° from the pole; reflected to 70°.
        assert!((globe - map_tile_resolution(6, 70.0)).abs() < 1e-9);
        assert!(globe < planar);

        let southern = Envelope::new(0.0, -82.0, 0.0, 10.0, -78.0, 0.0);
        assert!((geometric_error(5, &southern, true) - globe).abs() < 1e-9);
    }

    #[test]
    fn test_sse_falls_with_distance() {
        let bounds = Envelope::new(-1.0, -1.0, 0.0, 1.0, 1.0, 0.0);
        let error = geometric_error(6, &bounds, true);
        let near = screen_space_error(&overhead(Srid::Ecef, 0.0, 0.0, 10_000.0), &bounds, error);
        let far = screen_space_error(&overhead(Srid::Ecef, 0.0, 0.0, 1_000_000.0), &bounds, error);
        assert!(near > far);
        assert!(near > 2.0);
    }

    /// A camera just east of the antimeridian sees a tile just west of it as
    /// close, not a world-width away.
    #[test]
    fn test_sse_wraps_antimeridian() {
        let scene = overhead(Srid::Wgs84, 0.0, 179.5, 50_000.0);
        let west = Envelope::new(-180.0, -1.0, 0.0, -179.0, 1.0, 0.0);
        let east = Envelope::new(178.0, -1.0, 0.0, 179.0, 1.0, 0.0);
        let error = geometric_error(8, &west, false);
        let wrapped = screen_space_error(&scene, &west, error);
        let direct = screen_space_error(&scene, &east, error);
        assert!((wrapped - direct).abs() / direct < 1e-6);
    }

    #[test]
    fn test_camera_inside_bounds_is_finite() {
        let scene = overhead(Srid::Wgs84, 0.0, 0.0, 250.0);
        let bounds = Envelope::new(-1.0, -1.0, -500.0, 1.0, 1.0, 0.0);
        let sse = screen_space_error(&scene, &bounds, 100.0);
        assert!(sse.is_finite());
    }
}
