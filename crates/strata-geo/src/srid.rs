//! Spatial reference systems the cache can build meshes for.

use glam::{DMat3, DVec3};

use crate::point::{EARTH_EQUATORIAL_RADIUS_M, GeoPoint};

const WGS84_FLATTENING: f64 = 1.0 / 298.257_223_563;
const WGS84_E2: f64 = WGS84_FLATTENING * (2.0 - WGS84_FLATTENING);

/// Nominal length of one degree along the equator, in meters.
const EQUATORIAL_METERS_PER_DEGREE: f64 =
    2.0 * std::f64::consts::PI * EARTH_EQUATORIAL_RADIUS_M / 360.0;

/// Coordinate system of a scene and of the meshes built for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Srid {
    /// EPSG:4326. World coordinates are `(longitude°, latitude°, height m)`,
    /// i.e. a flat equirectangular map.
    Wgs84,
    /// EPSG:4978. Earth-centered, earth-fixed cartesian meters (globe).
    Ecef,
}

impl Srid {
    /// EPSG code.
    pub fn code(self) -> i32 {
        match self {
            Srid::Wgs84 => 4326,
            Srid::Ecef => 4978,
        }
    }

    /// Look up a system by EPSG code.
    pub fn from_code(code: i32) -> Option<Srid> {
        match code {
            4326 => Some(Srid::Wgs84),
            4978 => Some(Srid::Ecef),
            _ => None,
        }
    }

    /// Whether the system models the earth as a globe rather than a plane.
    pub fn is_globe(self) -> bool {
        matches!(self, Srid::Ecef)
    }

    /// Project a geodetic point into this system's world coordinates.
    pub fn forward(self, point: &GeoPoint) -> DVec3 {
        match self {
            Srid::Wgs84 => DVec3::new(point.longitude, point.latitude, point.altitude),
            Srid::Ecef => {
                let phi = point.latitude.to_radians();
                let lambda = point.longitude.to_radians();
                let (sin_phi, cos_phi) = phi.sin_cos();
                let n = EARTH_EQUATORIAL_RADIUS_M / (1.0 - WGS84_E2 * sin_phi * sin_phi).sqrt();
                DVec3::new(
                    (n + point.altitude) * cos_phi * lambda.cos(),
                    (n + point.altitude) * cos_phi * lambda.sin(),
                    (n * (1.0 - WGS84_E2) + point.altitude) * sin_phi,
                )
            }
        }
    }

    /// Convert world coordinates of this system back to a geodetic point.
    pub fn inverse(self, xyz: DVec3) -> GeoPoint {
        match self {
            Srid::Wgs84 => GeoPoint::with_altitude(xyz.y, xyz.x, xyz.z),
            Srid::Ecef => {
                let longitude = xyz.y.atan2(xyz.x).to_degrees();
                let p = (xyz.x * xyz.x + xyz.y * xyz.y).sqrt();
                if p < 1e-6 {
                    let b = EARTH_EQUATORIAL_RADIUS_M * (1.0 - WGS84_FLATTENING);
                    let latitude = if xyz.z >= 0.0 { 90.0 } else { -90.0 };
                    return GeoPoint::with_altitude(latitude, 0.0, xyz.z.abs() - b);
                }
                let mut phi = xyz.z.atan2(p * (1.0 - WGS84_E2));
                let mut height = 0.0;
                for _ in 0..6 {
                    let sin_phi = phi.sin();
                    let n = EARTH_EQUATORIAL_RADIUS_M / (1.0 - WGS84_E2 * sin_phi * sin_phi).sqrt();
                    height = p / phi.cos() - n;
                    phi = xyz.z.atan2(p * (1.0 - WGS84_E2 * n / (n + height)));
                }
                GeoPoint::with_altitude(phi.to_degrees(), longitude, height)
            }
        }
    }

    /// Per-axis factors converting world units of this system to meters.
    pub fn nominal_meters(self) -> DVec3 {
        match self {
            Srid::Wgs84 => DVec3::new(
                EQUATORIAL_METERS_PER_DEGREE,
                EQUATORIAL_METERS_PER_DEGREE,
                1.0,
            ),
            Srid::Ecef => DVec3::ONE,
        }
    }

    /// Rotation taking east/north/up vectors at `point` into this system's axes.
    pub fn enu_rotation(self, point: &GeoPoint) -> DMat3 {
        match self {
            Srid::Wgs84 => DMat3::IDENTITY,
            Srid::Ecef => {
                let (sin_phi, cos_phi) = point.latitude.to_radians().sin_cos();
                let (sin_lambda, cos_lambda) = point.longitude.to_radians().sin_cos();
                let east = DVec3::new(-sin_lambda, cos_lambda, 0.0);
                let north = DVec3::new(-sin_phi * cos_lambda, -sin_phi * sin_lambda, cos_phi);
                let up = DVec3::new(cos_phi * cos_lambda, cos_phi * sin_lambda, sin_phi);
                DMat3::from_cols(east, north, up)
            }
        }
    }
}
