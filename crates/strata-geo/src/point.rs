//! Geodetic points and meters-per-degree approximations.

/// WGS84 semi-major axis in meters.
pub const EARTH_EQUATORIAL_RADIUS_M: f64 = 6_378_137.0;

/// A WGS84 location. Altitude is height above the ellipsoid in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
    /// Height above the ellipsoid in meters.
    pub altitude: f64,
}

impl GeoPoint {
    /// A point on the ellipsoid surface.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
        }
    }

    /// A point at the given height above the ellipsoid.
    pub fn with_altitude(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }
}

/// Approximate length of one degree of latitude, in meters, at `latitude`.
pub fn meters_per_degree_latitude(latitude: f64) -> f64 {
    let phi = latitude.to_radians();
    111_132.92 - 559.82 * (2.0 * phi).cos() + 1.175 * (4.0 * phi).cos()
        - 0.0023 * (6.0 * phi).cos()
}

/// Approximate length of one degree of longitude, in meters, at `latitude`.
pub fn meters_per_degree_longitude(latitude: f64) -> f64 {
    let phi = latitude.to_radians();
    111_412.84 * phi.cos() - 93.5 * (3.0 * phi).cos() + 0.118 * (5.0 * phi).cos()
}

/// Reflect a latitude that ran past a pole back into `[-90, 90]`.
pub fn wrap_latitude(latitude: f64) -> f64 {
    if latitude > 90.0 {
        180.0 - latitude
    } else if latitude < -90.0 {
        -180.0 - latitude
    } else {
        latitude
    }
}

/// Bring a longitude that crossed the antimeridian back into `[-180, 180]`.
pub fn wrap_longitude(longitude: f64) -> f64 {
    if longitude < -180.0 {
        longitude + 360.0
    } else if longitude > 180.0 {
        longitude - 360.0
    } else {
        longitude
    }
}
