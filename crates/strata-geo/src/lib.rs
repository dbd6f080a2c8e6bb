//! Geodetic primitives for the terrain cache: points, envelopes, coordinate
//! systems, view frusta, the camera scene model and screen-space error math.

mod envelope;
mod frustum;
mod point;
mod scene;
mod srid;
mod sse;

pub use envelope::Envelope;
pub use frustum::{Aabb, Frustum};
pub use point::{
    EARTH_EQUATORIAL_RADIUS_M, GeoPoint, meters_per_degree_latitude, meters_per_degree_longitude,
    wrap_latitude, wrap_longitude,
};
pub use scene::{Camera, SceneModel};
pub use srid::Srid;
pub use sse::{MAX_TILE_LEVEL, geometric_error, map_tile_resolution, screen_space_error};
