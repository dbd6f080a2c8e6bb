use strata_geo::Envelope;

/// A provider of elevation samples over a geographic region.
///
/// Implementations must be cheap to call from many fetch workers at once.
pub trait ElevationSource: Send + Sync {
    /// Unique name the source is registered under.
    fn name(&self) -> &str;

    /// Geographic footprint in degrees (`x` longitude, `y` latitude).
    fn bounds(&self) -> Envelope;

    /// Nominal post spacing in meters. Lower is finer.
    fn resolution(&self) -> f64;

    /// Height above the ellipsoid in meters, or `None` where the source has
    /// no data.
    fn sample(&self, latitude: f64, longitude: f64) -> Option<f64>;
}
