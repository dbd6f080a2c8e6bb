use strata_geo::Envelope;

/// Order in which overlapping sources are consulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResolutionOrder {
    /// Finest source first.
    #[default]
    HighToLow,
    /// Coarsest source first.
    LowToHigh,
}

/// Parameters narrowing an elevation query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryParameters {
    pub order: ResolutionOrder,
    /// Exclude sources finer than this post spacing (meters).
    pub max_resolution: Option<f64>,
    /// Only consult sources overlapping this footprint.
    pub spatial_filter: Option<Envelope>,
}

impl QueryParameters {
    pub fn new(order: ResolutionOrder) -> Self {
        Self {
            order,
            ..Default::default()
        }
    }

    pub fn with_max_resolution(mut self, resolution: f64) -> Self {
        self.max_resolution = Some(resolution);
        self
    }

    pub fn with_spatial_filter(mut self, filter: Envelope) -> Self {
        self.spatial_filter = Some(filter);
        self
    }

    /// Whether a source of the given resolution passes the resolution limit.
    pub(crate) fn admits_resolution(&self, resolution: f64) -> bool {
        self.max_resolution.is_none_or(|limit| resolution >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unconstrained() {
        let params = QueryParameters::default();
        assert_eq!(params.order, ResolutionOrder::HighToLow);
        assert!(params.admits_resolution(0.001));
        assert!(params.spatial_filter.is_none());
    }

    /// A limit keeps sources at or coarser than the requested spacing.
    #[test]
    fn test_max_resolution_excludes_finer_sources() {
        let params = QueryParameters::new(ResolutionOrder::LowToHigh).with_max_resolution(30.0);
        assert!(params.admits_resolution(30.0));
        assert!(params.admits_resolution(90.0));
        assert!(!params.admits_resolution(10.0));
    }
}
