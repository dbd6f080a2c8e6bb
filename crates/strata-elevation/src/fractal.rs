//! Procedural elevation source built from fractal Brownian motion.
//!
//! Noise is sampled on the unit sphere so the terrain is seamless across the
//! antimeridian and the poles.

use glam::DVec3;
use noise::{NoiseFn, Simplex};
use strata_geo::Envelope;

use crate::source::ElevationSource;

/// Configuration for multi-octave fBm terrain.
#[derive(Clone, Debug)]
pub struct FractalParams {
    /// Seed for deterministic generation.
    pub seed: u32,
    /// Number of noise octaves to composite.
    pub octaves: u32,
    /// Frequency multiplier between successive octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between successive octaves.
    pub persistence: f64,
    /// Frequency of the first octave, in cycles per unit-sphere radius.
    pub base_frequency: f64,
    /// Amplitude of the first octave, in meters.
    pub amplitude: f64,
    /// Constant added to every sample, in meters.
    pub base_height: f64,
}

impl Default for FractalParams {
    fn default() -> Self {
        Self {
            seed: 0,
            octaves: 6,
            lacunarity: 2.0,
            persistence: 0.5,
            base_frequency: 2.0,
            amplitude: 3000.0,
            base_height: 500.0,
        }
    }
}

/// An elevation source producing fBm simplex-noise terrain.
pub struct FractalSource {
    name: String,
    bounds: Envelope,
    resolution: f64,
    noise: Simplex,
    params: FractalParams,
}

impl FractalSource {
    /// A global source with the given nominal post spacing in meters.
    pub fn new(name: impl Into<String>, params: FractalParams, resolution: f64) -> Self {
        let noise = Simplex::new(params.seed);
        let mut source = Self {
            name: name.into(),
            bounds: Envelope::from_degrees(-180.0, -90.0, 180.0, 90.0),
            resolution,
            noise,
            params,
        };
        let max = source.max_amplitude();
        source.bounds = source
            .bounds
            .with_z(source.params.base_height - max, source.params.base_height + max);
        source
    }

    /// Restrict the source to a footprint.
    pub fn with_bounds(mut self, bounds: Envelope) -> Self {
        self.bounds = bounds.with_z(self.bounds.min_z, self.bounds.max_z);
        self
    }

    /// Geometric sum of all octave amplitudes.
    pub fn max_amplitude(&self) -> f64 {
        let mut sum = 0.0;
        let mut amp = self.params.amplitude;
        for _ in 0..self.params.octaves {
            sum += amp;
            amp *= self.params.persistence;
        }
        sum
    }

    fn fbm(&self, point: DVec3) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = self.params.amplitude;
        for _ in 0..self.params.octaves {
            let p = point * frequency;
            total += self.noise.get([p.x, p.y, p.z]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }
        total
    }
}

impl ElevationSource for FractalSource {
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
        let (sin_lat, cos_lat) = latitude.to_radians().sin_cos();
        let (sin_lng, cos_lng) = longitude.to_radians().sin_cos();
        let unit = DVec3::new(cos_lat * cos_lng, cos_lat * sin_lng, sin_lat);
        Some(self.params.base_height + self.fbm(unit))
    }
}
