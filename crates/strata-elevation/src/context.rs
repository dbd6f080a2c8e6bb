//! Source registry, queries and change notification.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crossbeam_channel::{Receiver, Sender, unbounded};
use rustc_hash::FxHashMap;
use strata_geo::{Envelope, GeoPoint};
use tracing::debug;

use crate::query::{QueryParameters, ResolutionOrder};
use crate::source::ElevationSource;

/// Change notifications delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    Attached(String),
    Detached(String),
    /// The named source's samples changed in place.
    ContentChanged(String),
}

#[derive(Default)]
struct Registry {
    sources: Vec<Arc<dyn ElevationSource>>,
    by_name: FxHashMap<String, usize>,
}

#[derive(Default)]
struct ContextInner {
    registry: RwLock<Registry>,
    subscribers: Mutex<Vec<Sender<SourceEvent>>>,
}

impl ContextInner {
    fn broadcast(&self, event: SourceEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Receivers that were dropped are pruned on the next broadcast.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// The set of elevation sources a terrain service samples from.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Clone, Default)]
pub struct ElevationContext {
    inner: Arc<ContextInner>,
}

impl ElevationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. A source already registered under the same name is
    /// replaced.
    pub fn attach(&self, source: Arc<dyn ElevationSource>) {
        let name = source.name().to_owned();
        {
            let mut registry = self
                .inner
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match registry.by_name.get(&name).copied() {
                Some(index) => registry.sources[index] = source,
                None => {
                    let index = registry.sources.len();
                    registry.sources.push(source);
                    registry.by_name.insert(name.clone(), index);
                }
            }
        }
        debug!(source = %name, "elevation source attached");
        self.inner.broadcast(SourceEvent::Attached(name));
    }

    /// Unregister a source by name, returning it if it was attached.
    pub fn detach(&self, name: &str) -> Option<Arc<dyn ElevationSource>> {
        let removed = {
            let mut registry = self
                .inner
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let index = registry.by_name.remove(name)?;
            let removed = registry.sources.swap_remove(index);
            if let Some(moved) = registry.sources.get(index) {
                let moved_name = moved.name().to_owned();
                registry.by_name.insert(moved_name, index);
            }
            removed
        };
        debug!(source = %name, "elevation source detached");
        self.inner.broadcast(SourceEvent::Detached(name.to_owned()));
        Some(removed)
    }

    /// Every attached source, in attach order (modulo detaches).
    pub fn sources(&self) -> Vec<Arc<dyn ElevationSource>> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sources
            .clone()
    }

    /// A new channel receiving every future [`SourceEvent`].
    pub fn subscribe(&self) -> Receiver<SourceEvent> {
        let (tx, rx) = unbounded();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// A handle a mutable source uses to announce that its samples changed.
    pub fn notifier(&self, name: impl Into<String>) -> ContentNotifier {
        ContentNotifier {
            name: name.into(),
            context: Arc::downgrade(&self.inner),
        }
    }

    /// Sources covering `filter` that satisfy `params`, ordered by resolution.
    pub fn query_region_sources(
        &self,
        filter: &Envelope,
        params: &QueryParameters,
    ) -> RegionSources {
        let registry = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<_> = registry
            .sources
            .iter()
            .filter(|source| {
                let bounds = source.bounds();
                bounds.intersects_2d(filter)
                    && params
                        .spatial_filter
                        .is_none_or(|spatial| bounds.intersects_2d(&spatial))
                    && params.admits_resolution(source.resolution())
            })
            .cloned()
            .collect();
        drop(registry);

        matching.sort_by(|a, b| {
            let ord = a.resolution().total_cmp(&b.resolution());
            match params.order {
                ResolutionOrder::HighToLow => ord,
                ResolutionOrder::LowToHigh => ord.reverse(),
            }
        });
        RegionSources {
            iter: matching.into_iter(),
        }
    }

    /// Fill `out[i]` with the elevation at `points[i]`, taking the first
    /// source in `params.order` that has data there. Points no source
    /// covers are set to NaN. Returns the number of NaN holes left.
    pub fn query_elevation(
        &self,
        points: &[GeoPoint],
        params: &QueryParameters,
        out: &mut [f64],
    ) -> usize {
        let count = points.len().min(out.len());
        if count == 0 {
            return 0;
        }
        let footprint = params.spatial_filter.unwrap_or_else(|| points_envelope(&points[..count]));
        let sources: Vec<_> = self.query_region_sources(&footprint, params).collect();

        let mut holes = 0;
        for (point, slot) in points.iter().zip(out.iter_mut()) {
            *slot = sample_first(&sources, point.latitude, point.longitude).unwrap_or(f64::NAN);
            if slot.is_nan() {
                holes += 1;
            }
        }
        holes
    }

    /// Elevation from the finest source with data at the point.
    pub fn elevation_at(&self, latitude: f64, longitude: f64) -> Option<f64> {
        let filter = Envelope::from_degrees(longitude, latitude, longitude, latitude);
        let sources: Vec<_> = self
            .query_region_sources(&filter, &QueryParameters::default())
            .collect();
        sample_first(&sources, latitude, longitude)
    }
}

fn sample_first(
    sources: &[Arc<dyn ElevationSource>],
    latitude: f64,
    longitude: f64,
) -> Option<f64> {
    sources
        .iter()
        .filter(|source| source.bounds().contains_point(longitude, latitude))
        .find_map(|source| source.sample(latitude, longitude).filter(|h| h.is_finite()))
}

fn points_envelope(points: &[GeoPoint]) -> Envelope {
    let mut env = Envelope::from_degrees(
        points[0].longitude,
        points[0].latitude,
        points[0].longitude,
        points[0].latitude,
    );
    for p in &points[1..] {
        env.min_x = env.min_x.min(p.longitude);
        env.max_x = env.max_x.max(p.longitude);
        env.min_y = env.min_y.min(p.latitude);
        env.max_y = env.max_y.max(p.latitude);
    }
    env
}

/// Cursor over the sources matched by a region query.
pub struct RegionSources {
    iter: std::vec::IntoIter<Arc<dyn ElevationSource>>,
}

impl Iterator for RegionSources {
    type Item = Arc<dyn ElevationSource>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl ExactSizeIterator for RegionSources {}

/// Announces content changes of one named source.
///
/// Holds the context weakly, so a notifier outliving its context is inert.
#[derive(Clone)]
pub struct ContentNotifier {
    name: String,
    context: Weak<ContextInner>,
}

impl ContentNotifier {
    pub fn notify(&self) {
        if let Some(inner) = self.context.upgrade() {
            inner.broadcast(SourceEvent::ContentChanged(self.name.clone()));
        }
    }
}
