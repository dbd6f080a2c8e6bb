//! Bounded queue of fetch requests, ordered by level and camera distance.

use std::cmp::Ordering;

use glam::DVec2;
use strata_geo::{Envelope, GeoPoint};

use crate::error::CacheError;
use crate::node::NodeId;

/// Default number of outstanding fetch requests.
pub const DEFAULT_QUEUE_CAPACITY: usize = 225;

/// A request to build the tile of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchTask {
    pub node: NodeId,
    /// Sort key; coarser levels are served first.
    pub level: u32,
    /// Footprint centre as `(longitude, latitude)`.
    pub centroid: DVec2,
    /// Radius of the footprint's bounding circle, in degrees.
    pub radius: f64,
}

impl FetchTask {
    pub fn new(node: NodeId, level: u32, bounds: &Envelope) -> Self {
        Self {
            node,
            level,
            centroid: DVec2::new(bounds.center_x(), bounds.center_y()),
            radius: bounds.radius(),
        }
    }

    /// Squared degree distance from `camera` to the centroid, wrapping across
    /// the antimeridian, less the squared bounding radius. Zero when the
    /// camera is inside the bounding circle.
    pub fn distance_key(&self, camera: &GeoPoint) -> f64 {
        let mut dx = (self.centroid.x - camera.longitude).abs();
        if dx > 180.0 {
            dx = 360.0 - dx;
        }
        let dy = self.centroid.y - camera.latitude;
        (dx * dx + dy * dy - self.radius * self.radius).max(0.0)
    }
}

/// Outstanding fetch requests.
///
/// Entries are kept in a vector sorted so that finer levels sit at the front
/// and, within a level, farther tiles before nearer ones. Workers pop from
/// the back, so the coarsest, nearest request is served first.
pub struct FetchQueue {
    entries: Vec<FetchTask>,
    capacity: usize,
    sorted: bool,
}

impl Default for FetchQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl FetchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            sorted: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.iter().any(|task| task.node == node)
    }

    /// Append a request. Fails with [`CacheError::QueueSaturated`] at capacity.
    pub fn push(&mut self, task: FetchTask) -> Result<(), CacheError> {
        if self.entries.len() >= self.capacity {
            return Err(CacheError::QueueSaturated {
                capacity: self.capacity,
            });
        }
        self.entries.push(task);
        self.sorted = false;
        Ok(())
    }

    /// Remove a request that has not been picked up yet.
    pub fn abort(&mut self, node: NodeId) -> Option<FetchTask> {
        let index = self.entries.iter().position(|task| task.node == node)?;
        Some(self.entries.remove(index))
    }

    /// Move a request to the coarsest level so it is popped next.
    pub fn demote(&mut self, node: NodeId) {
        if let Some(task) = self.entries.iter_mut().find(|task| task.node == node) {
            task.level = 0;
            self.sorted = false;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sorted = true;
    }

    /// Force a re-sort before the next pop, e.g. after the camera moved.
    pub fn mark_unsorted(&mut self) {
        self.sorted = false;
    }

    pub fn sort(&mut self, camera: &GeoPoint) {
        self.entries.sort_by(|a, b| compare_tasks(a, b, camera));
        self.sorted = true;
    }

    /// Take the highest-priority request. Sorts first if needed.
    pub fn pop(&mut self, camera: &GeoPoint) -> Option<FetchTask> {
        if !self.sorted {
            self.sort(camera);
        }
        self.entries.pop()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchTask> {
        self.entries.iter()
    }
}

/// Finer levels first, then farther first, so the back of a sorted queue is
/// the coarsest nearest request.
fn compare_tasks(a: &FetchTask, b: &FetchTask, camera: &GeoPoint) -> Ordering {
    b.level
        .cmp(&a.level)
        .then_with(|| b.distance_key(camera).total_cmp(&a.distance_key(camera)))
}
