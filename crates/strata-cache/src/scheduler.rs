//! Tree-lock state shared by the collector and the fetch workers.

use strata_geo::Srid;

use crate::error::CacheError;
use crate::node::{NodeId, QuadTree};
use crate::queue::{FetchQueue, FetchTask};

/// Hooks the scheduler uses to reach the fetch worker pool.
pub trait FetchWorkers {
    /// Start the pool if it is not running yet.
    fn ensure_started(&self) -> Result<(), CacheError>;
    /// Wake one idle worker.
    fn notify(&self);
}

/// The quadtree and its fetch queue. Both are only touched under one lock.
pub struct TreeState {
    pub tree: QuadTree,
    pub queue: FetchQueue,
    pub srid: Srid,
}

impl TreeState {
    pub fn new(srid: Srid, queue_capacity: usize) -> Self {
        Self {
            tree: QuadTree::new(srid),
            queue: FetchQueue::new(queue_capacity),
            srid,
        }
    }

    /// Request a fetch for `id`.
    ///
    /// Returns `Ok(false)` when the node is gone or already queued. Fails with
    /// [`CacheError::QueueSaturated`] at capacity, or when the worker pool
    /// cannot be started.
    pub fn enqueue(&mut self, id: NodeId, workers: &dyn FetchWorkers) -> Result<bool, CacheError> {
        let Some(node) = self.tree.get(id) else {
            return Ok(false);
        };
        if node.queued {
            return Ok(false);
        }
        self.queue.push(FetchTask::new(id, node.level, &node.bounds))?;
        if let Err(err) = workers.ensure_started() {
            self.queue.abort(id);
            return Err(err);
        }
        if let Some(node) = self.tree.get_mut(id) {
            node.queued = true;
        }
        workers.notify();
        Ok(true)
    }

    /// Withdraw a request no worker has picked up.
    pub fn abort(&mut self, id: NodeId) -> bool {
        if self.queue.abort(id).is_none() {
            return false;
        }
        if let Some(node) = self.tree.get_mut(id) {
            node.queued = false;
        }
        true
    }

    /// Free the subtree below `id`, demoting the requests of freed nodes so
    /// workers drop them first.
    pub fn reset(&mut self, id: NodeId, release_tile: bool) {
        for queued in self.tree.reset(id, release_tile) {
            self.queue.demote(queued);
        }
    }

    /// Switch every node to `srid`, dropping all tiles and requests.
    pub fn reset_all(&mut self, srid: Srid) {
        self.tree.reset_all(srid);
        self.queue.clear();
        self.srid = srid;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::node::Quadrant;

    /// Worker pool stand-in that records calls.
    #[derive(Default)]
    pub(crate) struct RecordingWorkers {
        pub started: AtomicBool,
        pub notified: AtomicUsize,
        pub fail: bool,
    }

    impl FetchWorkers for RecordingWorkers {
        fn ensure_started(&self) -> Result<(), CacheError> {
            if self.fail {
                return Err(CacheError::ThreadStart {
                    role: "fetch worker",
                    source: std::io::Error::other("no threads"),
                });
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn notify(&self) {
            self.notified.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_enqueue_marks_queued_once() {
        let mut state = TreeState::new(Srid::Wgs84, 8);
        let workers = RecordingWorkers::default();
        let root = state.tree.roots()[0];
        let child = state.tree.ensure_child(root, Quadrant::LowerLeft).unwrap();

        assert!(state.enqueue(child, &workers).unwrap());
        assert!(!state.enqueue(child, &workers).unwrap());
        assert!(state.tree.get(child).unwrap().is_queued());
        assert_eq!(state.queue.len(), 1);
        assert!(workers.started.load(Ordering::SeqCst));
        assert_eq!(workers.notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_enqueue_saturated() {
        let mut state = TreeState::new(Srid::Wgs84, 1);
        let workers = RecordingWorkers::default();
        let [a, b, ..] = state.tree.roots();
        state.enqueue(a, &workers).unwrap();
        let err = state.enqueue(b, &workers).unwrap_err();
        assert!(matches!(err, CacheError::QueueSaturated { .. }));
        assert!(!state.tree.get(b).unwrap().is_queued());
    }

    #[test]
    fn test_thread_start_failure_propagates() {
        let mut state = TreeState::new(Srid::Wgs84, 4);
        let workers = RecordingWorkers {
            fail: true,
            ..RecordingWorkers::default()
        };
        let root = state.tree.roots()[0];
        let err = state.enqueue(root, &workers).unwrap_err();
        assert!(matches!(err, CacheError::ThreadStart { .. }));
        assert!(state.queue.is_empty());
        assert!(!state.tree.get(root).unwrap().is_queued());
    }

    #[test]
    fn test_abort_clears_queued() {
        let mut state = TreeState::new(Srid::Wgs84, 4);
        let workers = RecordingWorkers::default();
        let root = state.tree.roots()[3];
        state.enqueue(root, &workers).unwrap();
        assert!(state.abort(root));
        assert!(!state.abort(root));
        assert!(!state.tree.get(root).unwrap().is_queued());
    }

    /// Requests of freed descendants move to the coarsest level.
    #[test]
    fn test_reset_demotes_descendants() {
        let mut state = TreeState::new(Srid::Wgs84, 4);
        let workers = RecordingWorkers::default();
        let root = state.tree.roots()[0];
        let child = state.tree.ensure_child(root, Quadrant::UpperLeft).unwrap();
        state.enqueue(child, &workers).unwrap();

        state.reset(root, false);
        let task = state.queue.iter().next().unwrap();
        assert_eq!(task.node, child);
        assert_eq!(task.level, 0);
        assert!(state.tree.get(child).is_none());
    }

    #[test]
    fn test_reset_all_clears_queue() {
        let mut state = TreeState::new(Srid::Wgs84, 4);
        let workers = RecordingWorkers::default();
        let root = state.tree.roots()[0];
        let child = state.tree.ensure_child(root, Quadrant::UpperLeft).unwrap();
        state.enqueue(child, &workers).unwrap();

        state.reset_all(Srid::Ecef);
        assert!(state.queue.is_empty());
        assert_eq!(state.srid, Srid::Ecef);
    }
}
