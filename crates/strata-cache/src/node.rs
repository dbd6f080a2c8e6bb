//! Arena-backed quadtree of terrain nodes.
//!
//! Nodes live in slots addressed by generational [`NodeId`]s. Freeing a
//! subtree bumps the generation of every slot it occupied, so ids still held
//! by the fetch queue or by a worker stop resolving instead of aliasing the
//! slot's next occupant.

use std::sync::Arc;

use strata_geo::{Envelope, Srid};
use strata_mesh::TerrainTile;

/// Number of level-0 nodes: four longitude quadrants in each hemisphere.
pub const ROOT_COUNT: usize = 8;

/// Elevation range a node starts with before any descendant reports data.
pub const INITIAL_MIN_Z: f64 = -415.0;
pub const INITIAL_MAX_Z: f64 = 8850.0;

/// Source version of a node that has never been populated.
pub const NEVER_POPULATED: i64 = -1;

/// Generational handle to a node slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Child position inside a parent's footprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quadrant {
    LowerLeft,
    LowerRight,
    UpperRight,
    UpperLeft,
}

impl Quadrant {
    /// Counter-clockwise from the south-west corner, matching
    /// [`Envelope::quadrants`].
    pub const ALL: [Quadrant; 4] = [
        Quadrant::LowerLeft,
        Quadrant::LowerRight,
        Quadrant::UpperRight,
        Quadrant::UpperLeft,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A tile that descendants may be approximated from.
#[derive(Clone, Debug)]
pub struct DeriveSource {
    pub tile: Arc<TerrainTile>,
    pub version: i64,
}

impl DeriveSource {
    /// Version stamped on tiles derived from this source. One less than the
    /// source so any real fetch at the source's version supersedes them.
    pub fn derived_version(&self) -> i64 {
        self.version - 1
    }
}

/// One node of the terrain quadtree.
#[derive(Debug)]
pub struct QuadNode {
    pub(crate) bounds: Envelope,
    pub(crate) level: u32,
    pub(crate) tile: Option<Arc<TerrainTile>>,
    pub(crate) source_version: i64,
    pub(crate) derived: bool,
    pub(crate) queued: bool,
    pub(crate) srid: Srid,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; 4],
}

impl QuadNode {
    fn new(footprint: &Envelope, level: u32, srid: Srid, parent: Option<NodeId>) -> Self {
        Self {
            bounds: footprint.with_z(INITIAL_MIN_Z, INITIAL_MAX_Z),
            level,
            tile: None,
            source_version: NEVER_POPULATED,
            derived: true,
            queued: false,
            srid,
            parent,
            children: [None; 4],
        }
    }

    pub fn bounds(&self) -> &Envelope {
        &self.bounds
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn tile(&self) -> Option<&Arc<TerrainTile>> {
        self.tile.as_ref()
    }

    pub fn source_version(&self) -> i64 {
        self.source_version
    }

    /// Whether the tile was approximated from an ancestor.
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    /// Whether a fetch request for this node is outstanding.
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn srid(&self) -> Srid {
        self.srid
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

struct Slot {
    generation: u32,
    node: Option<QuadNode>,
}

/// The quadtree arena. Its eight roots are never freed.
pub struct QuadTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: [NodeId; ROOT_COUNT],
    live: usize,
}

impl QuadTree {
    pub fn new(srid: Srid) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            roots: [NodeId {
                index: 0,
                generation: 0,
            }; ROOT_COUNT],
            live: 0,
        };
        for (i, footprint) in root_footprints().iter().enumerate() {
            tree.roots[i] = tree.insert(QuadNode::new(footprint, 0, srid, None));
        }
        tree
    }

    pub fn roots(&self) -> [NodeId; ROOT_COUNT] {
        self.roots
    }

    /// Number of live nodes, roots included.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, id: NodeId) -> Option<&QuadNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut QuadNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// The existing child in `quadrant`, if any.
    pub fn child(&self, id: NodeId, quadrant: Quadrant) -> Option<NodeId> {
        self.get(id)?.children[quadrant.index()].filter(|child| self.contains(*child))
    }

    /// The child in `quadrant`, created with the parent's SRID if missing.
    pub fn ensure_child(&mut self, id: NodeId, quadrant: Quadrant) -> Option<NodeId> {
        if let Some(child) = self.child(id, quadrant) {
            return Some(child);
        }
        let parent = self.get(id)?;
        let footprint = parent.bounds.quadrants()[quadrant.index()];
        let node = QuadNode::new(&footprint, parent.level + 1, parent.srid, Some(id));
        let child = self.insert(node);
        if let Some(parent) = self.get_mut(id) {
            parent.children[quadrant.index()] = Some(child);
        }
        Some(child)
    }

    /// Detach and free every descendant of `id`. With `release_tile` the
    /// node's own tile is dropped and the node marked derived.
    ///
    /// Returns the descendants that had a fetch outstanding; their queue
    /// entries must be demoted by the caller.
    pub fn reset(&mut self, id: NodeId, release_tile: bool) -> Vec<NodeId> {
        let mut queued = Vec::new();
        let Some(node) = self.get_mut(id) else {
            return queued;
        };
        let mut pending: Vec<NodeId> = node.children.iter_mut().filter_map(Option::take).collect();
        if release_tile {
            node.tile = None;
            node.derived = true;
        }

        while let Some(child) = pending.pop() {
            let Some(removed) = self.remove(child) else {
                continue;
            };
            if removed.queued {
                queued.push(child);
            }
            pending.extend(removed.children.into_iter().flatten());
        }
        queued
    }

    /// Widen ancestors' elevation range to contain `id`'s, stopping at the
    /// first ancestor that already does.
    pub fn update_parent_z_bounds(&mut self, id: NodeId) {
        let Some(node) = self.get(id) else {
            return;
        };
        let (mut min_z, mut max_z, mut parent) = (node.bounds.min_z, node.bounds.max_z, node.parent);
        while let Some(pid) = parent {
            let Some(p) = self.get_mut(pid) else {
                return;
            };
            if p.bounds.min_z <= min_z && p.bounds.max_z >= max_z {
                return;
            }
            p.bounds.min_z = p.bounds.min_z.min(min_z);
            p.bounds.max_z = p.bounds.max_z.max(max_z);
            (min_z, max_z, parent) = (p.bounds.min_z, p.bounds.max_z, p.parent);
        }
    }

    /// Whether `id` must be (re)fetched to be current for `srid` at
    /// `source_version`. A missing node always needs data.
    pub fn needs_fetch(&self, id: Option<NodeId>, srid: Srid, source_version: i64) -> bool {
        let Some(node) = id.and_then(|id| self.get(id)) else {
            return true;
        };
        if node.source_version != source_version {
            return true;
        }
        !node.queued && node.tile.as_ref().is_none_or(|tile| tile.srid() != srid)
    }

    /// Store a tile derived from `source`. Dropped when the node already
    /// holds a tile at least as new as the source.
    pub fn store_derived(&mut self, id: NodeId, tile: TerrainTile, source: &DeriveSource) -> bool {
        let Some(node) = self.get_mut(id) else {
            return false;
        };
        if node.tile.is_some() && node.source_version >= source.version {
            return false;
        }
        let bounds = *tile.bounds();
        node.bounds = node.bounds.with_z(bounds.min_z, bounds.max_z);
        node.tile = Some(Arc::new(tile));
        node.derived = true;
        node.source_version = source.derived_version();
        true
    }

    /// Store a fetched tile stamped with `source_version`, clearing the
    /// queued flag. The tile is dropped if the node holds a strictly newer
    /// tile or the node's SRID changed since the fetch started.
    ///
    /// With `copy_z` the node takes the tile's elevation range and widens
    /// its ancestors to match.
    pub fn store_fetched(
        &mut self,
        id: NodeId,
        tile: TerrainTile,
        source_version: i64,
        copy_z: bool,
    ) -> bool {
        let Some(node) = self.get_mut(id) else {
            return false;
        };
        node.queued = false;
        if node.tile.is_some() && node.source_version > source_version {
            return false;
        }
        if tile.srid() != node.srid {
            return false;
        }
        let bounds = *tile.bounds();
        node.tile = Some(Arc::new(tile));
        node.source_version = source_version;
        node.derived = false;
        if copy_z {
            node.bounds = node.bounds.with_z(bounds.min_z, bounds.max_z);
            self.update_parent_z_bounds(id);
        }
        true
    }

    /// Free every descendant, drop every root tile and switch all roots to
    /// `srid`. Returns the queued descendants, like [`QuadTree::reset`].
    pub fn reset_all(&mut self, srid: Srid) -> Vec<NodeId> {
        let mut queued = Vec::new();
        for root in self.roots {
            queued.extend(self.reset(root, true));
            if let Some(node) = self.get_mut(root) {
                node.srid = srid;
                node.source_version = NEVER_POPULATED;
                node.bounds = node.bounds.with_z(INITIAL_MIN_Z, INITIAL_MAX_Z);
            }
        }
        queued
    }

    fn insert(&mut self, node: QuadNode) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn remove(&mut self, id: NodeId) -> Option<QuadNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(node)
    }
}

/// Footprints of the eight roots: west to east, southern hemisphere first.
pub fn root_footprints() -> [Envelope; ROOT_COUNT] {
    std::array::from_fn(|i| {
        let min_lng = -180.0 + 90.0 * (i % 4) as f64;
        let min_lat = if i < 4 { -90.0 } else { 0.0 };
        Envelope::from_degrees(min_lng, min_lat, min_lng + 90.0, min_lat + 90.0)
    })
}
