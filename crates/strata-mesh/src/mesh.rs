//! Block-backed terrain mesh buffers.

use std::sync::Arc;

use strata_pool::Block;

use crate::error::BuildError;
use crate::topology::TileTopology;

/// Unit normal quantised to `[-127, 127]` per component; the fourth byte is
/// padding.
pub type PackedNormal = [i8; 4];

static_assertions::assert_eq_size!(PackedNormal, u32);
static_assertions::assert_eq_size!([f32; 3], [u8; 12]);

/// Quantise a unit vector.
pub(crate) fn pack_normal(x: f64, y: f64, z: f64) -> PackedNormal {
    let q = |v: f64| (v.clamp(-1.0, 1.0) * 127.0).round() as i8;
    [q(x), q(y), q(z), 0]
}

/// Mutable views of every section of a mesh block.
pub(crate) struct MeshSectionsMut<'a> {
    pub indices: &'a mut [u16],
    pub positions: &'a mut [[f32; 3]],
    pub normals: &'a mut [PackedNormal],
    pub no_data_mask: &'a mut [f32],
}

/// Index buffer, positions, normals and no-data mask of one tile, stored in a
/// single pool block.
///
/// Positions are relative to the owning tile's local origin. The mesh is a
/// triangle strip.
pub struct TerrainMesh {
    block: Block,
    topology: Arc<TileTopology>,
}

impl TerrainMesh {
    pub(crate) fn new(block: Block, topology: Arc<TileTopology>) -> Result<Self, BuildError> {
        if block.len() < topology.byte_len() {
            return Err(BuildError::BlockTooSmall {
                required: topology.byte_len(),
                available: block.len(),
            });
        }
        Ok(Self { block, topology })
    }

    pub(crate) fn sections_mut(&mut self) -> Result<MeshSectionsMut<'_>, BuildError> {
        let topo = &self.topology;
        let bytes = &mut self.block.as_bytes_mut()[..topo.byte_len()];
        let (head, mask) = bytes.split_at_mut(topo.mask_bytes.start);
        let (head, normals) = head.split_at_mut(topo.normal_bytes.start);
        let (indices, positions) = head.split_at_mut(topo.position_bytes.start);

        let normal_len = topo.normal_bytes.len();
        let position_len = topo.position_bytes.len();
        Ok(MeshSectionsMut {
            indices: bytemuck::try_cast_slice_mut(&mut indices[topo.index_bytes.clone()])
                .map_err(BuildError::Cast)?,
            positions: bytemuck::try_cast_slice_mut(&mut positions[..position_len])
                .map_err(BuildError::Cast)?,
            normals: bytemuck::try_cast_slice_mut(&mut normals[..normal_len])
                .map_err(BuildError::Cast)?,
            no_data_mask: bytemuck::try_cast_slice_mut(mask).map_err(BuildError::Cast)?,
        })
    }

    fn section<T: bytemuck::Pod>(&self, range: std::ops::Range<usize>) -> &[T] {
        bytemuck::try_cast_slice(&self.block.as_bytes()[range]).unwrap_or_default()
    }

    pub fn topology(&self) -> &TileTopology {
        &self.topology
    }

    /// Triangle-strip indices.
    pub fn indices(&self) -> &[u16] {
        self.section(self.topology.index_bytes.clone())
    }

    /// Vertex positions relative to the tile's local origin.
    pub fn positions(&self) -> &[[f32; 3]] {
        self.section(self.topology.position_bytes.clone())
    }

    pub fn normals(&self) -> &[PackedNormal] {
        self.section(self.topology.normal_bytes.clone())
    }

    /// `1.0` where the vertex was sampled from real data, else `0.0`.
    pub fn no_data_mask(&self) -> &[f32] {
        self.section(self.topology.mask_bytes.clone())
    }

    pub fn vertex_count(&self) -> usize {
        self.topology.vertex_count()
    }

    pub fn index_count(&self) -> usize {
        self.topology.index_count()
    }

    /// Whether the buffers live in a pooled block.
    pub fn is_pooled(&self) -> bool {
        self.block.is_pooled()
    }
}

impl std::fmt::Debug for TerrainMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainMesh")
            .field("vertices", &self.vertex_count())
            .field("indices", &self.index_count())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_pool::BlockPoolAllocator;

    #[test]
    fn test_pack_normal() {
        assert_eq!(pack_normal(0.0, 0.0, 1.0), [0, 0, 127, 0]);
        assert_eq!(pack_normal(-1.0, 0.5, 2.0), [-127, 64, 127, 0]);
    }

    /// Sections written through the mutable view read back through the
    /// typed accessors.
    #[test]
    fn test_sections_share_block() {
        let topology = Arc::new(TileTopology::new(4).unwrap());
        let pool = BlockPoolAllocator::new(topology.byte_len(), 1, 16).unwrap();
        let mut mesh = TerrainMesh::new(pool.allocate(false).unwrap(), Arc::clone(&topology)).unwrap();
        {
            let mut sections = mesh.sections_mut().unwrap();
            sections.indices.copy_from_slice(topology.indices());
            sections.positions[3] = [1.0, 2.0, 3.0];
            sections.normals[3] = [0, 0, 127, 0];
            sections.no_data_mask[3] = 1.0;
        }
        assert_eq!(mesh.indices(), topology.indices());
        assert_eq!(mesh.positions().len(), topology.vertex_count());
        assert_eq!(mesh.positions()[3], [1.0, 2.0, 3.0]);
        assert_eq!(mesh.normals()[3], [0, 0, 127, 0]);
        assert_eq!(mesh.no_data_mask()[3], 1.0);
        assert_eq!(mesh.no_data_mask()[2], 0.0);
        assert!(mesh.is_pooled());
    }

    #[test]
    fn test_rejects_small_block() {
        let topology = Arc::new(TileTopology::new(8).unwrap());
        let pool = BlockPoolAllocator::new(64, 1, 16).unwrap();
        let result = TerrainMesh::new(pool.allocate(false).unwrap(), topology);
        assert!(matches!(result, Err(BuildError::BlockTooSmall { available: 64, .. })));
    }
}
