//! Index topology and block layout shared by every tile of one post count.
//!
//! A tile's index buffer is a single triangle strip: the post grid as a quad
//! strip with rows joined by degenerate pairs, two degenerate indices linking
//! to the skirt, then the skirt strip alternating between each edge-ring post
//! and its lowered duplicate.

use std::ops::Range;

use crate::error::BuildError;
use crate::mesh::PackedNormal;

/// Smallest supported grid.
pub const MIN_POSTS: usize = 2;
/// Largest grid whose posts and skirt still fit 16-bit indices.
pub const MAX_POSTS: usize = 254;

/// Alignment of every section within a mesh block.
const SECTION_ALIGN: usize = 16;

fn align_up(offset: usize) -> usize {
    offset.div_ceil(SECTION_ALIGN) * SECTION_ALIGN
}

/// Number of ring vertices around an `n`x`n` grid, closing vertex included.
fn edge_vertex_count(num_posts: usize) -> usize {
    (num_posts - 1) * 4 + 1
}

/// Quad-strip index count for the post grid alone.
fn grid_index_count(num_posts: usize) -> usize {
    (num_posts - 1) * num_posts * 2 + (num_posts - 2) * 2
}

/// Precomputed indices, edge ring and block layout for `num_posts`.
#[derive(Clone, Debug)]
pub struct TileTopology {
    num_posts: usize,
    indices: Vec<u16>,
    edge_ring: Vec<u16>,
    skirt_index_offset: usize,
    pub(crate) index_bytes: Range<usize>,
    pub(crate) position_bytes: Range<usize>,
    pub(crate) normal_bytes: Range<usize>,
    pub(crate) mask_bytes: Range<usize>,
}

impl TileTopology {
    pub fn new(num_posts: usize) -> Result<Self, BuildError> {
        if !(MIN_POSTS..=MAX_POSTS).contains(&num_posts) {
            return Err(BuildError::InvalidPostCount {
                num_posts,
                min: MIN_POSTS,
                max: MAX_POSTS,
            });
        }

        let edge_ring = edge_ring(num_posts);
        let skirt_index_offset = grid_index_count(num_posts);
        let mut indices = Vec::with_capacity(skirt_index_offset + 2 + edge_ring.len() * 2);
        push_grid_strip(&mut indices, num_posts);
        debug_assert_eq!(indices.len(), skirt_index_offset);

        let last = indices.last().copied().unwrap_or(0);
        indices.push(last);
        indices.push(edge_ring[0]);

        let skirt_base = (num_posts * num_posts) as u16;
        for (i, &edge) in edge_ring.iter().enumerate() {
            indices.push(edge);
            indices.push(skirt_base + i as u16);
        }

        let vertex_count = num_posts * num_posts + edge_ring.len();
        let index_bytes = 0..indices.len() * size_of::<u16>();
        let position_start = align_up(index_bytes.end);
        let position_bytes = position_start..position_start + vertex_count * size_of::<[f32; 3]>();
        let normal_start = align_up(position_bytes.end);
        let normal_bytes = normal_start..normal_start + vertex_count * size_of::<PackedNormal>();
        let mask_start = align_up(normal_bytes.end);
        let mask_bytes = mask_start..mask_start + vertex_count * size_of::<f32>();

        Ok(Self {
            num_posts,
            indices,
            edge_ring,
            skirt_index_offset,
            index_bytes,
            position_bytes,
            normal_bytes,
            mask_bytes,
        })
    }

    /// Posts per side.
    pub fn num_posts(&self) -> usize {
        self.num_posts
    }

    /// Number of grid posts (excluding skirt vertices).
    pub fn post_count(&self) -> usize {
        self.num_posts * self.num_posts
    }

    /// Posts plus one skirt vertex per edge-ring entry.
    pub fn vertex_count(&self) -> usize {
        self.post_count() + self.edge_ring.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Index at which the degenerate link to the skirt starts.
    pub fn skirt_index_offset(&self) -> usize {
        self.skirt_index_offset
    }

    /// The full index buffer.
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Post indices around the grid perimeter, counter-clockwise, with the
    /// first post repeated to close the ring.
    pub fn edge_ring(&self) -> &[u16] {
        &self.edge_ring
    }

    /// Bytes a mesh block must hold.
    pub fn byte_len(&self) -> usize {
        self.mask_bytes.end
    }
}

/// Size in bytes of the mesh block for tiles of `num_posts` per side.
pub fn terrain_mesh_size(num_posts: usize) -> Result<usize, BuildError> {
    TileTopology::new(num_posts).map(|topology| topology.byte_len())
}

fn edge_ring(n: usize) -> Vec<u16> {
    let mut ring = Vec::with_capacity(edge_vertex_count(n));
    // Row 0 right to left, left column upward, last row left to right, right
    // column downward. Each run stops short of its corner.
    ring.extend((1..n).rev().map(|col| col as u16));
    ring.extend((0..n - 1).map(|row| (row * n) as u16));
    ring.extend((0..n - 1).map(|col| ((n - 1) * n + col) as u16));
    ring.extend((1..n).rev().map(|row| (row * n + n - 1) as u16));
    ring.push((n - 1) as u16);
    ring
}

fn push_grid_strip(indices: &mut Vec<u16>, n: usize) {
    for row in 0..n - 1 {
        if row > 0 {
            // Degenerate pair: repeat the previous row's last index and this
            // row's first.
            let last = indices.last().copied().unwrap_or(0);
            indices.push(last);
            indices.push(((row + 1) * n) as u16);
        }
        for col in 0..n {
            indices.push(((row + 1) * n + col) as u16);
            indices.push((row * n + col) as u16);
        }
    }
}
