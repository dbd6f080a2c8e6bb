//! Lock-free block pool with shared backing storage.
//!
//! The free list is a Treiber stack of slot indices. The head word packs a
//! 32-bit ABA tag above the 32-bit index of the first free slot, so a pop that
//! raced with a pop/push pair of the same slot fails its compare-and-swap
//! instead of corrupting the list.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::PoolError;

/// Largest alignment a pooled block can guarantee.
pub const MAX_ALIGNMENT: usize = 16;

/// Sentinel index marking the end of the free list.
const NIL: u32 = u32::MAX;
const INDEX_MASK: u64 = 0xFFFF_FFFF;

/// Unit of block storage. Its alignment is the alignment of every block.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Chunk([u8; 16]);

static_assertions::assert_eq_size!(Chunk, [u8; MAX_ALIGNMENT]);
static_assertions::const_assert_eq!(std::mem::align_of::<Chunk>(), MAX_ALIGNMENT);

fn new_storage(chunks: usize) -> Box<[Chunk]> {
    vec![Chunk([0; 16]); chunks].into_boxed_slice()
}

fn pack(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

fn unpack(head: u64) -> (u32, u32) {
    ((head >> 32) as u32, (head & INDEX_MASK) as u32)
}

/// Arena shared by the allocator and every block it handed out.
struct PoolShared {
    block_size: usize,
    chunks_per_block: usize,
    /// Storage for each slot. A slot is empty while its block is checked out.
    /// Ownership of an index is transferred by the free list, so these locks
    /// are never contended.
    slots: Box<[Mutex<Option<Box<[Chunk]>>>]>,
    /// Next-free link per slot.
    next: Box<[AtomicU32]>,
    head: AtomicU64,
    available: AtomicUsize,
}

impl PoolShared {
    fn pop(&self) -> Option<u32> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (tag, index) = unpack(head);
            if index == NIL {
                return None;
            }
            let next = self.next[index as usize].load(Ordering::Relaxed);
            let replacement = pack(tag.wrapping_add(1), next);
            match self.head.compare_exchange_weak(
                head,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.available.fetch_sub(1, Ordering::Relaxed);
                    return Some(index);
                }
                Err(current) => head = current,
            }
        }
    }

    fn push(&self, index: u32) {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (tag, first) = unpack(head);
            self.next[index as usize].store(first, Ordering::Relaxed);
            let replacement = pack(tag.wrapping_add(1), index);
            match self.head.compare_exchange_weak(
                head,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.available.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(current) => head = current,
            }
        }
    }

    fn take_storage(&self, index: u32) -> Box<[Chunk]> {
        self.slots[index as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| new_storage(self.chunks_per_block))
    }

    fn return_storage(&self, index: u32, storage: Box<[Chunk]>) {
        *self.slots[index as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(storage);
        self.push(index);
    }
}

/// Preallocated pool of equally sized, aligned memory blocks.
///
/// Cloning the allocator shares the same pool.
#[derive(Clone)]
pub struct BlockPoolAllocator {
    shared: Arc<PoolShared>,
}

impl BlockPoolAllocator {
    /// Preallocate `block_count` blocks of `block_size` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidAlignment`] if `alignment` is not a power of
    /// two no larger than [`MAX_ALIGNMENT`], and [`PoolError::InvalidGeometry`]
    /// for a zero block size or a count that does not fit the index space.
    pub fn new(block_size: usize, block_count: usize, alignment: usize) -> Result<Self, PoolError> {
        if !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
            return Err(PoolError::InvalidAlignment(alignment));
        }
        if block_size == 0 || block_count >= NIL as usize {
            return Err(PoolError::InvalidGeometry {
                block_size,
                block_count,
            });
        }

        let chunks_per_block = block_size.div_ceil(MAX_ALIGNMENT);
        let slots = (0..block_count)
            .map(|_| Mutex::new(Some(new_storage(chunks_per_block))))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        // Thread the free list through the slots in ascending order.
        let next = (0..block_count)
            .map(|i| {
                let link = if i + 1 < block_count { (i + 1) as u32 } else { NIL };
                AtomicU32::new(link)
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let first = if block_count > 0 { 0 } else { NIL };

        Ok(Self {
            shared: Arc::new(PoolShared {
                block_size,
                chunks_per_block,
                slots,
                next,
                head: AtomicU64::new(pack(0, first)),
                available: AtomicUsize::new(block_count),
            }),
        })
    }

    /// Take a block from the pool.
    ///
    /// When the pool is exhausted and `allow_heap_fallback` is set, an
    /// ordinary heap block of the same size is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] if no pooled block is free and the
    /// fallback is disabled.
    pub fn allocate(&self, allow_heap_fallback: bool) -> Result<Block, PoolError> {
        if let Some(index) = self.shared.pop() {
            let storage = self.shared.take_storage(index);
            return Ok(Block {
                storage: Some(storage),
                len: self.shared.block_size,
                origin: Origin::Pool {
                    shared: Arc::clone(&self.shared),
                    index,
                },
            });
        }
        if allow_heap_fallback {
            return Ok(Block {
                storage: Some(new_storage(self.shared.chunks_per_block)),
                len: self.shared.block_size,
                origin: Origin::Heap,
            });
        }
        Err(PoolError::Exhausted {
            block_size: self.shared.block_size,
            block_count: self.shared.slots.len(),
        })
    }

    /// Size of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    /// Number of pooled blocks.
    pub fn block_count(&self) -> usize {
        self.shared.slots.len()
    }

    /// Number of pooled blocks currently free.
    pub fn available(&self) -> usize {
        self.shared.available.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BlockPoolAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPoolAllocator")
            .field("block_size", &self.block_size())
            .field("block_count", &self.block_count())
            .field("available", &self.available())
            .finish()
    }
}

enum Origin {
    Pool { shared: Arc<PoolShared>, index: u32 },
    Heap,
}

/// A block of memory checked out of a [`BlockPoolAllocator`].
///
/// Dropping the block returns it to its pool. The pool's storage lives as long
/// as any block does.
pub struct Block {
    storage: Option<Box<[Chunk]>>,
    len: usize,
    origin: Origin,
}

impl Block {
    /// Block length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length block.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the block came from the pool rather than the heap fallback.
    pub fn is_pooled(&self) -> bool {
        matches!(self.origin, Origin::Pool { .. })
    }

    /// Block contents. The start is aligned to [`MAX_ALIGNMENT`].
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Some(storage) => &bytemuck::cast_slice::<Chunk, u8>(storage)[..self.len],
            None => &[],
        }
    }

    /// Mutable block contents. The start is aligned to [`MAX_ALIGNMENT`].
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Some(storage) => &mut bytemuck::cast_slice_mut::<Chunk, u8>(storage)[..self.len],
            None => &mut [],
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Origin::Pool { shared, index } = &self.origin
            && let Some(storage) = self.storage.take()
        {
            shared.return_storage(*index, storage);
        }
    }
}
