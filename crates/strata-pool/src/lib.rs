//! Fixed-size block pool used to back terrain mesh buffers.
//!
//! Blocks are handed out from a preallocated arena through a lock-free free
//! list. Every block keeps the arena alive, so a block passed on to a renderer
//! stays valid after the allocator that produced it has been dropped.

mod allocator;
mod error;

pub use allocator::{Block, BlockPoolAllocator, MAX_ALIGNMENT};
pub use error::PoolError;
