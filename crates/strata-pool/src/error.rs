//! Pool error types.

/// Errors reported by [`crate::BlockPoolAllocator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every pooled block is in use and heap fallback was not permitted.
    #[error("block pool exhausted ({block_count} blocks of {block_size} bytes)")]
    Exhausted {
        /// Size of each block in bytes.
        block_size: usize,
        /// Number of blocks in the pool.
        block_count: usize,
    },

    /// Requested alignment is not a power of two or exceeds [`crate::MAX_ALIGNMENT`].
    #[error("unsupported block alignment: {0}")]
    InvalidAlignment(usize),

    /// Block size of zero, or a block count that cannot be indexed.
    #[error("invalid pool geometry: {block_count} blocks of {block_size} bytes")]
    InvalidGeometry {
        /// Requested block size in bytes.
        block_size: usize,
        /// Requested block count.
        block_count: usize,
    },
}
